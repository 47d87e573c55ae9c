//! Function and plugin registries.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use indexmap::IndexMap;
use quiver_common::types::Value;
use quiver_common::utils::error::Result;
use quiver_core::execution::FunctionResolver;

use super::{Plugin, PluginError};

/// A scalar function: argument values in, one value out.
pub type ScalarFunction = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

struct Entry {
    owner: String,
    function: ScalarFunction,
}

/// Functions by lowercased name.
///
/// Implements [`FunctionResolver`], so a registry can be handed straight
/// to query execution.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Entry>,
    owner: String,
}

impl FunctionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` under `name`, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not an identifier or is taken.
    pub fn register<F>(&mut self, name: &str, function: F) -> std::result::Result<(), PluginError>
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let valid = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(PluginError::InvalidName(name.to_string()));
        }
        let key = name.to_ascii_lowercase();
        if let Some(existing) = self.functions.get(&key) {
            return Err(PluginError::DuplicateFunction {
                function: key,
                owner: existing.owner.clone(),
            });
        }
        self.functions.insert(
            key,
            Entry {
                owner: self.owner.clone(),
                function: Arc::new(function),
            },
        );
        Ok(())
    }

    /// Looks up a function.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ScalarFunction> {
        self.functions
            .get(&name.to_ascii_lowercase())
            .map(|e| &e.function)
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether no function is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl FunctionResolver for FunctionRegistry {
    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value>> {
        self.get(name).map(|f| f(args))
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

/// Installed plugins and the functions they contributed.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    /// Plugin name to version, in install order.
    plugins: IndexMap<String, String>,
    functions: FunctionRegistry,
}

impl PluginRegistry {
    /// Creates a registry with no plugins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `plugin`. On error nothing from the plugin is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin is already installed or one of its
    /// functions clashes with an existing one.
    pub fn install(&mut self, plugin: &dyn Plugin) -> std::result::Result<(), PluginError> {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(PluginError::AlreadyInstalled(name));
        }
        let before: Vec<String> = self.functions.functions.keys().cloned().collect();
        self.functions.owner.clone_from(&name);
        let result = plugin.register(&mut self.functions);
        self.functions.owner.clear();
        if let Err(e) = result {
            self.functions.functions.retain(|k, _| before.contains(k));
            return Err(e);
        }
        tracing::debug!(plugin = %name, functions = self.functions.len(), "plugin installed");
        self.plugins.insert(name, plugin.version().to_string());
        Ok(())
    }

    /// Names and versions of installed plugins, in install order.
    pub fn plugins(&self) -> impl Iterator<Item = (&str, &str)> {
        self.plugins.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Whether `name` is installed.
    #[must_use]
    pub fn is_installed(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// The combined function registry.
    #[must_use]
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Consumes the registry, keeping only the functions.
    #[must_use]
    pub fn into_functions(self) -> FunctionRegistry {
        self.functions
    }
}
