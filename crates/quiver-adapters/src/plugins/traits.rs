//! The plugin contract.

use thiserror::Error;

use super::FunctionRegistry;

/// Errors raised while installing a plugin.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// A plugin with this name is already installed.
    #[error("plugin '{0}' is already installed")]
    AlreadyInstalled(String),
    /// Two plugins register the same function.
    #[error("function '{function}' is already registered by plugin '{owner}'")]
    DuplicateFunction {
        /// The function name, lowercased.
        function: String,
        /// The plugin that registered it first.
        owner: String,
    },
    /// The name is empty or contains characters a query cannot spell.
    #[error("invalid function name '{0}'")]
    InvalidName(String),
}

/// A named group of functions.
pub trait Plugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Plugin version, informational.
    fn version(&self) -> &str {
        "0.1.0"
    }

    /// Adds the plugin's functions to `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a function name is invalid or already taken.
    fn register(&self, registry: &mut FunctionRegistry) -> Result<(), PluginError>;
}
