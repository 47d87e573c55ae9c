//! Scalar function plugins.
//!
//! Queries call functions by name; anything the expression evaluator does
//! not handle itself is resolved through a [`FunctionRegistry`]. Plugins
//! add groups of functions to a registry, and [`PluginRegistry`] keeps
//! track of which plugins are installed.
//!
//! ```
//! use quiver_adapters::plugins::{BuiltinFunctions, PluginRegistry};
//!
//! let mut plugins = PluginRegistry::new();
//! plugins.install(&BuiltinFunctions).unwrap();
//! assert!(plugins.functions().contains("upper"));
//! ```

mod builtins;
mod registry;
mod traits;

pub use builtins::BuiltinFunctions;
pub use registry::{FunctionRegistry, PluginRegistry, ScalarFunction};
pub use traits::{Plugin, PluginError};
