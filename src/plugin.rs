//! Plugins: named bundles of additions installed with `use_plugin`.
//!
//! # Example
//!
//! ```ignore
//! let plugin = Plugin::new("math", |hemera, options| {
//!     hemera.add(Pattern::new().with("topic", "math").with("cmd", "add"), add)?;
//!     Ok(())
//! })
//! .options(json!({ "precision": 2 }));
//!
//! hemera.use_plugin(plugin)?;
//! ```

use serde_json::{Map, Value};

use crate::error::{HemeraError, Result, PLUGIN_REGISTERED};
use crate::Hemera;

type RegisterFn = Box<dyn FnOnce(&Hemera, Value) -> Result<()> + Send>;

/// An extension to install on an instance.
pub struct Plugin {
    name: String,
    options: Value,
    register: RegisterFn,
}

impl Plugin {
    /// Create a plugin from its name and registration function.
    ///
    /// The function receives a handle bound to the same instance and its
    /// own copy of the options.
    pub fn new<F>(name: impl Into<String>, register: F) -> Self
    where
        F: FnOnce(&Hemera, Value) -> Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            options: Value::Object(Map::new()),
            register: Box::new(register),
        }
    }

    /// Set the options passed to the registration function.
    pub fn options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, Value, RegisterFn) {
        (self.name, self.options, self.register)
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Record of an installed plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginRecord {
    pub name: String,
    pub options: Value,
}

/// Installed plugins, in installation order.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    records: Vec<PluginRecord>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `name`.
    ///
    /// # Errors
    ///
    /// `ConfigError` when the name is taken.
    pub fn insert(&mut self, name: &str, options: Value) -> Result<()> {
        if self.contains(name) {
            return Err(HemeraError::config(PLUGIN_REGISTERED));
        }
        self.records.push(PluginRecord {
            name: name.to_string(),
            options,
        });
        Ok(())
    }

    /// Release `name`, e.g. after its registration failed.
    pub fn release(&mut self, name: &str) {
        self.records.retain(|r| r.name != name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&PluginRecord> {
        self.records.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = PluginRegistry::new();
        registry.insert("math", json!({})).unwrap();

        let err = registry.insert("math", json!({"a": 1})).unwrap_err();
        assert_eq!(err.name(), "ConfigError");
        assert_eq!(err.message(), "Plugin is already registered");
        assert_eq!(registry.get("math").unwrap().options, json!({}));
    }

    #[test]
    fn test_release_frees_name() {
        let mut registry = PluginRegistry::new();
        registry.insert("a", json!({})).unwrap();
        registry.insert("b", json!({})).unwrap();
        registry.release("a");

        assert_eq!(registry.names(), vec!["b".to_string()]);
        assert!(registry.insert("a", json!({})).is_ok());
    }

    #[test]
    fn test_plugin_defaults() {
        let plugin = Plugin::new("p", |_, _| Ok(()));
        assert_eq!(plugin.name(), "p");
        let (_, options, _) = plugin.into_parts();
        assert_eq!(options, json!({}));
    }
}
