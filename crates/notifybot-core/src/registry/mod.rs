//! Plugin-based notifier registry
//!
//! The registry allows notifiers and history stores to be registered
//! dynamically at runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use notifybot_core::registry::NotifierRegistry;
//! use notifybot_core::config::NotifierConfig;
//!
//! let registry = NotifierRegistry::with_builtin_stores();
//! notifybot_json::register(&registry);
//!
//! let notifier = registry.create_notifier(&NotifierConfig::Json { .. })?;
//! ```
//!
//! ## Registration
//!
//! Notifier crates export a `register` function:
//!
//! ```rust,ignore
//! pub fn register(registry: &NotifierRegistry) {
//!     registry.register_notifier("json", Box::new(JsonNotifierFactory));
//! }
//! ```

use crate::config::{HistoryStoreConfig, NotifierConfig};
use crate::error::{Error, Result};
use crate::ledger::{FileRefStoreFactory, MemoryRefStoreFactory};
use crate::traits::{Notifier, NotifierFactory, RefStore, RefStoreFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Registry for plugin-based notifier and store creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct NotifierRegistry {
    /// Registered notifier factories
    notifiers: RwLock<HashMap<String, Box<dyn NotifierFactory>>>,

    /// Registered history store factories
    stores: RwLock<HashMap<String, Box<dyn RefStoreFactory>>>,
}

impl NotifierRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `memory` and `file` stores registered
    pub fn with_builtin_stores() -> Self {
        let registry = Self::new();
        registry.register_store("memory", Box::new(MemoryRefStoreFactory));
        registry.register_store("file", Box::new(FileRefStoreFactory));
        registry
    }

    /// Register a notifier factory
    ///
    /// # Parameters
    ///
    /// - `name`: Notifier type name (e.g., "json", "slack")
    /// - `factory`: Factory object for creating notifier instances
    pub fn register_notifier(&self, name: impl Into<String>, factory: Box<dyn NotifierFactory>) {
        self.notifiers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), factory);
    }

    /// Register a history store factory
    pub fn register_store(&self, name: impl Into<String>, factory: Box<dyn RefStoreFactory>) {
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), factory);
    }

    /// Create a notifier from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn Notifier>)`: Created notifier instance
    /// - `Err(Error)`: If the type is not registered or creation fails
    pub fn create_notifier(&self, config: &NotifierConfig) -> Result<Box<dyn Notifier>> {
        config.validate()?;
        let notifier_type = config.type_name();
        let notifiers = self.notifiers.read().unwrap_or_else(PoisonError::into_inner);

        let factory = notifiers
            .get(notifier_type)
            .ok_or_else(|| Error::config(format!("Unknown notifier type: {}", notifier_type)))?;

        factory.create(config)
    }

    /// Create every configured notifier, in order
    pub fn create_notifiers(&self, configs: &[NotifierConfig]) -> Result<Vec<Box<dyn Notifier>>> {
        configs.iter().map(|c| self.create_notifier(c)).collect()
    }

    /// Create a history store from configuration
    pub fn create_store(&self, config: &HistoryStoreConfig) -> Result<Arc<dyn RefStore>> {
        let store_type = config.type_name();
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);

        let factory = stores
            .get(store_type)
            .ok_or_else(|| Error::config(format!("Unknown history store type: {}", store_type)))?;

        factory.create(config)
    }

    /// Check if a notifier type is registered
    pub fn has_notifier(&self, name: &str) -> bool {
        self.notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Check if a store type is registered
    pub fn has_store(&self, name: &str) -> bool {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// List all registered notifier types
    pub fn list_notifiers(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(String);

    #[async_trait::async_trait]
    impl Notifier for Named {
        fn name(&self) -> &str {
            &self.0
        }
    }

    struct CustomFactory;

    impl NotifierFactory for CustomFactory {
        fn create(&self, config: &NotifierConfig) -> Result<Box<dyn Notifier>> {
            match config {
                NotifierConfig::Custom { config, .. } => {
                    let name = config["name"].as_str().unwrap_or("custom").to_string();
                    Ok(Box::new(Named(name)))
                }
                _ => Err(Error::config("expected a custom notifier config")),
            }
        }
    }

    #[test]
    fn creates_registered_notifiers() {
        let registry = NotifierRegistry::new();
        registry.register_notifier("irc", Box::new(CustomFactory));
        assert!(registry.has_notifier("irc"));
        assert_eq!(registry.list_notifiers(), vec!["irc".to_string()]);

        let config = NotifierConfig::Custom {
            factory: "irc".to_string(),
            config: serde_json::json!({ "name": "irc-main" }),
        };
        let notifier = registry.create_notifier(&config).unwrap();
        assert_eq!(notifier.name(), "irc-main");
    }

    #[test]
    fn unknown_types_are_config_errors() {
        let registry = NotifierRegistry::with_builtin_stores();
        let config = NotifierConfig::Custom {
            factory: "pager".to_string(),
            config: serde_json::json!({}),
        };
        assert!(matches!(registry.create_notifier(&config), Err(Error::Config(_))));

        assert!(registry.has_store("memory"));
        assert!(registry.create_store(&HistoryStoreConfig::Memory).is_ok());
        let git = HistoryStoreConfig::Git {
            url: "https://example.com/history.git".to_string(),
            local_path: "/tmp/history".to_string(),
        };
        assert!(registry.create_store(&git).is_err());
    }
}
