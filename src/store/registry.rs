use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::{JournalOptions, JournalStore, MemoryStore, MutationStore};
use crate::config::StoreConfig;
use crate::types::{PenumbraError, Result};

/// Builds a store from its config section.
pub type StoreFactory = fn(&StoreConfig) -> Result<Arc<dyn MutationStore>>;

/// Explicit map from `store.kind` to a factory, populated at startup.
#[derive(Clone)]
pub struct StoreRegistry {
    factories: BTreeMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the bundled `memory` and `journal` stores.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", memory_factory);
        registry.register("journal", journal_factory);
        registry
    }

    /// Adds or replaces the factory for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, factory: StoreFactory) {
        self.factories.insert(kind.into(), factory);
    }

    /// Instantiates the store named by `config.kind`.
    pub fn create(&self, config: &StoreConfig) -> Result<Arc<dyn MutationStore>> {
        let factory = self.factories.get(&config.kind).ok_or_else(|| {
            PenumbraError::Config(format!(
                "unknown store kind '{}' (registered: {})",
                config.kind,
                self.kinds().collect::<Vec<_>>().join(", ")
            ))
        })?;
        debug!(kind = %config.kind, "store.registry.create");
        factory(config)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn memory_factory(_config: &StoreConfig) -> Result<Arc<dyn MutationStore>> {
    Ok(Arc::new(MemoryStore::new()))
}

fn journal_factory(config: &StoreConfig) -> Result<Arc<dyn MutationStore>> {
    let path = config
        .path
        .as_ref()
        .ok_or_else(|| PenumbraError::Config("journal store requires [store] path".into()))?;
    let options = JournalOptions {
        create: true,
        sync: config.sync,
    };
    Ok(Arc::new(JournalStore::open(path, options)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_registered() {
        let registry = StoreRegistry::with_defaults();
        assert_eq!(registry.kinds().collect::<Vec<_>>(), vec!["journal", "memory"]);
        assert!(registry.create(&StoreConfig::default()).is_ok());
    }

    #[test]
    fn unknown_kind_is_a_config_error() {
        let registry = StoreRegistry::with_defaults();
        let config = StoreConfig {
            kind: "cassandra".into(),
            ..StoreConfig::default()
        };
        let err = registry.create(&config).err().expect("unknown kind");
        assert!(matches!(err, PenumbraError::Config(msg) if msg.contains("cassandra")));
    }

    #[test]
    fn journal_without_path_is_rejected() {
        let registry = StoreRegistry::with_defaults();
        let config = StoreConfig {
            kind: "journal".into(),
            ..StoreConfig::default()
        };
        assert!(matches!(
            registry.create(&config),
            Err(PenumbraError::Config(_))
        ));
    }
}
