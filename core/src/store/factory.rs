use crate::config::{Config, get_cirrus_dir};
use crate::store::{JsonlStore, MemoryStore};
use crate::traits::ConversationStore;
use anyhow::Result;
use std::sync::Arc;

pub fn create_store(config: &Config) -> Result<Arc<dyn ConversationStore>> {
    match config.store.kind.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "jsonl" => {
            let dir = config
                .store
                .dir
                .clone()
                .unwrap_or_else(|| get_cirrus_dir().join("conversations"));
            Ok(Arc::new(JsonlStore::new(dir)))
        }
        other => anyhow::bail!("Unknown store: {}. Supported: jsonl, memory", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_memory() {
        let mut config = Config::default();
        config.store.kind = "memory".into();
        assert_eq!(create_store(&config).unwrap().name(), "memory");
    }

    #[test]
    fn factory_jsonl_is_default() {
        let store = create_store(&Config::default()).unwrap();
        assert_eq!(store.name(), "jsonl");
    }

    #[test]
    fn factory_unknown() {
        let mut config = Config::default();
        config.store.kind = "postgres".into();
        let err = create_store(&config).err().unwrap();
        assert!(err.to_string().contains("Unknown store"));
    }
}
