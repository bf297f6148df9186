use crate::core::cache::KeyValueCollection;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// In-memory collection, lost when the process exits
#[derive(Default)]
pub struct MemoryCollection {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueCollection for MemoryCollection {
    fn get(&self, key: &str) -> Option<String> {
        let map = match self.inner.read() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        let value = map.get(key).cloned();
        if value.is_some() {
            debug!("Store HIT for key: {}", key);
        } else {
            debug!("Store MISS for key: {}", key);
        }
        value
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Memory collection lock poisoned"))?;
        map.insert(key.to_string(), value.to_string());
        debug!("Store PUT for key: {}", key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Memory collection lock poisoned"))?;
        map.remove(key);
        debug!("Store REMOVE for key: {}", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_get_put() {
        let store = MemoryCollection::new();

        assert!(store.get("key1").is_none());

        store.put("key1", "value1").unwrap();
        assert_eq!(store.get("key1").as_deref(), Some("value1"));

        // Overwrite
        store.put("key1", "value2").unwrap();
        assert_eq!(store.get("key1").as_deref(), Some("value2"));

        assert!(store.get("key2").is_none());
    }

    #[test]
    fn test_memory_remove() {
        let store = MemoryCollection::new();

        store.put("key1", "value1").unwrap();
        store.remove("key1").unwrap();
        assert!(store.get("key1").is_none());

        // Removing a missing key is fine
        store.remove("key1").unwrap();
    }
}
