use crate::core::cache::KeyValueCollection;
use anyhow::{Context, Result};
use fjall::{Keyspace, PartitionHandle, PersistMode};
use tracing::debug;

/// A collection stored in one fjall partition.
///
/// Every write is synced before returning so it is visible after a restart.
pub struct DiskCollection {
    keyspace: Keyspace,
    partition: PartitionHandle,
}

impl DiskCollection {
    pub fn new(keyspace: Keyspace, partition: PartitionHandle) -> Self {
        Self {
            keyspace,
            partition,
        }
    }

    fn sync(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .context("Failed to persist keyspace")
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        match self.partition.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes.to_vec())?)),
            None => Ok(None),
        }
    }
}

impl KeyValueCollection for DiskCollection {
    fn get(&self, key: &str) -> Option<String> {
        match self.read(key) {
            Ok(Some(value)) => {
                debug!("Store HIT for key: {}", key);
                Some(value)
            }
            Ok(None) => {
                debug!("Store MISS for key: {}", key);
                None
            }
            Err(e) => {
                debug!("DiskCollection get error: {}", e);
                None
            }
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.partition
            .insert(key.as_bytes(), value.as_bytes())
            .with_context(|| format!("Failed to write key: {key}"))?;
        self.sync()?;
        debug!("Store PUT for key: {}", key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.partition
            .remove(key.as_bytes())
            .with_context(|| format!("Failed to remove key: {key}"))?;
        self.sync()?;
        debug!("Store REMOVE for key: {}", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjall::PartitionCreateOptions;
    use tempfile::tempdir;

    fn open(path: &std::path::Path) -> DiskCollection {
        let keyspace = fjall::Config::new(path).open().unwrap();
        let partition = keyspace
            .open_partition("test", PartitionCreateOptions::default())
            .unwrap();
        DiskCollection::new(keyspace, partition)
    }

    #[test]
    fn test_disk_get_put() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        assert!(store.get("key1").is_none());

        store.put("key1", "{\"a\":1}").unwrap();
        assert_eq!(store.get("key1").as_deref(), Some("{\"a\":1}"));

        assert!(store.get("key2").is_none());
    }

    #[test]
    fn test_disk_remove() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        store.put("key1", "value").unwrap();
        store.remove("key1").unwrap();
        assert!(store.get("key1").is_none());
    }
}
