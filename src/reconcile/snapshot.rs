use crate::core::cache::KeyValueCollection;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tracing::debug;

/// Last-known-good merge result for one cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub cache_key: String,
    /// Serialized merge output.
    pub payload: String,
    pub written_at: DateTime<Utc>,
}

impl SnapshotRecord {
    pub fn decode<M: DeserializeOwned>(&self) -> Result<M> {
        serde_json::from_str(&self.payload)
            .with_context(|| format!("Failed to decode snapshot {}", self.cache_key))
    }
}

/// Persisted snapshots of merged views, keyed by merge group.
pub struct SnapshotCache {
    storage: Arc<dyn KeyValueCollection>,
}

impl SnapshotCache {
    pub fn new(storage: Arc<dyn KeyValueCollection>) -> Self {
        Self { storage }
    }

    pub fn read_record(&self, cache_key: &str) -> Option<SnapshotRecord> {
        let raw = self.storage.get(cache_key)?;
        match serde_json::from_str::<SnapshotRecord>(&raw) {
            Ok(record) if record.cache_key == cache_key => Some(record),
            Ok(_) => {
                debug!(cache_key, "Snapshot stored under a different key, ignoring");
                None
            }
            Err(e) => {
                debug!(cache_key, error = %e, "Unreadable snapshot, ignoring");
                None
            }
        }
    }

    /// Reads and decodes a snapshot. Undecodable payloads read as absent.
    pub fn read<M: DeserializeOwned>(&self, cache_key: &str) -> Option<(M, DateTime<Utc>)> {
        let record = self.read_record(cache_key)?;
        match record.decode() {
            Ok(value) => Some((value, record.written_at)),
            Err(e) => {
                debug!(cache_key, error = %e, "Snapshot payload no longer matches its type");
                None
            }
        }
    }

    pub fn write<M: Serialize>(&self, cache_key: &str, value: &M) -> Result<SnapshotRecord> {
        let record = SnapshotRecord {
            cache_key: cache_key.to_string(),
            payload: serde_json::to_string(value)?,
            written_at: Utc::now(),
        };
        self.storage
            .put(cache_key, &serde_json::to_string(&record)?)
            .with_context(|| format!("Failed to persist snapshot {cache_key}"))?;
        debug!(cache_key, "Snapshot written");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCollection;
    use std::collections::BTreeMap;

    fn cache() -> (SnapshotCache, Arc<dyn KeyValueCollection>) {
        let storage: Arc<dyn KeyValueCollection> = Arc::new(MemoryCollection::new());
        (SnapshotCache::new(Arc::clone(&storage)), storage)
    }

    #[test]
    fn test_payload_survives_write_and_read() {
        let (cache, _) = cache();
        let mut value = BTreeMap::new();
        value.insert("대란".to_string(), vec![Some(6200.5), None]);
        value.insert("특란".to_string(), vec![None, Some(6500.0)]);

        let written = cache.write("snapshot:test", &value).unwrap();
        let record = cache.read_record("snapshot:test").unwrap();
        assert_eq!(record, written);
        assert_eq!(
            record.payload,
            serde_json::to_string(&value).unwrap(),
            "payload is stored byte for byte"
        );

        let (read, written_at): (BTreeMap<String, Vec<Option<f64>>>, _) =
            cache.read("snapshot:test").unwrap();
        assert_eq!(read, value);
        assert_eq!(written_at, written.written_at);
    }

    #[test]
    fn test_garbage_reads_as_absent() {
        let (cache, storage) = cache();
        storage.put("snapshot:bad", "not json").unwrap();
        assert!(cache.read_record("snapshot:bad").is_none());

        cache.write("snapshot:typed", &vec![1, 2, 3]).unwrap();
        assert!(cache.read::<String>("snapshot:typed").is_none());
    }

    #[test]
    fn test_write_overwrites_previous_snapshot() {
        let (cache, _) = cache();
        cache.write("snapshot:k", &1).unwrap();
        cache.write("snapshot:k", &2).unwrap();
        assert_eq!(cache.read::<i32>("snapshot:k").map(|(v, _)| v), Some(2));
    }
}
