pub mod disk;
pub mod memory;

use crate::core::cache::{KeyValueCollection, Store};
use disk::DiskCollection;
use fjall::{Keyspace, PartitionCreateOptions};
use memory::MemoryCollection;
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, RwLock},
};
use tracing::{debug, warn};

/// A thread-safe key-value store that can hold multiple collections.
///
/// Persistent collections live in a fjall keyspace. When the keyspace cannot
/// be opened, persistent collections degrade to memory so the client still
/// works for the lifetime of the process.
pub struct KeyValueStore {
    collections: RwLock<HashMap<String, Arc<dyn KeyValueCollection>>>,
    keyspace: Option<Keyspace>,
}

impl KeyValueStore {
    /// Opens a store rooted at `path`.
    pub fn open(path: &Path) -> Self {
        let keyspace = match fjall::Config::new(path.join("store")).open() {
            Ok(keyspace) => Some(keyspace),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to open keyspace, using memory store");
                None
            }
        };

        Self {
            collections: RwLock::new(HashMap::new()),
            keyspace,
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: None,
        }
    }

    fn create_collection(&self, name: &str, persist: bool) -> Arc<dyn KeyValueCollection> {
        if persist {
            if let Some(keyspace) = &self.keyspace {
                match keyspace.open_partition(name, PartitionCreateOptions::default()) {
                    Ok(partition) => {
                        debug!("Opened persistent collection: {}", name);
                        return Arc::new(DiskCollection::new(keyspace.clone(), partition));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to open partition {}, using memory", name);
                    }
                }
            }
        }
        Arc::new(MemoryCollection::new())
    }
}

impl Default for KeyValueStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Store for KeyValueStore {
    fn get_collection(&self, name: &str, persist: bool) -> Arc<dyn KeyValueCollection> {
        {
            let collections = match self.collections.read() {
                Ok(c) => c,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(collection) = collections.get(name) {
                return Arc::clone(collection);
            }
        }

        let mut collections = match self.collections.write() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            collections
                .entry(name.to_string())
                .or_insert_with(|| self.create_collection(name, persist)),
        )
    }
}
