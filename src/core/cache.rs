//! Durable key-value storage abstractions

use anyhow::Result;
use std::sync::Arc;

/// A named collection of string keys mapped to serialized text payloads.
///
/// Reads are synchronous and never fail: a backend error is logged and read
/// as an absent value.
pub trait KeyValueCollection: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Opens collections by name.
pub trait Store: Send + Sync {
    /// Returns the named collection, creating it if needed. `persist` asks for
    /// a collection that survives process restarts.
    fn get_collection(&self, name: &str, persist: bool) -> Arc<dyn KeyValueCollection>;
}
