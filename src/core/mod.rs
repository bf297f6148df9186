//! Core abstractions shared by the client, query and reconciliation layers

pub mod cache;
pub mod config;
pub mod error;
pub mod log;
pub mod models;

// Re-export main types for cleaner imports
pub use cache::{KeyValueCollection, Store};
pub use error::ApiError;
