//! Durable key-value storage
//!
//! The host supplies a flat string store (`get`/`set`/`remove` by key) with
//! no transactions and no declared size limit. Two adapters ship here: an
//! in-memory map with an optional byte quota, and a directory of JSON files.

pub mod file;
pub mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Key holding the learning data blob
pub const LEARNING_KEY: &str = "portal_learning_data";
/// Key holding the audit log blob
pub const AUDIT_KEY: &str = "portal_audit_logs";
/// Key holding the offline operation queue
pub const OFFLINE_QUEUE_KEY: &str = "portal_offline_queue";
/// Key holding automation rules
pub const AUTOMATION_KEY: &str = "portal_automation_rules";

/// Storage errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store refused the write because it is full.
    #[error("storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    /// Underlying I/O failed.
    #[error("storage I/O failed for key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Serializing a value failed.
    #[error("failed to serialize value for key '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Flat string store provided by the host
pub trait DurableKeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Read and decode a JSON blob.
///
/// Missing keys, unreadable storage and corrupt blobs all yield `None`; the
/// caller starts empty instead of failing.
pub fn load_json<T: DeserializeOwned>(store: &dyn DurableKeyValueStore, key: &str) -> Option<T> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to read '{}': {}", key, e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding corrupt blob under '{}': {}", key, e);
            None
        }
    }
}

/// Encode a value as JSON and write it
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn DurableKeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(value).map_err(|source| StoreError::Serialize {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &json)
}
