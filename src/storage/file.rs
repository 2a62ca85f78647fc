//! Directory-backed store: one file per key

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{DurableKeyValueStore, StoreError};

/// Persists each key as `<dir>/<key>.json`
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed
    pub fn with_dir(base_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create storage directory {}", base_dir.display()))?;
        Ok(Self { base_dir })
    }

    /// Create a store in the configured data directory
    pub fn from_config(config: &crate::config::TelemetryConfig) -> Result<Self> {
        Self::with_dir(config.resolved_data_dir()?)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_dir.join(format!("{}.json", name))
    }
}

fn io_error(key: &str, source: std::io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        source,
    }
}

impl DurableKeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        // Write a sibling temp file, then rename over the target
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).map_err(|e| io_error(key, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_error(key, e))?;
        debug!("Wrote {} bytes to {}", value.len(), path.display());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::with_dir(dir.path().join("data")).unwrap();

        assert!(store.get(crate::storage::AUDIT_KEY).unwrap().is_none());
        store.set(crate::storage::AUDIT_KEY, "[]").unwrap();
        assert_eq!(store.get(crate::storage::AUDIT_KEY).unwrap().as_deref(), Some("[]"));
        assert!(dir.path().join("data").join("portal_audit_logs.json").exists());

        store.remove(crate::storage::AUDIT_KEY).unwrap();
        assert!(store.get(crate::storage::AUDIT_KEY).unwrap().is_none());
        // Removing twice is fine
        store.remove(crate::storage::AUDIT_KEY).unwrap();
    }

    #[test]
    fn test_key_sanitized_into_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::with_dir(dir.path().to_path_buf()).unwrap();
        store.set("../escape/attempt", "x").unwrap();
        assert!(dir.path().join("___escape_attempt.json").exists());
    }
}
