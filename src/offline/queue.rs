//! Durable queue of failed mutating requests

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::storage::{self, DurableKeyValueStore, OFFLINE_QUEUE_KEY};

/// Methods whose failed calls are queued for replay
pub const REPLAYABLE_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// Whether a failed call with this method should be queued
pub fn is_replayable(method: &str) -> bool {
    REPLAYABLE_METHODS
        .iter()
        .any(|m| m.eq_ignore_ascii_case(method))
}

/// Everything needed to re-issue a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: method.to_ascii_uppercase(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_mutating(&self) -> bool {
        is_replayable(&self.method)
    }
}

/// Persisted as `{id, occurredAt, requestDescriptor}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineOperation {
    pub id: String,
    pub occurred_at: DateTime<Utc>,
    pub request_descriptor: RequestDescriptor,
}

impl OfflineOperation {
    pub fn new(request: RequestDescriptor) -> Self {
        let occurred_at = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("op-{}-{}", occurred_at.timestamp_millis(), &suffix[..8]),
            occurred_at,
            request_descriptor: request,
        }
    }
}

/// FIFO of pending operations, persisted after every change
pub struct OfflineOperationQueue {
    operations: Vec<OfflineOperation>,
    store: Arc<dyn DurableKeyValueStore>,
}

impl OfflineOperationQueue {
    pub fn new(store: Arc<dyn DurableKeyValueStore>) -> Self {
        Self {
            operations: Vec::new(),
            store,
        }
    }

    /// Restore the persisted queue; a missing or corrupt blob leaves it empty
    pub fn load(&mut self) {
        self.operations =
            storage::load_json(self.store.as_ref(), OFFLINE_QUEUE_KEY).unwrap_or_default();
        debug!("Loaded {} queued operations", self.operations.len());
    }

    /// Append a request and persist. Returns the operation id.
    ///
    /// The operation stays queued in memory even when the write fails.
    pub fn enqueue(&mut self, request: RequestDescriptor) -> Result<String> {
        let operation = OfflineOperation::new(request);
        let id = operation.id.clone();
        info!(
            "Queued {} {} as {}",
            operation.request_descriptor.method, operation.request_descriptor.url, id
        );
        self.operations.push(operation);
        self.persist()?;
        Ok(id)
    }

    /// Owned copy of the queue, oldest first
    pub fn snapshot(&self) -> Vec<OfflineOperation> {
        self.operations.clone()
    }

    /// Remove operations by id. Returns how many were removed.
    pub fn remove(&mut self, ids: &[String]) -> usize {
        let before = self.operations.len();
        self.operations.retain(|op| !ids.contains(&op.id));
        before - self.operations.len()
    }

    pub fn persist(&self) -> Result<()> {
        storage::save_json(self.store.as_ref(), OFFLINE_QUEUE_KEY, &self.operations)
            .context("Failed to write offline queue")
    }

    pub fn list(&self) -> &[OfflineOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.operations.clear();
        self.store
            .remove(OFFLINE_QUEUE_KEY)
            .context("Failed to remove offline queue")?;
        Ok(())
    }
}
