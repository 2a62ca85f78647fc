//! Remote forwarding of escalated audit entries
//!
//! The log pushes critical and security entries into an unbounded channel;
//! a worker task drains it and hands each entry to the forwarder. Failures
//! are logged and the entry is dropped. There is no retry.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::AuditLogEntry;

/// Remote collector for escalated entries
#[async_trait::async_trait]
pub trait AuditForwarder: Send + Sync {
    async fn forward(&self, entry: &AuditLogEntry) -> Result<()>;
}

/// POSTs each entry as JSON to a fixed endpoint
pub struct HttpForwarder {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpForwarder {
    pub fn new(endpoint: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            http_client,
        })
    }
}

#[async_trait::async_trait]
impl AuditForwarder for HttpForwarder {
    async fn forward(&self, entry: &AuditLogEntry) -> Result<()> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(entry)
            .send()
            .await
            .context("Failed to reach audit collector")?;

        if !response.status().is_success() {
            bail!("Audit collector returned {}", response.status());
        }
        Ok(())
    }
}

/// Spawn the forwarding worker. It exits once every sender is dropped.
pub fn spawn_forwarder(
    forwarder: Arc<dyn AuditForwarder>,
    mut rx: mpsc::UnboundedReceiver<AuditLogEntry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            match forwarder.forward(&entry).await {
                Ok(()) => debug!("Forwarded {} audit entry '{}'", entry.level, entry.event_type),
                Err(e) => warn!("Failed to forward audit entry '{}': {:#}", entry.event_type, e),
            }
        }
        debug!("Audit forwarder stopped");
    })
}
