//! Capped, persisted audit log

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::export::{self, ExportFormat};
use super::sanitize;
use super::{AuditFilter, AuditLevel, AuditLogEntry};
use crate::config::AuditConfig;
use crate::pressure::PressureGate;
use crate::storage::{self, DurableKeyValueStore, AUDIT_KEY};

/// Summary of the retained entries
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub total: usize,
    pub by_level: BTreeMap<String, usize>,
    pub enabled: bool,
    pub forwarding: bool,
}

pub struct AuditLog {
    /// Newest first
    entries: VecDeque<AuditLogEntry>,
    capacity: usize,
    persist_every: usize,
    max_field_chars: usize,
    max_persist_bytes: usize,
    appends_since_persist: usize,
    enabled: bool,
    gate: PressureGate,
    store: Arc<dyn DurableKeyValueStore>,
    forward_tx: Option<mpsc::UnboundedSender<AuditLogEntry>>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn DurableKeyValueStore>, gate: PressureGate, config: &AuditConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(config.capacity),
            capacity: config.capacity,
            persist_every: config.persist_every.max(1),
            max_field_chars: config.max_field_chars,
            max_persist_bytes: config.max_persist_bytes,
            appends_since_persist: 0,
            enabled: true,
            gate,
            store,
            forward_tx: None,
        }
    }

    /// Restore persisted entries, keeping the newest `capacity`
    pub fn load(&mut self) {
        let entries: Vec<AuditLogEntry> =
            storage::load_json(self.store.as_ref(), AUDIT_KEY).unwrap_or_default();
        self.entries = entries.into_iter().take(self.capacity).collect();
        self.appends_since_persist = 0;
        debug!("Loaded {} audit entries", self.entries.len());
    }

    /// Record an entry. Returns false when logging is disabled or the
    /// pressure gate rejected the write.
    pub fn log(
        &mut self,
        event_type: &str,
        level: AuditLevel,
        data: serde_json::Map<String, serde_json::Value>,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> bool {
        if !self.enabled || self.capacity == 0 {
            return false;
        }
        if !self.gate.admits() {
            return false;
        }

        let entry = AuditLogEntry {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            level,
            data: sanitize::sanitize_map(data, self.max_field_chars),
            user_id: user_id.map(String::from),
            session_id: session_id.map(String::from),
        };

        if level.is_escalated() {
            if let Some(ref tx) = self.forward_tx {
                if tx.send(entry.clone()).is_err() {
                    warn!("Audit forwarder is gone, dropping forward of '{}'", event_type);
                }
            }
        }

        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);

        self.appends_since_persist += 1;
        if self.appends_since_persist >= self.persist_every {
            if let Err(e) = self.persist() {
                warn!("{:#}", e);
            }
        }
        true
    }

    /// Write retained entries now
    pub fn flush(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.persist()
    }

    /// Serialize and write, halving retained entries until the blob fits.
    /// A rejected write clears memory and disables logging.
    fn persist(&mut self) -> Result<()> {
        self.appends_since_persist = 0;

        let mut json = self.serialize()?;
        while json.len() > self.max_persist_bytes && self.entries.len() > 1 {
            let keep = (self.entries.len() / 2).max(1);
            warn!(
                "Audit log is {} bytes (limit {}), keeping newest {} of {} entries",
                json.len(),
                self.max_persist_bytes,
                keep,
                self.entries.len()
            );
            self.entries.truncate(keep);
            json = self.serialize()?;
        }

        if let Err(e) = self.store.set(AUDIT_KEY, &json) {
            error!("Audit storage failed, disabling audit logging: {}", e);
            self.entries.clear();
            self.enabled = false;
            return Err(e).context("Failed to persist audit log");
        }
        debug!("Persisted {} audit entries", self.entries.len());
        Ok(())
    }

    fn serialize(&self) -> Result<String> {
        serde_json::to_string(&self.entries).context("Failed to serialize audit log")
    }

    /// Re-enable logging after a storage failure
    pub fn enable(&mut self) {
        if !self.enabled {
            info!("Audit logging re-enabled");
        }
        self.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Entries matching the filter, newest first
    pub fn get_logs(&self, filter: &AuditFilter) -> Vec<AuditLogEntry> {
        self.entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn export_logs(&self, format: ExportFormat, filter: &AuditFilter) -> Result<String> {
        export::export_entries(&self.get_logs(filter), format)
    }

    pub fn stats(&self) -> AuditStats {
        let mut by_level: BTreeMap<String, usize> = AuditLevel::ALL
            .iter()
            .map(|level| (level.to_string(), 0))
            .collect();
        for entry in &self.entries {
            *by_level.entry(entry.level.to_string()).or_default() += 1;
        }
        AuditStats {
            total: self.entries.len(),
            by_level,
            enabled: self.enabled,
            forwarding: self.forward_tx.is_some(),
        }
    }

    /// Drop every entry and the persisted blob
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.appends_since_persist = 0;
        self.store
            .remove(AUDIT_KEY)
            .context("Failed to remove audit log")?;
        info!("Cleared audit log");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Route escalated entries to a forwarding worker
    pub fn attach_forwarder(&mut self, tx: mpsc::UnboundedSender<AuditLogEntry>) {
        self.forward_tx = Some(tx);
    }

    /// Stop forwarding; dropping the sender lets the worker exit
    pub fn detach_forwarder(&mut self) {
        self.forward_tx = None;
    }
}
