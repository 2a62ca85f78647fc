//! Learning Store - capped per-category usage history
//!
//! Keeps five disjoint categories of learning records, each a FIFO list
//! capped at a fixed size, and persists the whole map as one JSON blob.
//! Writes are gated on resource pressure and dropped silently when the
//! host is under load.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::pressure::PressureGate;
use crate::storage::{self, DurableKeyValueStore, LEARNING_KEY};
use crate::types::{Fields, Scalar};

/// Category of a learning record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LearningCategory {
    Navigation,
    PageTime,
    Interactions,
    FormInteractions,
    Errors,
}

impl LearningCategory {
    pub const ALL: [LearningCategory; 5] = [
        LearningCategory::Navigation,
        LearningCategory::PageTime,
        LearningCategory::Interactions,
        LearningCategory::FormInteractions,
        LearningCategory::Errors,
    ];
}

impl std::fmt::Display for LearningCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LearningCategory::Navigation => write!(f, "navigation"),
            LearningCategory::PageTime => write!(f, "pageTime"),
            LearningCategory::Interactions => write!(f, "interactions"),
            LearningCategory::FormInteractions => write!(f, "formInteractions"),
            LearningCategory::Errors => write!(f, "errors"),
        }
    }
}

/// A single learning record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningRecord {
    pub category: LearningCategory,
    pub fields: Fields,
    pub occurred_at: DateTime<Utc>,
}

impl LearningRecord {
    pub fn new(category: LearningCategory, fields: Fields, occurred_at: DateTime<Utc>) -> Self {
        Self {
            category,
            fields,
            occurred_at,
        }
    }

    /// Text value of a field
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Scalar::as_str)
    }

    /// Numeric value of a field
    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Scalar::as_f64)
    }
}

/// Persisted shape of the learning data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningData {
    #[serde(default)]
    pub navigation: VecDeque<LearningRecord>,
    #[serde(default)]
    pub page_time: VecDeque<LearningRecord>,
    #[serde(default)]
    pub interactions: VecDeque<LearningRecord>,
    #[serde(default)]
    pub form_interactions: VecDeque<LearningRecord>,
    #[serde(default)]
    pub errors: VecDeque<LearningRecord>,
}

impl LearningData {
    /// Records of one category, oldest first
    pub fn category(&self, category: LearningCategory) -> &VecDeque<LearningRecord> {
        match category {
            LearningCategory::Navigation => &self.navigation,
            LearningCategory::PageTime => &self.page_time,
            LearningCategory::Interactions => &self.interactions,
            LearningCategory::FormInteractions => &self.form_interactions,
            LearningCategory::Errors => &self.errors,
        }
    }

    fn category_mut(&mut self, category: LearningCategory) -> &mut VecDeque<LearningRecord> {
        match category {
            LearningCategory::Navigation => &mut self.navigation,
            LearningCategory::PageTime => &mut self.page_time,
            LearningCategory::Interactions => &mut self.interactions,
            LearningCategory::FormInteractions => &mut self.form_interactions,
            LearningCategory::Errors => &mut self.errors,
        }
    }

    pub fn total(&self) -> usize {
        LearningCategory::ALL
            .iter()
            .map(|c| self.category(*c).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Drop the oldest records of every category beyond `capacity`
    fn enforce_capacity(&mut self, capacity: usize) {
        for category in LearningCategory::ALL {
            let records = self.category_mut(category);
            while records.len() > capacity {
                records.pop_front();
            }
        }
    }
}

/// Capped, persisted usage history
pub struct LearningStore {
    data: LearningData,
    capacity: usize,
    /// Persist after this many accepted writes
    flush_every: usize,
    pending_writes: usize,
    gate: PressureGate,
    store: Arc<dyn DurableKeyValueStore>,
}

impl LearningStore {
    /// Create an empty store; call [`LearningStore::load`] to restore persisted data
    pub fn new(
        store: Arc<dyn DurableKeyValueStore>,
        gate: PressureGate,
        capacity: usize,
        flush_every: usize,
    ) -> Self {
        Self {
            data: LearningData::default(),
            capacity,
            flush_every: flush_every.max(1),
            pending_writes: 0,
            gate,
            store,
        }
    }

    /// Restore persisted data. A missing or corrupt blob leaves the store empty.
    pub fn load(&mut self) {
        self.data = storage::load_json::<LearningData>(self.store.as_ref(), LEARNING_KEY)
            .unwrap_or_default();
        self.data.enforce_capacity(self.capacity);
        self.pending_writes = 0;
        debug!("Loaded {} learning records", self.data.total());
    }

    /// Whether the pressure gate currently admits writes
    pub fn admits(&self) -> bool {
        self.gate.admits()
    }

    /// Append a record stamped now. Returns false when the write was dropped.
    pub fn record(&mut self, category: LearningCategory, fields: Fields) -> bool {
        self.record_at(category, fields, Utc::now())
    }

    /// Append a record with an explicit timestamp
    pub fn record_at(
        &mut self,
        category: LearningCategory,
        fields: Fields,
        occurred_at: DateTime<Utc>,
    ) -> bool {
        if !self.gate.admits() {
            return false;
        }

        let capacity = self.capacity;
        let records = self.data.category_mut(category);
        records.push_back(LearningRecord::new(category, fields, occurred_at));
        while records.len() > capacity {
            records.pop_front();
        }

        self.pending_writes += 1;
        if self.pending_writes >= self.flush_every {
            if let Err(e) = self.flush() {
                warn!("Failed to persist learning data: {:#}", e);
            }
        }
        true
    }

    /// Persist the whole category map
    pub fn flush(&mut self) -> Result<()> {
        self.pending_writes = 0;
        storage::save_json(self.store.as_ref(), LEARNING_KEY, &self.data)
            .context("Failed to write learning data")?;
        debug!("Persisted {} learning records", self.data.total());
        Ok(())
    }

    /// Empty every category and delete the persisted blob
    pub fn clear(&mut self) -> Result<()> {
        self.data = LearningData::default();
        self.pending_writes = 0;
        self.store
            .remove(LEARNING_KEY)
            .context("Failed to remove learning data")?;
        info!("Cleared learning data");
        Ok(())
    }

    /// Records of one category, oldest first
    pub fn records(&self, category: LearningCategory) -> &VecDeque<LearningRecord> {
        self.data.category(category)
    }

    pub fn len(&self, category: LearningCategory) -> usize {
        self.data.category(category).len()
    }

    pub fn data(&self) -> &LearningData {
        &self.data
    }

    /// Owned copy for analysis
    pub fn snapshot(&self) -> LearningData {
        self.data.clone()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Writes accepted since the last flush
    pub fn pending_writes(&self) -> usize {
        self.pending_writes
    }
}
