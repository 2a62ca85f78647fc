//! Automation rules
//!
//! User-defined shortcuts bound to a location prefix. When the user lands on
//! a matching location the runtime announces the rule's action to the
//! presentation layer. Rules are persisted as a JSON array.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::storage::{self, DurableKeyValueStore, AUTOMATION_KEY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRule {
    pub id: String,
    pub name: String,
    /// Location prefix that fires the rule
    pub trigger: String,
    pub action: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

/// Persisted rule registry
pub struct AutomationRules {
    rules: Vec<AutomationRule>,
    store: Arc<dyn DurableKeyValueStore>,
}

impl AutomationRules {
    pub fn new(store: Arc<dyn DurableKeyValueStore>) -> Self {
        Self {
            rules: Vec::new(),
            store,
        }
    }

    /// Restore persisted rules; a missing or corrupt blob leaves none
    pub fn load(&mut self) {
        self.rules = storage::load_json(self.store.as_ref(), AUTOMATION_KEY).unwrap_or_default();
        debug!("Loaded {} automation rules", self.rules.len());
    }

    /// Register a rule and persist. Returns the new rule's id.
    pub fn add(&mut self, name: &str, trigger: &str, action: &str) -> Result<String> {
        if trigger.trim().is_empty() {
            bail!("Automation rule '{}' needs a non-empty trigger", name);
        }

        let id = format!("rule-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        self.rules.push(AutomationRule {
            id: id.clone(),
            name: name.to_string(),
            trigger: trigger.to_string(),
            action: action.to_string(),
            enabled: true,
            created_at: Utc::now(),
        });
        self.persist()?;
        info!("Added automation rule {} ({})", id, name);
        Ok(id)
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        let Some(rule) = self.rules.iter_mut().find(|r| r.id == id) else {
            bail!("Automation rule not found: {}", id);
        };
        rule.enabled = enabled;
        self.persist()
    }

    /// Remove a rule. Returns false when no rule had that id.
    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != id);
        if self.rules.len() == before {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Enabled rules whose trigger prefixes `location`
    pub fn matching(&self, location: &str) -> Vec<&AutomationRule> {
        self.rules
            .iter()
            .filter(|r| r.enabled && location.starts_with(r.trigger.as_str()))
            .collect()
    }

    pub fn list(&self) -> &[AutomationRule] {
        &self.rules
    }

    pub fn count(&self) -> usize {
        self.rules.len()
    }

    pub fn enabled_count(&self) -> usize {
        self.rules.iter().filter(|r| r.enabled).count()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.rules.clear();
        self.store
            .remove(AUTOMATION_KEY)
            .context("Failed to remove automation rules")?;
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        storage::save_json(self.store.as_ref(), AUTOMATION_KEY, &self.rules)
            .context("Failed to write automation rules")
    }
}
