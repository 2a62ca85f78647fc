//! Configuration management
//!
//! Capacities, batch sizes, pressure thresholds and replay timing for the
//! telemetry subsystem. Loaded from `config.toml` in the project config dir.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Resource pressure policy
    #[serde(default)]
    pub pressure: PressureConfig,
    /// Usage learning and suggestions
    #[serde(default)]
    pub learning: LearningConfig,
    /// Audit trail
    #[serde(default)]
    pub audit: AuditConfig,
    /// Offline queue and replay
    #[serde(default)]
    pub offline: OfflineConfig,
    /// Durable storage location
    #[serde(default)]
    pub storage: StorageConfig,
}

/// One threshold for every subsystem, with optional per-subsystem overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressureConfig {
    /// Pressure ratio above which writes are dropped
    #[serde(default = "default_pressure_threshold")]
    pub default_threshold: f64,
    /// Override for the learning store
    #[serde(default)]
    pub learning_threshold: Option<f64>,
    /// Override for the audit log
    #[serde(default)]
    pub audit_threshold: Option<f64>,
}

fn default_pressure_threshold() -> f64 {
    0.7
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_pressure_threshold(),
            learning_threshold: None,
            audit_threshold: None,
        }
    }
}

impl PressureConfig {
    pub fn learning(&self) -> f64 {
        self.learning_threshold.unwrap_or(self.default_threshold)
    }

    pub fn audit(&self) -> f64 {
        self.audit_threshold.unwrap_or(self.default_threshold)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Maximum records kept per category
    #[serde(default = "default_category_capacity")]
    pub category_capacity: usize,
    /// Size of the short-term event context
    #[serde(default = "default_context_capacity")]
    pub context_capacity: usize,
    /// Persist learning data after this many accepted records
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
    /// Mean dwell time above which a page counts as slow
    #[serde(default = "default_slow_page_threshold_ms")]
    pub slow_page_threshold_ms: f64,
    #[serde(default = "default_top_destinations")]
    pub top_destinations: usize,
    #[serde(default = "default_top_slow_pages")]
    pub top_slow_pages: usize,
    #[serde(default = "default_top_errors")]
    pub top_errors: usize,
    /// Edits to one form field before it is flagged as friction
    #[serde(default = "default_form_friction_threshold")]
    pub form_friction_threshold: usize,
    /// Route prefixes that always carry a form
    #[serde(default)]
    pub form_routes: Vec<String>,
}

fn default_category_capacity() -> usize {
    100
}

fn default_context_capacity() -> usize {
    10
}

fn default_flush_every() -> usize {
    10
}

fn default_slow_page_threshold_ms() -> f64 {
    5000.0
}

fn default_top_destinations() -> usize {
    5
}

fn default_top_slow_pages() -> usize {
    3
}

fn default_top_errors() -> usize {
    3
}

fn default_form_friction_threshold() -> usize {
    5
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            category_capacity: default_category_capacity(),
            context_capacity: default_context_capacity(),
            flush_every: default_flush_every(),
            slow_page_threshold_ms: default_slow_page_threshold_ms(),
            top_destinations: default_top_destinations(),
            top_slow_pages: default_top_slow_pages(),
            top_errors: default_top_errors(),
            form_friction_threshold: default_form_friction_threshold(),
            form_routes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Maximum entries kept in memory and on disk
    #[serde(default = "default_audit_capacity")]
    pub capacity: usize,
    /// Persist after this many appends
    #[serde(default = "default_persist_every")]
    pub persist_every: usize,
    /// Longest string kept in an entry's data
    #[serde(default = "default_max_field_chars")]
    pub max_field_chars: usize,
    /// Serialized size above which retained entries are halved before writing
    #[serde(default = "default_max_persist_bytes")]
    pub max_persist_bytes: usize,
    /// Remote endpoint receiving critical and security entries
    #[serde(default)]
    pub forward_endpoint: Option<String>,
}

fn default_audit_capacity() -> usize {
    10
}

fn default_persist_every() -> usize {
    5
}

fn default_max_field_chars() -> usize {
    1000
}

fn default_max_persist_bytes() -> usize {
    1024 * 1024
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: default_audit_capacity(),
            persist_every: default_persist_every(),
            max_field_chars: default_max_field_chars(),
            max_persist_bytes: default_max_persist_bytes(),
            forward_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Timeout for each replayed request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retry cadence while online with queued operations
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Base URL for relative request targets
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_retry_interval_secs() -> u64 {
    60
}

impl OfflineConfig {
    /// Per-request replay timeout, never zero
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Retry cadence, never zero
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            retry_interval_secs: default_retry_interval_secs(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for persisted blobs (defaults to the project data dir)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl TelemetryConfig {
    /// Load configuration from the default location, writing defaults if absent
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = TelemetryConfig::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: TelemetryConfig = toml::from_str(&contents)
            .context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .context("Failed to write config file")?;
        Ok(())
    }

    /// Directory for persisted blobs
    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => data_dir(),
        }
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("br", "portal-cidadao", "portal-telemetry")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("br", "portal-cidadao", "portal-telemetry")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = TelemetryConfig::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}
