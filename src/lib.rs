//! Portal Telemetry - client-side usage learning, audit trail and offline replay
//!
//! A bounded event-capture pipeline for the citizen-services portal:
//! - Learns navigation, dwell time, interaction and error patterns
//! - Turns patterns into suggestions, predictions and optimization notes
//! - Keeps a sanitized, size-bounded audit trail with remote forwarding
//! - Queues failed mutating requests and replays them on reconnect
//! - Backs off under memory pressure instead of failing
//!
//! # Example
//!
//! ```ignore
//! use portal_telemetry::{ChannelEventSource, Telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let telemetry = Telemetry::builder(TelemetryConfig::load()?).build()?;
//!     let source = ChannelEventSource::new();
//!     let (_online_tx, online_rx) = tokio::sync::watch::channel(true);
//!     telemetry.init(&source, online_rx).await?;
//!     // ... emit events ...
//!     for s in telemetry.generate_suggestions().await {
//!         println!("{}", s.title);
//!     }
//!     telemetry.dispose().await
//! }
//! ```

// Leaf modules first
pub mod types;
pub mod config;
pub mod pressure;
pub mod storage;
pub mod events;
pub mod notify;

// Subsystems
pub mod learning;
pub mod audit;
pub mod offline;

pub mod runtime;
pub mod cli;

pub use audit::{AuditFilter, AuditLevel, AuditLog, AuditLogEntry, ExportFormat};
pub use config::TelemetryConfig;
pub use events::{ChannelEventSource, EventSource};
pub use learning::{
    BoundedEventContext, LearningCategory, LearningStore, PatternAnalyzer, SuggestionEngine,
};
pub use notify::{ChannelPresenter, LogPresenter, Notification, Presenter};
pub use offline::{NetworkTransport, OfflineOperationQueue, RequestDescriptor, SyncCoordinator};
pub use pressure::{ManualProbe, MeminfoProbe, PressureGate, ResourcePressureProbe};
pub use runtime::{Telemetry, TelemetryBuilder, TelemetryStats};
pub use storage::{DurableKeyValueStore, FileStore, MemoryStore, StoreError};
pub use types::{Event, EventKind, EventPayload};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Portal telemetry and offline resilience", NAME, VERSION)
}

/// Truncate to at most `max_chars` characters, ending with "..." when cut
pub fn truncate_safe(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars < 3 {
        return s.chars().take(max_chars).collect();
    }
    let mut out: String = s.chars().take(max_chars - 3).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_safe() {
        assert_eq!(truncate_safe("short", 10), "short");
        assert_eq!(truncate_safe("hello world foo bar", 10), "hello w...");
        assert_eq!(truncate_safe("ação ação ação", 8), "ação ...");
    }

    #[test]
    fn test_truncate_safe_tiny_limits() {
        assert_eq!(truncate_safe("abcdef", 3), "...");
        assert_eq!(truncate_safe("abcdef", 2), "ab");
        assert_eq!(truncate_safe("çãé", 1), "ç");
        assert_eq!(truncate_safe("abcdef", 0), "");
    }

    #[test]
    fn test_info() {
        assert!(info().starts_with("portal_telemetry v"));
    }
}
