//! Audit trail
//!
//! Sanitized, size-bounded record of security-relevant activity: network
//! calls, interactions, form activity and application errors. Critical and
//! security entries can be forwarded to a remote collector.

pub mod export;
pub mod forward;
pub mod log;
pub mod sanitize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use export::ExportFormat;
pub use forward::{spawn_forwarder, AuditForwarder, HttpForwarder};
pub use log::{AuditLog, AuditStats};

/// Severity of an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
    Critical,
    Security,
}

impl AuditLevel {
    pub const ALL: [AuditLevel; 5] = [
        AuditLevel::Info,
        AuditLevel::Warning,
        AuditLevel::Error,
        AuditLevel::Critical,
        AuditLevel::Security,
    ];

    /// Levels pushed to the remote forwarder
    pub fn is_escalated(&self) -> bool {
        matches!(self, AuditLevel::Critical | AuditLevel::Security)
    }
}

impl std::fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditLevel::Info => write!(f, "info"),
            AuditLevel::Warning => write!(f, "warning"),
            AuditLevel::Error => write!(f, "error"),
            AuditLevel::Critical => write!(f, "critical"),
            AuditLevel::Security => write!(f, "security"),
        }
    }
}

impl std::str::FromStr for AuditLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditLevel::ALL
            .into_iter()
            .find(|level| level.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown audit level: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub level: AuditLevel,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Query over audit entries. Empty fields match everything; the time range
/// is inclusive on both ends.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event_type: Option<String>,
    pub level: Option<AuditLevel>,
    pub user_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(ref t) = self.event_type {
            if &entry.event_type != t {
                return false;
            }
        }
        if let Some(level) = self.level {
            if entry.level != level {
                return false;
            }
        }
        if let Some(ref user) = self.user_id {
            if entry.user_id.as_deref() != Some(user.as_str()) {
                return false;
            }
        }
        if self.since.is_some_and(|since| entry.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| entry.timestamp > until) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(event_type: &str, level: AuditLevel, user: Option<&str>) -> AuditLogEntry {
        AuditLogEntry {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            level,
            data: serde_json::Map::new(),
            user_id: user.map(String::from),
            session_id: None,
        }
    }

    #[test]
    fn test_level_parse_and_display() {
        assert_eq!("SECURITY".parse::<AuditLevel>().unwrap(), AuditLevel::Security);
        assert_eq!(AuditLevel::Warning.to_string(), "warning");
        assert!("fatal".parse::<AuditLevel>().is_err());
        assert!(AuditLevel::Critical.is_escalated());
        assert!(!AuditLevel::Error.is_escalated());
    }

    #[test]
    fn test_entry_wire_shape() {
        let json = serde_json::to_value(entry("login", AuditLevel::Info, Some("u1"))).unwrap();
        assert_eq!(json["type"], "login");
        assert_eq!(json["level"], "info");
        assert_eq!(json["userId"], "u1");
        assert!(json.get("sessionId").is_some());
    }

    #[test]
    fn test_filter() {
        let e = entry("network_request", AuditLevel::Warning, Some("u1"));

        assert!(AuditFilter::default().matches(&e));
        assert!(AuditFilter {
            level: Some(AuditLevel::Warning),
            user_id: Some("u1".into()),
            ..Default::default()
        }
        .matches(&e));
        assert!(!AuditFilter {
            event_type: Some("login".into()),
            ..Default::default()
        }
        .matches(&e));

        let inclusive = AuditFilter {
            since: Some(e.timestamp),
            until: Some(e.timestamp),
            ..Default::default()
        };
        assert!(inclusive.matches(&e));

        let later = AuditFilter {
            since: Some(e.timestamp + Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!later.matches(&e));
    }
}
