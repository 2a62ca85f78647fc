//! Shared types used across modules
//!
//! Raw events delivered by the host application and the scalar values
//! carried by learning records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Discriminant of a raw event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Navigation,
    Click,
    FormInput,
    Error,
    NetworkCompleted,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Navigation => write!(f, "navigation"),
            EventKind::Click => write!(f, "click"),
            EventKind::FormInput => write!(f, "form_input"),
            EventKind::Error => write!(f, "error"),
            EventKind::NetworkCompleted => write!(f, "network_completed"),
        }
    }
}

/// What happened, as reported by the event source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// Route change inside the portal
    Navigation { from: String, to: String },
    /// Click on an element
    Click { target: String, location: String },
    /// Input into a form field
    FormInput {
        form: String,
        field: String,
        value: String,
        location: String,
    },
    /// Unhandled application error
    Error { message: String, source: String },
    /// A network call finished (successfully or not)
    NetworkCompleted {
        url: String,
        method: String,
        /// HTTP status, absent when the request never got a response
        status: Option<u16>,
        duration_ms: u64,
        ok: bool,
    },
}

/// A raw event. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// Create an event with an explicit timestamp
    pub fn at(payload: EventPayload, occurred_at: DateTime<Utc>) -> Self {
        Self { payload, occurred_at }
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Navigation { .. } => EventKind::Navigation,
            EventPayload::Click { .. } => EventKind::Click,
            EventPayload::FormInput { .. } => EventKind::FormInput,
            EventPayload::Error { .. } => EventKind::Error,
            EventPayload::NetworkCompleted { .. } => EventKind::NetworkCompleted,
        }
    }

    /// The surface the user was on when the event happened, if known
    pub fn location(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Navigation { to, .. } => Some(to),
            EventPayload::Click { location, .. } => Some(location),
            EventPayload::FormInput { location, .. } => Some(location),
            EventPayload::Error { .. } | EventPayload::NetworkCompleted { .. } => None,
        }
    }
}

/// A scalar value stored in a learning record field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar::Number(value as f64)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(value as f64)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// Field map of a learning record
pub type Fields = BTreeMap<String, Scalar>;

/// Build a field map from key/value pairs
pub fn fields<K, V, I>(pairs: I) -> Fields
where
    K: Into<String>,
    V: Into<Scalar>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_and_location() {
        let nav = Event::new(EventPayload::Navigation {
            from: "/".into(),
            to: "/protocolos".into(),
        });
        assert_eq!(nav.kind(), EventKind::Navigation);
        assert_eq!(nav.location(), Some("/protocolos"));

        let err = Event::new(EventPayload::Error {
            message: "boom".into(),
            source: "app".into(),
        });
        assert_eq!(err.kind(), EventKind::Error);
        assert_eq!(err.location(), None);
    }

    #[test]
    fn test_event_json_shape() {
        let json = r##"{"kind":"click","target":"#submit","location":"/peticao","occurred_at":"2026-01-05T10:00:00Z"}"##;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), EventKind::Click);
        assert_eq!(event.location(), Some("/peticao"));
    }

    #[test]
    fn test_scalar_untagged() {
        let f = fields([("page", Scalar::from("/a")), ("duration", Scalar::from(1200u64))]);
        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(json, r#"{"duration":1200.0,"page":"/a"}"#);
        let back: Fields = serde_json::from_str(&json).unwrap();
        assert_eq!(back["duration"].as_f64(), Some(1200.0));
        assert_eq!(back["page"].as_str(), Some("/a"));
    }
}
