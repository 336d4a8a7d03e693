//! Core domain types for gameevents
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | One run of the host from `initialize` until process exit; fresh id each time |
//! | **User id** | Per-installation id, generated once and persisted by the store |
//! | **User property** | Scalar attribute copied into every event of the session |
//! | **Event property** | Caller-supplied scalar attached to a single event |
//! | **Flush** | Handing buffered events from local storage to the deliverer |
//! | **Attribution** | Backend lookup tying an install to its marketing source |

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================
// Property values
// ============================================

/// A scalar user or event property.
///
/// Serialized untagged so the wire shape is a plain JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// False for NaN and infinite floats, which JSON cannot carry.
    pub fn is_finite(&self) -> bool {
        match self {
            PropertyValue::Float(x) => x.is_finite(),
            _ => true,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Int(i) => write!(f, "{}", i),
            PropertyValue::Float(x) => write!(f, "{}", x),
            PropertyValue::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(value.into())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Int(value.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

/// Property map, ordered by key so serialized events are stable.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Build a [`Properties`] map from key/value pairs.
///
/// ```
/// use gameevents_core::types::properties;
///
/// let props = properties([("level_name", "Level 1".into()), ("score", 100.into())]);
/// assert_eq!(props.len(), 2);
/// ```
pub fn properties<K, I>(pairs: I) -> Properties
where
    K: Into<String>,
    I: IntoIterator<Item = (K, PropertyValue)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

// ============================================
// Event records
// ============================================

/// Well-known event names emitted by the client itself.
pub mod event_names {
    pub const SESSION_START: &str = "session_start";
    pub const APP_EXCEPTION: &str = "app_exception";
}

/// Well-known user property keys set by the identifier flow.
pub mod property_keys {
    pub const ADVERTISING_ID: &str = "ua_advertising_id";
    pub const TRACKING_ENABLED: &str = "ua_tracking_enabled";
}

/// One captured event, as handed to the event store.
///
/// Field order matches the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event name, already truncated to the configured bound
    pub event: String,
    pub session_id: String,
    pub user_id: String,
    /// Seconds since the Unix epoch (UTC)
    pub time: i64,
    /// Snapshot of the session's user properties at creation time
    pub user_properties: Properties,
    /// Caller-supplied parameters, absent when none were given
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event_properties: Option<Properties>,
}

impl EventRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        event: impl Into<String>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        user_properties: Properties,
        event_properties: Option<Properties>,
    ) -> Self {
        Self {
            event: event.into(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            time: Utc::now().timestamp(),
            user_properties,
            event_properties,
        }
    }
}

/// An event persisted by the local store, as leased to the deliverer.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    /// Local row id, used to acknowledge or release the event
    pub id: i64,
    pub record: EventRecord,
    /// Number of failed delivery attempts so far
    pub attempts: u32,
}

// ============================================
// Host log signals
// ============================================

/// Severity of a log message observed from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Log,
    Warning,
    Error,
    Assert,
    Exception,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Log => "Log",
            LogLevel::Warning => "Warning",
            LogLevel::Error => "Error",
            LogLevel::Assert => "Assert",
            LogLevel::Exception => "Exception",
        }
    }

    /// Whether a message at this level produces an `app_exception` event
    pub fn is_captured(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Assert | LogLevel::Exception)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A log message observed from the host (error log, assertion, panic).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSignal {
    pub condition: String,
    pub stack_trace: String,
    pub level: LogLevel,
}

impl LogSignal {
    pub fn new(
        condition: impl Into<String>,
        stack_trace: impl Into<String>,
        level: LogLevel,
    ) -> Self {
        Self {
            condition: condition.into(),
            stack_trace: stack_trace.into(),
            level,
        }
    }
}

// ============================================
// Tracking authorization
// ============================================

/// App-tracking authorization status reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TrackingStatus {
    NotDetermined = 0,
    Restricted = 1,
    Denied = 2,
    Authorized = 3,
}

impl TrackingStatus {
    /// Numeric status code exposed through the public callback
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(TrackingStatus::NotDetermined),
            1 => Some(TrackingStatus::Restricted),
            2 => Some(TrackingStatus::Denied),
            3 => Some(TrackingStatus::Authorized),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_record_wire_shape() {
        let record = EventRecord {
            event: "level_complete".to_string(),
            session_id: "s-1".to_string(),
            user_id: "u-1".to_string(),
            time: 1_700_000_000,
            user_properties: properties([("is_premium", true.into())]),
            event_properties: Some(properties([
                ("level_name", "Level 1".into()),
                ("score", 100.into()),
            ])),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "level_complete");
        assert_eq!(json["time"], 1_700_000_000);
        assert_eq!(json["user_properties"]["is_premium"], true);
        assert_eq!(json["event_properties"]["score"], 100);
        assert_eq!(json["event_properties"]["level_name"], "Level 1");
    }

    #[test]
    fn test_event_properties_omitted_when_absent() {
        let record = EventRecord::new("game_started", "s", "u", Properties::new(), None);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("event_properties").is_none());
        assert!(record.time > 0);
    }

    #[test]
    fn test_property_value_untagged_round_shape() {
        let props: Properties =
            serde_json::from_str(r#"{"a": true, "b": 5, "c": 1.5, "d": "x"}"#).unwrap();
        assert_eq!(props["a"], PropertyValue::Bool(true));
        assert_eq!(props["b"], PropertyValue::Int(5));
        assert_eq!(props["c"], PropertyValue::Float(1.5));
        assert_eq!(props["d"], PropertyValue::String("x".to_string()));
    }

    #[test]
    fn test_non_finite_floats_flagged() {
        assert!(PropertyValue::Float(1.5).is_finite());
        assert!(PropertyValue::Int(i64::MAX).is_finite());
        assert!(PropertyValue::String("NaN".to_string()).is_finite());
        assert!(!PropertyValue::Float(f64::NAN).is_finite());
        assert!(!PropertyValue::Float(f64::NEG_INFINITY).is_finite());
    }

    #[test]
    fn test_log_level_capture() {
        assert!(LogLevel::Exception.is_captured());
        assert!(LogLevel::Error.is_captured());
        assert!(LogLevel::Assert.is_captured());
        assert!(!LogLevel::Warning.is_captured());
        assert!(!LogLevel::Log.is_captured());
    }

    #[test]
    fn test_tracking_status_codes() {
        assert_eq!(TrackingStatus::NotDetermined.code(), 0);
        assert_eq!(TrackingStatus::Authorized.code(), 3);
        assert_eq!(TrackingStatus::from_code(2), Some(TrackingStatus::Denied));
        assert_eq!(TrackingStatus::from_code(7), None);
    }
}
