//! Session and user state
//!
//! [`SessionContext`] is owned by the event manager and only mutated on the
//! coordination thread.

use crate::config::SdkConfig;
use crate::types::{EventRecord, Properties, PropertyValue};
use uuid::Uuid;

/// Outcome of a single user-property write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyWrite {
    /// New key stored
    Inserted,
    /// Existing key overwritten
    Updated,
    /// Dropped: map full, empty key, or a non-finite float
    Rejected,
}

/// Current session id, durable user id and user properties.
#[derive(Debug, Clone)]
pub struct SessionContext {
    session_id: String,
    user_id: String,
    user_properties: Properties,
    max_key_length: usize,
    max_property_count: usize,
}

impl SessionContext {
    /// Start a session for `user_id` with a freshly generated session id.
    pub fn start(user_id: impl Into<String>, limits: &SdkConfig) -> Self {
        Self {
            session_id: new_id(),
            user_id: user_id.into(),
            user_properties: Properties::new(),
            max_key_length: limits.max_event_name_length,
            max_property_count: limits.max_property_count,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn user_properties(&self) -> &Properties {
        &self.user_properties
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.user_properties.get(key)
    }

    /// Store a user property.
    ///
    /// Once the map holds the maximum number of entries every write is a
    /// no-op, including writes to keys already present. Nothing is evicted.
    /// Below the bound the key is truncated to the configured length.
    pub fn set_property(&mut self, key: &str, value: PropertyValue) -> PropertyWrite {
        if self.user_properties.len() >= self.max_property_count {
            tracing::debug!(
                key,
                max = self.max_property_count,
                "User property limit reached, ignoring write"
            );
            return PropertyWrite::Rejected;
        }
        if key.is_empty() {
            tracing::debug!("Ignoring user property with empty key");
            return PropertyWrite::Rejected;
        }
        // Would serialize as null and make every later event undecodable
        if !value.is_finite() {
            tracing::debug!(key, "Ignoring non-finite user property");
            return PropertyWrite::Rejected;
        }

        let key = truncate_chars(key, self.max_key_length);
        match self.user_properties.insert(key.to_string(), value) {
            Some(_) => PropertyWrite::Updated,
            None => PropertyWrite::Inserted,
        }
    }

    /// Build an event record carrying a snapshot of the current properties.
    ///
    /// `name` must already be validated and truncated by the caller.
    pub fn record(&self, name: &str, parameters: Option<Properties>) -> EventRecord {
        EventRecord::new(
            name,
            self.session_id.clone(),
            self.user_id.clone(),
            self.user_properties.clone(),
            parameters,
        )
    }
}

/// Generate a new random identifier (UUID v4, hyphenated).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
