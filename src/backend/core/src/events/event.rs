//! Versioned events and entity identity.
//!
//! This module provides:
//! - `EntityId`, the identity of one independent event stream
//! - `Event`, the trait every deliverable event implements
//! - `EventBase`, the version/timestamp pair concrete events embed

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Entity IDs
// =============================================================================

/// Identity of an entity: one event stream, one follower, one state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Event Trait
// =============================================================================

/// Trait for versioned domain events.
///
/// Versions for one entity are strictly increasing and gapless in the durable
/// log. Events are immutable once created and are shared between the consumer
/// loop and handler tasks behind an `Arc`.
pub trait Event: Send + Sync + fmt::Debug + 'static {
    /// Position of this event in its entity's stream.
    fn version(&self) -> u64;

    /// When the event occurred, in milliseconds since the Unix epoch.
    fn timestamp(&self) -> u64;

    /// Registered type name, as carried in the envelope.
    fn event_type(&self) -> &'static str;

    /// Entity the event belongs to, when the payload names one. Followers
    /// refuse events naming another entity.
    fn entity_id(&self) -> Option<&EntityId> {
        None
    }
}

// =============================================================================
// Event Base
// =============================================================================

/// Version and timestamp shared by every concrete event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBase {
    pub version: u64,
    pub timestamp: u64,
}

impl EventBase {
    pub fn new(version: u64, timestamp: u64) -> Self {
        Self { version, timestamp }
    }

    /// Stamp an event with the current wall clock.
    pub fn now(version: u64) -> Self {
        Self {
            version,
            timestamp: now_millis(),
        }
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_display() {
        let id = EntityId::new("account-42");
        assert_eq!(id.to_string(), "account-42");
        assert_eq!(id.as_str(), "account-42");
        assert_eq!(EntityId::from("account-42"), id);
    }

    #[test]
    fn test_entity_id_serializes_transparently() {
        let id = EntityId::new("a-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"a-1\"");
    }

    #[test]
    fn test_event_base_now_is_stamped() {
        let base = EventBase::now(7);
        assert_eq!(base.version, 7);
        assert!(base.timestamp > 0);
    }
}
