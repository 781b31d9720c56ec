//! Follower state and the version watch producers read from.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::events::{EntityId, Event};

/// Progress of one follower: the last applied version and its timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowState {
    pub entity_id: EntityId,
    /// Version of the last applied event; 0 when nothing was applied yet
    pub version: u64,
    /// Timestamp of the last applied event
    pub timestamp: u64,
}

impl FollowState {
    /// Initial state for an entity with no snapshot.
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            version: 0,
            timestamp: 0,
        }
    }

    /// Advance version and timestamp without persisting.
    ///
    /// The caller is responsible for saving a snapshot afterwards.
    pub fn unsafe_update_version(&mut self, version: u64, timestamp: u64) {
        debug_assert!(
            version >= self.version,
            "state version must not move backwards"
        );
        self.version = version;
        self.timestamp = timestamp;
    }

    /// Advance to the given event.
    pub fn unsafe_update_to<E: Event + ?Sized>(&mut self, event: &E) {
        self.unsafe_update_version(event.version(), event.timestamp());
    }
}

/// Publisher half of the committed-state watch, owned by the reconciler.
#[derive(Debug)]
pub struct VersionPublisher {
    tx: watch::Sender<FollowState>,
}

/// Read-only view of the last committed state, cloned into producers.
#[derive(Debug, Clone)]
pub struct VersionWatch {
    rx: watch::Receiver<FollowState>,
}

/// Create a watch starting at `state`.
pub fn version_channel(state: FollowState) -> (VersionPublisher, VersionWatch) {
    let (tx, rx) = watch::channel(state);
    (VersionPublisher { tx }, VersionWatch { rx })
}

impl VersionPublisher {
    /// Publish a newly committed state. States that do not advance the
    /// version are ignored.
    pub fn publish(&self, state: &FollowState) {
        self.tx.send_if_modified(|current| {
            if state.version > current.version {
                *current = state.clone();
                true
            } else {
                false
            }
        });
    }

    pub fn subscribe(&self) -> VersionWatch {
        VersionWatch {
            rx: self.tx.subscribe(),
        }
    }
}

impl VersionWatch {
    /// Last committed version.
    pub fn current(&self) -> u64 {
        self.rx.borrow().version
    }

    /// Last committed state.
    pub fn snapshot(&self) -> FollowState {
        self.rx.borrow().clone()
    }

    /// Wait until the committed version reaches `version`.
    ///
    /// Returns `false` if the publisher went away first.
    pub async fn wait_for(&mut self, version: u64) -> bool {
        self.rx
            .wait_for(|current| current.version >= version)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_starts_at_zero() {
        let state = FollowState::new(EntityId::new("a"));
        assert_eq!(state.version, 0);
        assert_eq!(state.timestamp, 0);
    }

    #[test]
    fn test_unsafe_update_version() {
        let mut state = FollowState::new(EntityId::new("a"));
        state.unsafe_update_version(4, 1_000);
        assert_eq!(state.version, 4);
        assert_eq!(state.timestamp, 1_000);
    }

    fn at(version: u64) -> FollowState {
        let mut state = FollowState::new(EntityId::new("a"));
        state.unsafe_update_version(version, version * 100);
        state
    }

    #[test]
    fn test_publisher_ignores_lower_versions() {
        let (publisher, watch) = version_channel(at(5));
        publisher.publish(&at(3));
        assert_eq!(watch.current(), 5);
        publisher.publish(&at(8));
        assert_eq!(watch.current(), 8);
        assert_eq!(watch.snapshot().timestamp, 800);
    }

    #[tokio::test]
    async fn test_wait_for_version() {
        let (publisher, mut watch) = version_channel(at(0));
        let waiter = tokio::spawn(async move { watch.wait_for(2).await });
        publisher.publish(&at(1));
        publisher.publish(&at(2));
        assert!(waiter.await.unwrap());
    }

    #[test]
    fn test_state_json_shape() {
        let mut state = FollowState::new(EntityId::new("acct-1"));
        state.unsafe_update_version(2, 99);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["entity_id"], "acct-1");
        assert_eq!(json["version"], 2);
    }
}
