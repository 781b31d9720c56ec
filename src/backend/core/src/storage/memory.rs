//! In-memory stores.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;

use super::{EventStorage, SnapshotStorage};
use crate::error::{FollowError, Result};
use crate::events::{EntityId, Event};
use crate::state::FollowState;

/// Event log kept in process memory, keyed by entity then version.
#[derive(Debug)]
pub struct InMemoryEventStorage<E> {
    streams: DashMap<EntityId, BTreeMap<u64, E>>,
}

impl<E> InMemoryEventStorage<E> {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    /// Highest stored version for an entity, 0 when the stream is empty.
    pub fn last_version(&self, entity_id: &EntityId) -> u64 {
        self.streams
            .get(entity_id)
            .and_then(|stream| stream.keys().next_back().copied())
            .unwrap_or(0)
    }
}

impl<E: Event + Clone> InMemoryEventStorage<E> {
    /// Append the next event of an entity's stream, rejecting gaps and
    /// rewrites.
    pub async fn append(&self, entity_id: &EntityId, event: &E) -> Result<()> {
        let mut stream = self.streams.entry(entity_id.clone()).or_default();
        let expected = stream.keys().next_back().copied().unwrap_or(0) + 1;
        if event.version() != expected {
            return Err(FollowError::validation(format!(
                "Expected version {} for entity {}, got {}",
                expected,
                entity_id,
                event.version()
            )));
        }
        stream.insert(event.version(), event.clone());
        Ok(())
    }
}

impl<E> Default for InMemoryEventStorage<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Event + Clone> EventStorage<E> for InMemoryEventStorage<E> {
    async fn get_list(
        &self,
        entity_id: &EntityId,
        from_exclusive: u64,
        to_inclusive: u64,
    ) -> Result<Vec<E>> {
        if from_exclusive >= to_inclusive {
            return Ok(Vec::new());
        }
        Ok(self
            .streams
            .get(entity_id)
            .map(|stream| {
                stream
                    .range(from_exclusive + 1..=to_inclusive)
                    .map(|(_, event)| event.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn record(&self, entity_id: &EntityId, event: &E) -> Result<()> {
        self.streams
            .entry(entity_id.clone())
            .or_default()
            .entry(event.version())
            .or_insert_with(|| event.clone());
        Ok(())
    }
}

/// Snapshot store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStorage {
    snapshots: DashMap<EntityId, FollowState>,
}

impl InMemorySnapshotStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait]
impl SnapshotStorage for InMemorySnapshotStorage {
    async fn get(&self, entity_id: &EntityId) -> Result<Option<FollowState>> {
        Ok(self.snapshots.get(entity_id).map(|s| s.clone()))
    }

    async fn save(&self, state: &FollowState) -> Result<()> {
        self.snapshots.insert(state.entity_id.clone(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::EventBase;

    #[derive(Debug, Clone, PartialEq)]
    struct Tick(EventBase);

    impl Event for Tick {
        fn version(&self) -> u64 {
            self.0.version
        }
        fn timestamp(&self) -> u64 {
            self.0.timestamp
        }
        fn event_type(&self) -> &'static str {
            "Tick"
        }
    }

    fn tick(version: u64) -> Tick {
        Tick(EventBase::new(version, version * 10))
    }

    #[tokio::test]
    async fn test_get_list_is_half_open_range() {
        let store = InMemoryEventStorage::new();
        let id = EntityId::new("e");
        for v in 1..=6 {
            store.append(&id, &tick(v)).await.unwrap();
        }

        let events = store.get_list(&id, 2, 5).await.unwrap();
        let versions: Vec<u64> = events.iter().map(|e| e.version()).collect();
        assert_eq!(versions, vec![3, 4, 5]);
        assert_eq!(store.last_version(&id), 6);
    }

    #[tokio::test]
    async fn test_get_list_unknown_entity_is_empty() {
        let store: InMemoryEventStorage<Tick> = InMemoryEventStorage::new();
        let events = store.get_list(&EntityId::new("none"), 0, 10).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_append_rejects_gaps() {
        let store = InMemoryEventStorage::new();
        let id = EntityId::new("e");
        store.append(&id, &tick(1)).await.unwrap();

        let err = store.append(&id, &tick(3)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_record_accepts_any_order_and_keeps_first_copy() {
        let store = InMemoryEventStorage::new();
        let id = EntityId::new("e");
        store.record(&id, &tick(3)).await.unwrap();
        store.record(&id, &tick(1)).await.unwrap();
        store.record(&id, &Tick(EventBase::new(3, 999))).await.unwrap();
        store.record(&id, &tick(2)).await.unwrap();

        let events = store.get_list(&id, 0, 3).await.unwrap();
        assert_eq!(events, vec![tick(1), tick(2), tick(3)]);
    }

    #[tokio::test]
    async fn test_snapshot_last_writer_wins() {
        let store = InMemorySnapshotStorage::new();
        let id = EntityId::new("e");
        assert!(store.get(&id).await.unwrap().is_none());

        let mut state = FollowState::new(id.clone());
        state.unsafe_update_version(1, 1);
        store.save(&state).await.unwrap();
        state.unsafe_update_version(2, 2);
        store.save(&state).await.unwrap();

        assert_eq!(store.get(&id).await.unwrap().unwrap().version, 2);
        assert_eq!(store.len(), 1);
    }
}
