//! Registry of active followers, one per entity.
//!
//! Followers are activated on first access and deactivated after sitting idle
//! longer than the configured idle timeout. Activation is serialized so an
//! entity never ends up with two followers (and two consumer tasks) at once.
//! A follower being drained keeps its entity marked until its consumer has
//! finished; activations of that entity wait for the drain, other entities
//! are not held up by it.

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, FollowError, Result};
use crate::events::{EntityId, Event};
use crate::follower::{ConcurrentFollower, FollowerDeps};
use crate::state::FollowState;
use crate::telemetry::metrics::ACTIVE_FOLLOWERS;

struct Entry<E: Event> {
    follower: Arc<ConcurrentFollower<E>>,
    last_access: SyncMutex<Instant>,
}

impl<E: Event> Entry<E> {
    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }
}

/// Clears an entity's drain marker once its follower has been torn down,
/// including when the deactivating future is dropped midway.
struct Draining<'a> {
    markers: &'a DashMap<EntityId, CancellationToken>,
    entity_id: EntityId,
    done: CancellationToken,
}

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        self.markers.remove(&self.entity_id);
        self.done.cancel();
    }
}

/// Maps entity identity to its active follower.
pub struct FollowerRegistry<E: Event> {
    deps: FollowerDeps<E>,
    followers: DashMap<EntityId, Arc<Entry<E>>>,
    draining: DashMap<EntityId, CancellationToken>,
    activation: Mutex<()>,
    shutdown: CancellationToken,
    eviction: SyncMutex<Option<JoinHandle<()>>>,
}

impl<E: Event> FollowerRegistry<E> {
    pub fn new(deps: FollowerDeps<E>) -> Self {
        Self {
            deps,
            followers: DashMap::new(),
            draining: DashMap::new(),
            activation: Mutex::new(()),
            shutdown: CancellationToken::new(),
            eviction: SyncMutex::new(None),
        }
    }

    /// Number of active followers.
    pub fn len(&self) -> usize {
        self.followers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.followers.is_empty()
    }

    /// Active follower for an entity, without activating one.
    pub fn get(&self, entity_id: &EntityId) -> Option<Arc<ConcurrentFollower<E>>> {
        self.followers.get(entity_id).map(|entry| {
            entry.touch();
            Arc::clone(&entry.follower)
        })
    }

    /// Active follower for an entity, activating it if needed.
    pub async fn get_or_activate(&self, entity_id: &EntityId) -> Result<Arc<ConcurrentFollower<E>>> {
        loop {
            if let Some(follower) = self.get(entity_id) {
                return Ok(follower);
            }

            let guard = self.activation.lock().await;
            // Another caller may have activated it while we waited.
            if let Some(follower) = self.get(entity_id) {
                return Ok(follower);
            }
            if self.shutdown.is_cancelled() {
                return Err(FollowError::channel_unavailable(entity_id)
                    .with_context("reason", "registry shut down"));
            }

            let drained = self.draining.get(entity_id).map(|marker| marker.clone());
            if let Some(drained) = drained {
                drop(guard);
                drained.cancelled().await;
                continue;
            }

            let follower =
                Arc::new(ConcurrentFollower::activate(entity_id.clone(), self.deps.clone()).await?);
            self.followers.insert(
                entity_id.clone(),
                Arc::new(Entry {
                    follower: Arc::clone(&follower),
                    last_access: SyncMutex::new(Instant::now()),
                }),
            );
            metrics::gauge!(ACTIVE_FOLLOWERS).set(self.followers.len() as f64);

            return Ok(follower);
        }
    }

    /// Whether the entity currently has an active follower.
    pub fn is_active(&self, entity_id: &EntityId) -> bool {
        self.followers.contains_key(entity_id)
    }

    /// Committed state of an entity: from its follower when active, otherwise
    /// from the snapshot store.
    pub async fn committed_state(&self, entity_id: &EntityId) -> Result<Option<FollowState>> {
        let active = self
            .followers
            .get(entity_id)
            .map(|entry| entry.follower.state());
        match active {
            Some(state) => Ok(Some(state)),
            None => self.deps.snapshot_storage.get(entity_id).await,
        }
    }

    /// Route an envelope to the entity's follower.
    ///
    /// Returns the follower that accepted the event.
    pub async fn notify(
        &self,
        entity_id: &EntityId,
        envelope: &[u8],
    ) -> Result<Arc<ConcurrentFollower<E>>> {
        self.route(entity_id, envelope, false).await
    }

    /// Route an envelope and wait for its completion.
    pub async fn notify_confirmed(
        &self,
        entity_id: &EntityId,
        envelope: &[u8],
    ) -> Result<Arc<ConcurrentFollower<E>>> {
        self.route(entity_id, envelope, true).await
    }

    async fn route(
        &self,
        entity_id: &EntityId,
        envelope: &[u8],
        confirmed: bool,
    ) -> Result<Arc<ConcurrentFollower<E>>> {
        let mut reactivated = false;
        loop {
            let follower = self.get_or_activate(entity_id).await?;
            let result = if confirmed {
                follower.notify_confirmed(envelope).await
            } else {
                follower.notify(envelope).await
            };

            match result {
                Ok(()) => return Ok(follower),
                // The follower was torn down between lookup and write.
                Err(e)
                    if !reactivated
                        && e.code() == ErrorCode::ChannelUnavailable
                        && !follower.is_active() =>
                {
                    reactivated = true;
                    self.followers
                        .remove_if(entity_id, |_, entry| Arc::ptr_eq(&entry.follower, &follower));
                    tracing::debug!(entity_id = %entity_id, "Follower deactivated during notify, reactivating");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Deactivate one follower and return its final state.
    pub async fn deactivate(&self, entity_id: &EntityId) -> Result<FollowState> {
        match self.deactivate_if_idle(entity_id, None).await {
            Some(result) => result,
            None => Err(FollowError::entity_not_found(entity_id)),
        }
    }

    /// Remove the entity's follower (only when idle for at least
    /// `idle_timeout`, if given) and drain it. `None` when nothing was removed.
    async fn deactivate_if_idle(
        &self,
        entity_id: &EntityId,
        idle_timeout: Option<Duration>,
    ) -> Option<Result<FollowState>> {
        let (entry, _draining) = {
            let _guard = self.activation.lock().await;
            let (_, entry) = match idle_timeout {
                Some(timeout) => self
                    .followers
                    .remove_if(entity_id, |_, entry| entry.idle_for() >= timeout)?,
                None => self.followers.remove(entity_id)?,
            };
            let done = CancellationToken::new();
            self.draining.insert(entity_id.clone(), done.clone());
            metrics::gauge!(ACTIVE_FOLLOWERS).set(self.followers.len() as f64);

            let draining = Draining {
                markers: &self.draining,
                entity_id: entity_id.clone(),
                done,
            };
            (entry, draining)
        };

        Some(entry.follower.deactivate().await)
    }

    /// Deactivate every follower idle for at least `idle_timeout`.
    ///
    /// Returns the number of followers deactivated.
    pub async fn evict_idle(&self, idle_timeout: Duration) -> usize {
        let idle: Vec<EntityId> = self
            .followers
            .iter()
            .filter(|entry| entry.value().idle_for() >= idle_timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for entity_id in idle {
            match self.deactivate_if_idle(&entity_id, Some(idle_timeout)).await {
                Some(Ok(state)) => {
                    evicted += 1;
                    tracing::debug!(entity_id = %entity_id, version = state.version, "Evicted idle follower");
                }
                Some(Err(e)) => {
                    evicted += 1;
                    tracing::warn!(entity_id = %entity_id, error = %e, "Failed to drain evicted follower");
                }
                None => {
                    tracing::trace!(entity_id = %entity_id, "Follower used again before eviction");
                }
            }
        }
        evicted
    }

    /// Start the periodic idle eviction task. Calling it again is a no-op.
    pub fn start_eviction(self: &Arc<Self>) {
        let mut slot = self.eviction.lock();
        if slot.is_some() {
            return;
        }

        let registry = Arc::clone(self);
        let interval = self.deps.config.eviction_interval().max(Duration::from_secs(1));
        let idle_timeout = self.deps.config.idle_timeout();
        let shutdown = self.shutdown.clone();

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = registry.evict_idle(idle_timeout).await;
                        if evicted > 0 {
                            tracing::info!(evicted, active = registry.len(), "Idle followers evicted");
                        }
                    }
                }
            }
        }));
    }

    /// Stop eviction and deactivate every follower.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let eviction = self.eviction.lock().take();
        if let Some(handle) = eviction {
            let _ = handle.await;
        }

        let entity_ids: Vec<EntityId> = self.followers.iter().map(|e| e.key().clone()).collect();
        let count = entity_ids.len();
        let drains = entity_ids.iter().map(|entity_id| async move {
            if let Err(e) = self.deactivate(entity_id).await {
                tracing::warn!(entity_id = %entity_id, error = %e, "Failed to deactivate follower");
            }
        });
        futures::future::join_all(drains).await;

        tracing::info!(count, "Follower registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FollowerConfig;
    use crate::events::{EventBase, EventTypeRegistry};
    use crate::handler::NoopHandler;
    use crate::storage::{InMemoryEventStorage, InMemorySnapshotStorage};

    #[derive(Debug, Clone)]
    struct Noted(EventBase);

    impl Event for Noted {
        fn version(&self) -> u64 {
            self.0.version
        }
        fn timestamp(&self) -> u64 {
            self.0.timestamp
        }
        fn event_type(&self) -> &'static str {
            "Noted"
        }
    }

    fn registry() -> Arc<FollowerRegistry<Noted>> {
        Arc::new(FollowerRegistry::new(FollowerDeps {
            types: Arc::new(EventTypeRegistry::new()),
            event_storage: Arc::new(InMemoryEventStorage::new()),
            snapshot_storage: Arc::new(InMemorySnapshotStorage::new()),
            handler: Arc::new(NoopHandler),
            config: FollowerConfig::default(),
        }))
    }

    #[tokio::test]
    async fn test_concurrent_activation_yields_one_follower() {
        let registry = registry();
        let id = EntityId::new("x");

        let (a, b) = tokio::join!(registry.get_or_activate(&id), registry.get_or_activate(&id));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_deactivate_unknown_entity() {
        let registry = registry();
        let err = registry.deactivate(&EntityId::new("nope")).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::EntityNotFound);
    }

    #[tokio::test]
    async fn test_evict_idle_with_zero_timeout() {
        let registry = registry();
        registry.get_or_activate(&EntityId::new("a")).await.unwrap();
        registry.get_or_activate(&EntityId::new("b")).await.unwrap();

        assert_eq!(registry.evict_idle(Duration::ZERO).await, 2);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_used_after_idle_scan_is_not_evicted() {
        let registry = registry();
        let id = EntityId::new("a");
        registry.get_or_activate(&id).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;

        // Picked as idle by a scan, then used before its removal.
        registry.get(&id).unwrap();
        assert!(registry
            .deactivate_if_idle(&id, Some(Duration::from_secs(5)))
            .await
            .is_none());
        assert!(registry.is_active(&id));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(registry.evict_idle(Duration::from_secs(5)).await, 1);
        assert!(!registry.is_active(&id));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_activations() {
        let registry = registry();
        registry.start_eviction();
        registry.get_or_activate(&EntityId::new("a")).await.unwrap();

        registry.shutdown().await;
        assert!(registry.is_empty());
        assert!(registry.get_or_activate(&EntityId::new("b")).await.is_err());
    }
}
