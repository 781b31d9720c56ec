//! Per-entity follower: producer ingress in front of a batch reconciler.
//!
//! A follower is activated for one entity. Activation loads the last snapshot
//! and starts the single consumer task that owns the reconciler. Producers call
//! [`ConcurrentFollower::notify`] or [`ConcurrentFollower::tell`] from any
//! task; events already reflected in the committed version are acknowledged
//! without being enqueued.

use std::fmt;
use std::sync::Arc;

use crate::channel::{ChannelConfig, ChannelStats, MpscChannel};
use crate::completion::Completion;
use crate::config::FollowerConfig;
use crate::error::{FollowError, Result};
use crate::events::{EntityId, Event, EventTypeRegistry};
use crate::handler::EventHandler;
use crate::reconciler::{BatchReconciler, PendingEvent};
use crate::state::{FollowState, VersionWatch};
use crate::storage::{EventStorage, SnapshotStorage};
use crate::telemetry::metrics::STALE_EVENTS_TOTAL;

/// Everything a follower needs, injected at activation.
pub struct FollowerDeps<E: Event> {
    pub types: Arc<EventTypeRegistry<E>>,
    pub event_storage: Arc<dyn EventStorage<E>>,
    pub snapshot_storage: Arc<dyn SnapshotStorage>,
    pub handler: Arc<dyn EventHandler<E>>,
    pub config: FollowerConfig,
}

impl<E: Event> Clone for FollowerDeps<E> {
    fn clone(&self) -> Self {
        Self {
            types: Arc::clone(&self.types),
            event_storage: Arc::clone(&self.event_storage),
            snapshot_storage: Arc::clone(&self.snapshot_storage),
            handler: Arc::clone(&self.handler),
            config: self.config.clone(),
        }
    }
}

impl<E: Event> fmt::Debug for FollowerDeps<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FollowerDeps")
            .field("types", &self.types)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A follower for one entity.
pub struct ConcurrentFollower<E: Event> {
    entity_id: EntityId,
    types: Arc<EventTypeRegistry<E>>,
    event_storage: Arc<dyn EventStorage<E>>,
    channel: MpscChannel<PendingEvent<E>, BatchReconciler<E>>,
    committed: VersionWatch,
}

impl<E: Event> ConcurrentFollower<E> {
    /// Load state for `entity_id` and start the consumer task.
    ///
    /// Starts from version 0 when no snapshot exists.
    #[tracing::instrument(name = "activate", skip_all, fields(entity_id = %entity_id))]
    pub async fn activate(entity_id: EntityId, deps: FollowerDeps<E>) -> Result<Self> {
        let state = match deps.snapshot_storage.get(&entity_id).await? {
            Some(state) => state,
            None => FollowState::new(entity_id.clone()),
        };
        let version = state.version;

        let reconciler = BatchReconciler::new(
            state,
            Arc::clone(&deps.event_storage),
            deps.snapshot_storage,
            deps.handler,
            deps.config.event_process_timeout(),
        );
        let committed = reconciler.subscribe();
        let channel = MpscChannel::spawn(
            ChannelConfig::from_follower_config(&deps.config).with_name(entity_id.to_string()),
            reconciler,
        );

        tracing::info!(version, "Follower activated");

        Ok(Self {
            entity_id,
            types: deps.types,
            event_storage: deps.event_storage,
            channel,
            committed,
        })
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Last committed version.
    pub fn version(&self) -> u64 {
        self.committed.current()
    }

    /// Last committed state.
    pub fn state(&self) -> FollowState {
        self.committed.snapshot()
    }

    /// Watch on the committed version.
    pub fn watch(&self) -> VersionWatch {
        self.committed.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.channel.is_completed()
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    /// Decode an envelope and enqueue it.
    ///
    /// Returns once the channel has accepted the event; application happens
    /// later on the consumer task.
    pub async fn notify(&self, envelope: &[u8]) -> Result<()> {
        let _accepted = self.tell_envelope(envelope).await?;
        Ok(())
    }

    /// Like [`notify`](Self::notify), but also waits for the event's
    /// completion.
    pub async fn notify_confirmed(&self, envelope: &[u8]) -> Result<()> {
        self.tell_envelope(envelope).await?.await
    }

    async fn tell_envelope(&self, envelope: &[u8]) -> Result<Completion> {
        let event = self
            .types
            .decode_envelope(envelope)
            .map_err(|e| e.with_entity(&self.entity_id))?;
        self.tell(event).await
    }

    /// Enqueue a decoded event.
    ///
    /// Events naming another entity are refused. Stale events (at or below
    /// the committed version) are not enqueued and get an already-successful
    /// completion. Fresh events are recorded in the event store before they
    /// are enqueued. A rejected channel write is logged and returned as
    /// `ChannelUnavailable`.
    pub async fn tell(&self, event: E) -> Result<Completion> {
        let version = event.version();
        if let Some(owner) = event.entity_id() {
            if owner != &self.entity_id {
                return Err(FollowError::validation(format!(
                    "Event v{} belongs to entity {}, not {}",
                    version, owner, self.entity_id
                ))
                .with_entity(&self.entity_id));
            }
        }
        if version <= self.committed.current() {
            metrics::counter!(STALE_EVENTS_TOTAL).increment(1);
            tracing::trace!(entity_id = %self.entity_id, version, "Stale event acknowledged");
            return Ok(Completion::ready());
        }

        self.event_storage
            .record(&self.entity_id, &event)
            .await
            .map_err(|e| e.with_entity(&self.entity_id))?;

        let (pending, completion) = PendingEvent::new(Arc::new(event));
        if self.channel.write(pending).await {
            Ok(completion)
        } else {
            let error = FollowError::channel_unavailable(&self.entity_id)
                .with_context("version", version);
            error.log();
            Err(error)
        }
    }

    /// Stop intake, drain what is queued, and return the final state.
    ///
    /// Only the first call returns the state; later calls fail.
    #[tracing::instrument(name = "deactivate", skip(self), fields(entity_id = %self.entity_id))]
    pub async fn deactivate(&self) -> Result<FollowState> {
        let reconciler = self.channel.complete().await.ok_or_else(|| {
            FollowError::internal(format!("follower {} already deactivated", self.entity_id))
        })?;

        let state = reconciler.into_state();
        tracing::info!(version = state.version, "Follower deactivated");
        Ok(state)
    }
}

impl<E: Event> fmt::Debug for ConcurrentFollower<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentFollower")
            .field("entity_id", &self.entity_id)
            .field("version", &self.version())
            .field("active", &self.is_active())
            .finish()
    }
}
