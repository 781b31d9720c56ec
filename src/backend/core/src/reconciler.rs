//! Batch reconciliation: the consumer side of a follower.
//!
//! Each drained batch goes through the same cycle:
//!
//! 1. `start_version` is the last buffered version, or the state version when
//!    the unprocessed buffer is empty.
//! 2. Items at or below `start_version` are stale and succeed immediately.
//! 3. The highest-version item becomes the batch's *representative*. Every
//!    other item succeeds immediately; only the representative waits for the
//!    batch to be applied.
//! 4. Accepted events are sorted by version.
//! 5. If they do not form a gapless run right after `start_version`, they are
//!    discarded and the authoritative run is loaded from the event store.
//! 6. The whole unprocessed buffer is applied as one unit, raced against the
//!    process timeout. On success the state advances to the last buffered
//!    event, a snapshot is saved, the buffer is cleared and the representative
//!    succeeds. On timeout the representative is rejected and the buffer is
//!    kept for the next cycle.
//! 7. Any other failure is logged against the entity and rejects the
//!    representative; the buffer as of the failure is kept.
//!
//! Timed-out applications are not aborted. They keep running detached while
//! the next cycle may apply the same events again, so handlers see
//! at-least-once delivery.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::channel::BatchConsumer;
use crate::completion::{completion_pair, Completion, CompletionSource};
use crate::error::{ErrorCode, FollowError, Result};
use crate::events::Event;
use crate::handler::EventHandler;
use crate::state::{version_channel, FollowState, VersionPublisher, VersionWatch};
use crate::storage::{EventStorage, SnapshotStorage};
use crate::telemetry::metrics::{
    BATCHES_TOTAL, BATCH_APPLY_SECONDS, BATCH_SIZE, EVENTS_APPLIED_TOTAL, GAP_FILLS_TOTAL,
    STALE_EVENTS_TOTAL,
};

/// An event waiting in the channel together with its producer's handle.
#[derive(Debug)]
pub struct PendingEvent<E> {
    pub event: Arc<E>,
    pub completion: CompletionSource,
}

impl<E> PendingEvent<E> {
    /// Pair an event with a fresh completion handle.
    pub fn new(event: Arc<E>) -> (Self, Completion) {
        let (completion, handle) = completion_pair();
        (Self { event, completion }, handle)
    }
}

/// Result of one reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing to apply.
    Idle,
    /// The buffer was applied and committed at `version`.
    Applied { version: u64, count: usize },
    /// The deadline elapsed; the buffer is kept.
    TimedOut,
    /// The cycle failed with the given code; the buffer is kept.
    Failed(ErrorCode),
}

impl BatchOutcome {
    fn label(&self) -> &'static str {
        match self {
            BatchOutcome::Idle => "idle",
            BatchOutcome::Applied { .. } => "applied",
            BatchOutcome::TimedOut => "timeout",
            BatchOutcome::Failed(_) => "failed",
        }
    }
}

/// Owns a follower's state and unprocessed buffer.
///
/// Only the channel's consumer task holds the reconciler, so batches never
/// overlap and neither the state nor the buffer needs a lock.
pub struct BatchReconciler<E: Event> {
    state: FollowState,
    unprocessed: Vec<Arc<E>>,
    event_storage: Arc<dyn EventStorage<E>>,
    snapshot_storage: Arc<dyn SnapshotStorage>,
    handler: Arc<dyn EventHandler<E>>,
    process_timeout: Duration,
    publisher: VersionPublisher,
}

impl<E: Event> BatchReconciler<E> {
    pub fn new(
        state: FollowState,
        event_storage: Arc<dyn EventStorage<E>>,
        snapshot_storage: Arc<dyn SnapshotStorage>,
        handler: Arc<dyn EventHandler<E>>,
        process_timeout: Duration,
    ) -> Self {
        let (publisher, _) = version_channel(state.clone());
        Self {
            state,
            unprocessed: Vec::new(),
            event_storage,
            snapshot_storage,
            handler,
            process_timeout,
            publisher,
        }
    }

    pub fn state(&self) -> &FollowState {
        &self.state
    }

    pub fn into_state(self) -> FollowState {
        self.state
    }

    /// Versions currently waiting in the unprocessed buffer.
    pub fn unprocessed_versions(&self) -> Vec<u64> {
        self.unprocessed.iter().map(|e| e.version()).collect()
    }

    /// Watch on the last committed version.
    pub fn subscribe(&self) -> VersionWatch {
        self.publisher.subscribe()
    }

    fn start_version(&self) -> u64 {
        self.unprocessed
            .last()
            .map(|e| e.version())
            .unwrap_or(self.state.version)
    }

    /// Run one reconciliation cycle over a drained batch.
    #[tracing::instrument(
        name = "reconcile",
        skip_all,
        fields(entity_id = %self.state.entity_id, batch_size = batch.len())
    )]
    pub async fn reconcile(&mut self, batch: Vec<PendingEvent<E>>) -> BatchOutcome {
        metrics::histogram!(BATCH_SIZE).record(batch.len() as f64);

        let start_version = self.start_version();
        let (accepted, mut representative) = partition(batch, start_version);

        let outcome = match self.process(start_version, accepted).await {
            Ok(None) => BatchOutcome::Idle,
            Ok(Some((version, count))) => {
                if let Some(representative) = representative.as_mut() {
                    representative.try_set_result();
                }
                tracing::debug!(start_version, version, count, "Batch applied");
                BatchOutcome::Applied { version, count }
            }
            Err(error) => {
                let error = error.with_entity(&self.state.entity_id);
                error.log();
                let outcome = match error.code() {
                    ErrorCode::ProcessTimeout => BatchOutcome::TimedOut,
                    code => BatchOutcome::Failed(code),
                };
                if let Some(representative) = representative.as_mut() {
                    representative.try_set_error(error);
                }
                outcome
            }
        };

        metrics::counter!(BATCHES_TOTAL, "outcome" => outcome.label()).increment(1);
        outcome
    }

    /// Steps 4 to 6. Returns the committed version and event count, or
    /// `None` when there was nothing to apply.
    async fn process(
        &mut self,
        start_version: u64,
        mut accepted: Vec<Arc<E>>,
    ) -> Result<Option<(u64, usize)>> {
        if let Some(highest) = accepted.iter().map(|e| e.version()).max() {
            accepted.sort_by_key(|e| e.version());
            let received = accepted.len() as u64;

            if start_version + received != highest {
                let loaded = self.load_range(start_version, highest).await?;
                self.unprocessed.extend(loaded);
            } else {
                self.unprocessed.extend(accepted);
            }
        }

        if self.unprocessed.is_empty() {
            return Ok(None);
        }

        self.apply_unprocessed().await.map(Some)
    }

    /// Load `(from_exclusive, to_inclusive]` and check that it is the full run.
    async fn load_range(&self, from_exclusive: u64, to_inclusive: u64) -> Result<Vec<Arc<E>>> {
        metrics::counter!(GAP_FILLS_TOTAL).increment(1);
        tracing::debug!(from_exclusive, to_inclusive, "Filling gap from event store");

        let events = self
            .event_storage
            .get_list(&self.state.entity_id, from_exclusive, to_inclusive)
            .await?;

        let expected = to_inclusive - from_exclusive;
        let contiguous = events.len() as u64 == expected
            && events
                .iter()
                .zip(from_exclusive + 1..)
                .all(|(event, version)| event.version() == version);
        if !contiguous {
            return Err(FollowError::event_store(format!(
                "Expected versions {}..={} from event store, got {:?}",
                from_exclusive + 1,
                to_inclusive,
                events.iter().map(|e| e.version()).collect::<Vec<_>>()
            )));
        }

        Ok(events.into_iter().map(Arc::new).collect())
    }

    async fn apply_unprocessed(&mut self) -> Result<(u64, usize)> {
        let started = Instant::now();
        let mut joint = tokio::spawn(apply_all(
            Arc::clone(&self.handler),
            self.unprocessed.clone(),
        ));

        let joined = tokio::select! {
            biased;
            joined = &mut joint => joined,
            _ = tokio::time::sleep(self.process_timeout) => {
                // The join handle is dropped on return, which detaches the
                // task without aborting it.
                return Err(FollowError::process_timeout(
                    &self.state.entity_id,
                    self.process_timeout,
                ));
            }
        };
        metrics::histogram!(BATCH_APPLY_SECONDS).record(started.elapsed().as_secs_f64());

        match joined? {
            Ok(()) => {}
            Err(error) if error.code() == ErrorCode::ApplicationFailed => return Err(error),
            Err(error) => {
                return Err(FollowError::application_failed(error.to_string()).with_source(error))
            }
        }

        if let Some(last) = self.unprocessed.last() {
            self.state.unsafe_update_to(last.as_ref());
        }
        self.snapshot_storage.save(&self.state).await?;

        let count = self.unprocessed.len();
        self.unprocessed.clear();
        self.publisher.publish(&self.state);
        metrics::counter!(EVENTS_APPLIED_TOTAL).increment(count as u64);

        Ok((self.state.version, count))
    }
}

#[async_trait]
impl<E: Event> BatchConsumer<PendingEvent<E>> for BatchReconciler<E> {
    async fn consume(&mut self, batch: Vec<PendingEvent<E>>) {
        self.reconcile(batch).await;
    }
}

/// Steps 2 and 3: resolve stale and non-representative items, keep the
/// representative's handle, and return the accepted events.
fn partition<E: Event>(
    batch: Vec<PendingEvent<E>>,
    start_version: u64,
) -> (Vec<Arc<E>>, Option<CompletionSource>) {
    let mut accepted = Vec::with_capacity(batch.len());
    let mut representative: Option<CompletionSource> = None;
    let mut highest = start_version;
    let mut stale = 0u64;

    for PendingEvent {
        event,
        mut completion,
    } in batch
    {
        let version = event.version();
        if version <= start_version {
            completion.try_set_result();
            stale += 1;
            continue;
        }

        if version > highest {
            highest = version;
            if let Some(mut previous) = representative.replace(completion) {
                previous.try_set_result();
            }
        } else {
            completion.try_set_result();
        }
        accepted.push(event);
    }

    if stale > 0 {
        metrics::counter!(STALE_EVENTS_TOTAL).increment(stale);
        tracing::debug!(stale, start_version, "Skipped stale events");
    }

    (accepted, representative)
}

/// Apply every event of the buffer as one joint unit.
async fn apply_all<E: Event>(handler: Arc<dyn EventHandler<E>>, events: Vec<Arc<E>>) -> Result<()> {
    if handler.is_concurrent() {
        join_all(events.into_iter().map(|event| handler.apply(event)))
            .await
            .into_iter()
            .collect()
    } else {
        for event in events {
            handler.apply(event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EntityId, EventBase};
    use crate::handler::NoopHandler;
    use crate::storage::{InMemoryEventStorage, InMemorySnapshotStorage};

    #[derive(Debug, Clone)]
    struct Bumped(EventBase);

    impl Event for Bumped {
        fn version(&self) -> u64 {
            self.0.version
        }
        fn timestamp(&self) -> u64 {
            self.0.timestamp
        }
        fn event_type(&self) -> &'static str {
            "Bumped"
        }
    }

    fn bumped(version: u64) -> Arc<Bumped> {
        Arc::new(Bumped(EventBase::new(version, 1_000 + version)))
    }

    fn reconciler(
        store: Arc<InMemoryEventStorage<Bumped>>,
        version: u64,
    ) -> BatchReconciler<Bumped> {
        let mut state = FollowState::new(EntityId::new("r-1"));
        state.unsafe_update_version(version, 0);
        BatchReconciler::new(
            state,
            store,
            Arc::new(InMemorySnapshotStorage::new()),
            Arc::new(NoopHandler),
            Duration::from_secs(1),
        )
    }

    fn batch(versions: &[u64]) -> (Vec<PendingEvent<Bumped>>, Vec<Completion>) {
        versions.iter().map(|v| PendingEvent::new(bumped(*v))).unzip()
    }

    #[tokio::test]
    async fn test_contiguous_batch_commits_last_version() {
        let mut reconciler = reconciler(Arc::new(InMemoryEventStorage::new()), 10);
        let (items, handles) = batch(&[12, 11, 13]);

        let outcome = reconciler.reconcile(items).await;

        assert_eq!(outcome, BatchOutcome::Applied { version: 13, count: 3 });
        assert_eq!(reconciler.state().version, 13);
        assert_eq!(reconciler.state().timestamp, 1_013);
        assert!(reconciler.unprocessed_versions().is_empty());
        for handle in handles {
            assert!(handle.await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_stale_only_batch_is_idle() {
        let mut reconciler = reconciler(Arc::new(InMemoryEventStorage::new()), 5);
        let (items, mut handles) = batch(&[3, 5]);

        assert_eq!(reconciler.reconcile(items).await, BatchOutcome::Idle);
        assert_eq!(reconciler.state().version, 5);
        for handle in handles.iter_mut() {
            assert!(matches!(handle.try_result(), Some(Ok(()))));
        }
    }

    #[tokio::test]
    async fn test_incomplete_store_range_keeps_buffer_untouched() {
        let store = Arc::new(InMemoryEventStorage::new());
        let id = EntityId::new("r-1");
        store.append(&id, &Bumped(EventBase::new(1, 1))).await.unwrap();

        let mut reconciler = reconciler(store, 0);
        let (items, handles) = batch(&[3]);

        let outcome = reconciler.reconcile(items).await;
        assert_eq!(outcome, BatchOutcome::Failed(ErrorCode::EventStoreError));
        assert!(reconciler.unprocessed_versions().is_empty());
        assert_eq!(reconciler.state().version, 0);

        let err = handles.into_iter().next().unwrap().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::EventStoreError);
    }

    #[tokio::test]
    async fn test_duplicate_versions_trigger_backfill() {
        let store = Arc::new(InMemoryEventStorage::new());
        let id = EntityId::new("r-1");
        for v in 1..=2 {
            store.append(&id, &Bumped(EventBase::new(v, v))).await.unwrap();
        }

        let mut reconciler = reconciler(store, 0);
        let (items, handles) = batch(&[1, 2, 2]);

        let outcome = reconciler.reconcile(items).await;
        assert_eq!(outcome, BatchOutcome::Applied { version: 2, count: 2 });
        for handle in handles {
            assert!(handle.await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_subscribe_sees_committed_version() {
        let mut reconciler = reconciler(Arc::new(InMemoryEventStorage::new()), 0);
        let watch = reconciler.subscribe();
        let (items, _handles) = batch(&[1, 2]);

        reconciler.reconcile(items).await;
        assert_eq!(watch.current(), 2);
    }
}
