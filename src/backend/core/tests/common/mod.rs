//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use follow_core::error::{FollowError, Result};
use follow_core::events::{EntityId, Event, EventBase, EventTypeRegistry, EventWrapper};
use follow_core::handler::EventHandler;
use follow_core::state::FollowState;
use follow_core::storage::{EventStorage, InMemoryEventStorage, SnapshotStorage};

// ============================================================================
// Event
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counted {
    #[serde(flatten)]
    pub base: EventBase,
    pub note: String,
}

impl Event for Counted {
    fn version(&self) -> u64 {
        self.base.version
    }

    fn timestamp(&self) -> u64 {
        self.base.timestamp
    }

    fn event_type(&self) -> &'static str {
        "Counted"
    }
}

pub fn counted(version: u64) -> Counted {
    Counted {
        base: EventBase::new(version, 1_000 + version),
        note: format!("v{}", version),
    }
}

pub fn envelope(version: u64) -> Vec<u8> {
    EventWrapper::from_event(&counted(version))
        .unwrap()
        .encode()
        .unwrap()
}

pub fn types() -> Arc<EventTypeRegistry<Counted>> {
    Arc::new(EventTypeRegistry::new().with::<Counted>("Counted"))
}

// ============================================================================
// Handler
// ============================================================================

/// Records applied versions; individual versions can be made to hang, fail,
/// or wait for a permit.
pub struct ScriptedHandler {
    applied: Mutex<Vec<u64>>,
    hanging: Mutex<HashSet<u64>>,
    failing: Mutex<HashSet<u64>>,
    gated: Mutex<HashSet<u64>>,
    gate: Arc<Semaphore>,
    sequential: bool,
}

impl ScriptedHandler {
    fn build(sequential: bool) -> Arc<Self> {
        Arc::new(Self {
            applied: Mutex::new(Vec::new()),
            hanging: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            gated: Mutex::new(HashSet::new()),
            gate: Arc::new(Semaphore::new(0)),
            sequential,
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    pub fn sequential() -> Arc<Self> {
        Self::build(true)
    }

    pub fn hang_on(&self, version: u64) {
        self.hanging.lock().insert(version);
    }

    pub fn fail_on(&self, version: u64) {
        self.failing.lock().insert(version);
    }

    pub fn gate_on(&self, version: u64) {
        self.gated.lock().insert(version);
    }

    pub fn release_gate(&self) {
        self.gate.add_permits(1);
    }

    pub fn heal(&self) {
        self.hanging.lock().clear();
        self.failing.lock().clear();
    }

    pub fn applied(&self) -> Vec<u64> {
        self.applied.lock().clone()
    }

    pub fn applied_sorted(&self) -> Vec<u64> {
        let mut applied = self.applied();
        applied.sort_unstable();
        applied
    }
}

#[async_trait]
impl EventHandler<Counted> for ScriptedHandler {
    async fn apply(&self, event: Arc<Counted>) -> Result<()> {
        let version = event.version();

        let hanging = self.hanging.lock().contains(&version);
        let failing = self.failing.lock().contains(&version);
        let gated = self.gated.lock().contains(&version);

        if hanging {
            std::future::pending::<()>().await;
        }
        if failing {
            return Err(FollowError::validation(format!("rejected v{}", version)));
        }
        if gated {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }

        self.applied.lock().push(version);
        Ok(())
    }

    fn is_concurrent(&self) -> bool {
        !self.sequential
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Event store seeded with a gapless run, recording every range read.
pub struct RecordingEventStorage {
    inner: InMemoryEventStorage<Counted>,
    reads: Mutex<Vec<(u64, u64)>>,
}

impl RecordingEventStorage {
    pub async fn seeded(entity_id: &EntityId, up_to: u64) -> Arc<Self> {
        let inner = InMemoryEventStorage::new();
        for version in 1..=up_to {
            inner.append(entity_id, &counted(version)).await.unwrap();
        }
        Arc::new(Self {
            inner,
            reads: Mutex::new(Vec::new()),
        })
    }

    pub fn reads(&self) -> Vec<(u64, u64)> {
        self.reads.lock().clone()
    }
}

#[async_trait]
impl EventStorage<Counted> for RecordingEventStorage {
    async fn get_list(
        &self,
        entity_id: &EntityId,
        from_exclusive: u64,
        to_inclusive: u64,
    ) -> Result<Vec<Counted>> {
        self.reads.lock().push((from_exclusive, to_inclusive));
        self.inner.get_list(entity_id, from_exclusive, to_inclusive).await
    }

    async fn record(&self, entity_id: &EntityId, event: &Counted) -> Result<()> {
        self.inner.record(entity_id, event).await
    }
}

/// Snapshot store whose saves can be switched to fail.
#[derive(Default)]
pub struct FlakySnapshotStorage {
    saved: Mutex<Vec<FollowState>>,
    failing: AtomicBool,
}

impl FlakySnapshotStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn saved_versions(&self) -> Vec<u64> {
        self.saved.lock().iter().map(|s| s.version).collect()
    }
}

#[async_trait]
impl SnapshotStorage for FlakySnapshotStorage {
    async fn get(&self, entity_id: &EntityId) -> Result<Option<FollowState>> {
        Ok(self
            .saved
            .lock()
            .iter()
            .rev()
            .find(|s| &s.entity_id == entity_id)
            .cloned())
    }

    async fn save(&self, state: &FollowState) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FollowError::snapshot_store("snapshot store offline"));
        }
        self.saved.lock().push(state.clone());
        Ok(())
    }
}
