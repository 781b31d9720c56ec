//! Durable stores a follower depends on.
//!
//! - [`EventStorage`]: the gapless per-entity event log, read to backfill gaps
//! - [`SnapshotStorage`]: the last committed [`FollowState`] per entity
//!
//! Both come in an in-memory flavour (tests, single-process deployments) and a
//! PostgreSQL flavour backed by `sqlx`.

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryEventStorage, InMemorySnapshotStorage};
pub use postgres::{connect, PgEventStorage, PgSnapshotStorage};

use async_trait::async_trait;

use crate::error::Result;
use crate::events::{EntityId, Event};
use crate::state::FollowState;

/// Access to an entity's event log.
///
/// The log is normally written by the event's producer before followers are
/// notified; followers only read it. Stores without such a producer (the
/// in-memory one) also keep what followers receive at ingress, through
/// [`record`](EventStorage::record), so gaps can still be backfilled.
#[async_trait]
pub trait EventStorage<E: Event>: Send + Sync {
    /// Events with `from_exclusive < version <= to_inclusive`, ascending.
    async fn get_list(
        &self,
        entity_id: &EntityId,
        from_exclusive: u64,
        to_inclusive: u64,
    ) -> Result<Vec<E>>;

    /// Record an event a follower accepted at ingress. A version already in
    /// the log is left untouched.
    async fn record(&self, _entity_id: &EntityId, _event: &E) -> Result<()> {
        Ok(())
    }
}

/// Persistence for follower state.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Load the last saved state, if any.
    async fn get(&self, entity_id: &EntityId) -> Result<Option<FollowState>>;

    /// Save state; the last writer wins.
    async fn save(&self, state: &FollowState) -> Result<()>;
}
