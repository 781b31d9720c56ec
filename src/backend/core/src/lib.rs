#![allow(clippy::result_large_err)]
//! # Follow Core
//!
//! Ordered, concurrent delivery of versioned events into per-entity state.
//!
//! ## Architecture
//!
//! - **Events**: versioned events, envelopes and the type registry that decodes them
//! - **Channel**: bounded multi-producer, single-consumer batching queue
//! - **Reconciler**: orders each batch, backfills gaps from the event store and
//!   applies the buffer against a deadline
//! - **Follower**: per-entity ingress that skips stale events and hands out completions
//! - **Registry**: activates followers on demand and evicts idle ones
//! - **Storage**: event log and snapshot stores (in-memory and PostgreSQL)
//! - **API**: HTTP ingress, state queries, health and metrics
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod api;
pub mod channel;
pub mod completion;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod follower;
pub mod handler;
pub mod reconciler;
pub mod registry;
pub mod state;
pub mod storage;
pub mod telemetry;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, FollowError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::channel::{BatchConsumer, ChannelConfig, ChannelStats, MpscChannel};
    pub use crate::completion::{completion_pair, Completion, CompletionSource};
    pub use crate::config::{Config, FollowerConfig};
    pub use crate::error::{ErrorCode, FollowError, Result};
    pub use crate::events::{EntityId, Event, EventBase, EventTypeRegistry, EventWrapper};
    pub use crate::follower::{ConcurrentFollower, FollowerDeps};
    pub use crate::handler::{EventHandler, NoopHandler};
    pub use crate::reconciler::{BatchOutcome, BatchReconciler, PendingEvent};
    pub use crate::registry::FollowerRegistry;
    pub use crate::state::{FollowState, VersionWatch};
    pub use crate::storage::{
        EventStorage, InMemoryEventStorage, InMemorySnapshotStorage, SnapshotStorage,
    };
}
