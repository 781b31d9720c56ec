//! Application hooks invoked for every applied event.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::events::Event;

/// Applies events to whatever the concrete entity maintains (read models,
/// projections, side effects).
///
/// `apply` may be invoked again for an event it has already seen: a batch that
/// times out or fails keeps its buffer and re-applies it on the next cycle, and
/// a timed-out invocation may still be running when that happens. Handlers
/// must therefore be idempotent per event version.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    async fn apply(&self, event: Arc<E>) -> Result<()>;

    /// Whether all events of a batch may be applied concurrently.
    ///
    /// When `false`, events are applied one at a time in version order.
    fn is_concurrent(&self) -> bool {
        true
    }
}

/// Handler that accepts every event and does nothing.
///
/// Useful for followers whose only output is the committed version.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl<E: Event> EventHandler<E> for NoopHandler {
    async fn apply(&self, _event: Arc<E>) -> Result<()> {
        Ok(())
    }
}
