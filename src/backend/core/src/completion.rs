//! Single-resolution completion handles.
//!
//! A producer that enqueues an event keeps the [`Completion`] half and awaits
//! it; the consumer keeps the [`CompletionSource`] half and resolves it once.
//! Resolving an already-resolved source is a no-op. A source dropped without
//! being resolved rejects its completion, so no producer waits forever.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{FollowError, Result};

/// Create a connected source/completion pair.
pub fn completion_pair() -> (CompletionSource, Completion) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionSource { tx: Some(tx) },
        Completion {
            inner: CompletionInner::Pending(rx),
        },
    )
}

/// Consumer-side half of a completion handle.
#[derive(Debug)]
pub struct CompletionSource {
    tx: Option<oneshot::Sender<Result<()>>>,
}

impl CompletionSource {
    /// Resolve with success. Returns `false` if already resolved.
    pub fn try_set_result(&mut self) -> bool {
        self.resolve(Ok(()))
    }

    /// Reject with an error. Returns `false` if already resolved.
    pub fn try_set_error(&mut self, error: FollowError) -> bool {
        self.resolve(Err(error))
    }

    /// Whether this source has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }

    fn resolve(&mut self, result: Result<()>) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // The producer may have stopped waiting; that is not an error here.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

impl Drop for CompletionSource {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(FollowError::internal(
                "completion source dropped before resolution",
            )));
        }
    }
}

/// Producer-side half of a completion handle.
///
/// Resolves to `Ok(())` when the event is reflected in state (or is
/// guaranteed to be by the time the batch's representative succeeds), or to
/// the error delivered by the consumer.
#[derive(Debug)]
#[must_use = "a completion does nothing unless awaited"]
pub struct Completion {
    inner: CompletionInner,
}

#[derive(Debug)]
enum CompletionInner {
    Ready(Result<()>),
    Pending(oneshot::Receiver<Result<()>>),
    Taken,
}

impl Completion {
    /// A completion that is already resolved with success.
    pub fn ready() -> Self {
        Self {
            inner: CompletionInner::Ready(Ok(())),
        }
    }

    /// Non-blocking check; `None` only while still pending.
    ///
    /// The outcome is handed out once. Later calls, and polls after it was
    /// taken, yield an internal error.
    pub fn try_result(&mut self) -> Option<Result<()>> {
        let result = match &mut self.inner {
            CompletionInner::Pending(rx) => match rx.try_recv() {
                Ok(result) => result,
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => Err(source_dropped()),
            },
            CompletionInner::Ready(_) | CompletionInner::Taken => self.take(),
        };
        self.inner = CompletionInner::Taken;
        Some(result)
    }

    fn take(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.inner, CompletionInner::Taken) {
            CompletionInner::Ready(result) => result,
            CompletionInner::Pending(_) | CompletionInner::Taken => Err(FollowError::internal(
                "completion result already taken",
            )),
        }
    }
}

fn source_dropped() -> FollowError {
    FollowError::internal("completion source dropped before resolution")
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let received = match &mut self.inner {
            CompletionInner::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(received) => received.unwrap_or_else(|_| Err(source_dropped())),
                Poll::Pending => return Poll::Pending,
            },
            CompletionInner::Ready(_) | CompletionInner::Taken => return Poll::Ready(self.take()),
        };
        self.inner = CompletionInner::Taken;
        Poll::Ready(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn test_resolve_success() {
        let (mut source, completion) = completion_pair();
        assert!(source.try_set_result());
        assert!(source.is_resolved());
        assert!(completion.await.is_ok());
    }

    #[tokio::test]
    async fn test_second_resolution_is_noop() {
        let (mut source, completion) = completion_pair();
        assert!(source.try_set_error(FollowError::validation("first")));
        assert!(!source.try_set_result());

        let err = completion.await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_drop_rejects_completion() {
        let (source, completion) = completion_pair();
        drop(source);

        let err = completion.await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[tokio::test]
    async fn test_ready_completion() {
        assert!(Completion::ready().await.is_ok());
    }

    #[test]
    fn test_pending_until_resolved_and_wakes_waiter() {
        use tokio_test::{assert_pending, assert_ready_ok, task};

        let (mut source, completion) = completion_pair();
        let mut waiter = task::spawn(completion);
        assert_pending!(waiter.poll());

        source.try_set_result();
        assert!(waiter.is_woken());
        assert_ready_ok!(waiter.poll());
    }

    #[test]
    fn test_try_result_pending_then_resolved() {
        let (mut source, mut completion) = completion_pair();
        assert!(completion.try_result().is_none());
        source.try_set_result();
        assert!(matches!(completion.try_result(), Some(Ok(()))));
    }

    #[test]
    fn test_try_result_after_taken_is_not_pending() {
        let mut ready = Completion::ready();
        assert!(matches!(ready.try_result(), Some(Ok(()))));
        let err = ready.try_result().unwrap().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);

        let (mut source, mut completion) = completion_pair();
        source.try_set_error(FollowError::validation("rejected"));
        let first = completion.try_result().unwrap().unwrap_err();
        assert_eq!(first.code(), ErrorCode::ValidationError);
        let again = completion.try_result().unwrap().unwrap_err();
        assert_eq!(again.code(), ErrorCode::InternalError);
    }

    #[test]
    fn test_resolving_after_completion_dropped_is_still_consumed() {
        let (mut source, completion) = completion_pair();
        drop(completion);
        assert!(source.try_set_result());
        assert!(!source.try_set_result());
    }
}
