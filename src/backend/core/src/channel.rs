//! Bounded multi-producer, single-consumer batching channel.
//!
//! Producers write items concurrently; exactly one consumer task drains them
//! in batches (everything currently buffered, up to `max_batch_size`) and
//! hands each batch to a [`BatchConsumer`] that it owns exclusively. Batches
//! never overlap.
//!
//! ```text
//! write ──┐
//! write ──┼──> [ bounded buffer ] ──> consumer task ──> consume(batch)
//! write ──┘                              (one per channel)
//! ```
//!
//! `complete()` stops intake, lets the consumer drain what is already
//! buffered, and hands the consumer back once the task has finished.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::FollowerConfig;
use crate::telemetry::metrics::CHANNEL_REJECTIONS_TOTAL;

/// Receives drained batches on the consumer task.
#[async_trait]
pub trait BatchConsumer<T>: Send + 'static {
    /// Process one batch. Batches are delivered strictly one after another.
    async fn consume(&mut self, batch: Vec<T>);
}

/// Configuration for one channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Bounded buffer capacity
    pub capacity: usize,
    /// Maximum items handed to the consumer at once
    pub max_batch_size: usize,
    /// How long a write may wait for buffer space before it is rejected
    pub write_timeout: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::from_follower_config(&FollowerConfig::default())
    }
}

impl ChannelConfig {
    pub fn from_follower_config(config: &FollowerConfig) -> Self {
        Self {
            capacity: config.channel_capacity.max(1),
            max_batch_size: config.max_batch_size.max(1),
            write_timeout: config.write_timeout(),
            name: "follower".to_string(),
        }
    }

    /// Create with a specific name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Counters shared between producers and the consumer task.
#[derive(Debug, Default)]
struct Counters {
    written: AtomicU64,
    rejected: AtomicU64,
    batches: AtomicU64,
    consumed: AtomicU64,
}

/// Point-in-time channel statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub written: u64,
    pub rejected: u64,
    pub batches: u64,
    pub consumed: u64,
}

/// A bounded channel bound to exactly one consumer task.
pub struct MpscChannel<T, C> {
    config: ChannelConfig,
    sender: mpsc::Sender<T>,
    shutdown: CancellationToken,
    consumer: Mutex<Option<JoinHandle<C>>>,
    counters: Arc<Counters>,
}

impl<T, C> MpscChannel<T, C>
where
    T: Send + 'static,
    C: BatchConsumer<T>,
{
    /// Create the channel and start its consumer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: ChannelConfig, consumer: C) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let shutdown = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let handle = tokio::spawn(run_consumer(
            receiver,
            consumer,
            shutdown.clone(),
            config.max_batch_size.max(1),
            counters.clone(),
            config.name.clone(),
        ));

        tracing::debug!(
            channel = %config.name,
            capacity = config.capacity,
            max_batch_size = config.max_batch_size,
            "Channel consumer started"
        );

        Self {
            config,
            sender,
            shutdown,
            consumer: Mutex::new(Some(handle)),
            counters,
        }
    }

    /// Enqueue an item.
    ///
    /// Suspends while the buffer is full. Returns `false` when the channel has
    /// been completed, or when no space frees up within the write timeout.
    pub async fn write(&self, item: T) -> bool {
        if self.shutdown.is_cancelled() {
            return self.reject("completed");
        }

        let accepted = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            sent = tokio::time::timeout(self.config.write_timeout, self.sender.send(item)) => {
                matches!(sent, Ok(Ok(())))
            }
        };

        if accepted {
            self.counters.written.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.reject("closed or full")
        }
    }

    fn reject(&self, reason: &'static str) -> bool {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(CHANNEL_REJECTIONS_TOTAL, "reason" => reason).increment(1);
        tracing::debug!(channel = %self.config.name, reason, "Channel write rejected");
        false
    }

    /// Whether `complete()` has been called.
    pub fn is_completed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Items currently buffered and not yet drained.
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Get channel statistics.
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            written: self.counters.written.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            consumed: self.counters.consumed.load(Ordering::Relaxed),
        }
    }

    /// Stop intake, drain buffered items, and return the consumer.
    ///
    /// Returns `None` if the channel was already completed or the consumer
    /// task panicked.
    pub async fn complete(&self) -> Option<C> {
        self.shutdown.cancel();

        let handle = self.consumer.lock().take()?;
        match handle.await {
            Ok(consumer) => {
                tracing::debug!(channel = %self.config.name, "Channel consumer stopped");
                Some(consumer)
            }
            Err(e) => {
                tracing::error!(channel = %self.config.name, error = %e, "Channel consumer failed");
                None
            }
        }
    }
}

/// Take `first` plus whatever else is buffered right now, up to `max`.
fn drain_batch<T>(receiver: &mut mpsc::Receiver<T>, first: T, max: usize) -> Vec<T> {
    let mut batch = Vec::with_capacity(max.min(64));
    batch.push(first);
    while batch.len() < max {
        match receiver.try_recv() {
            Ok(item) => batch.push(item),
            Err(_) => break,
        }
    }
    batch
}

async fn run_consumer<T, C>(
    mut receiver: mpsc::Receiver<T>,
    mut consumer: C,
    shutdown: CancellationToken,
    max_batch_size: usize,
    counters: Arc<Counters>,
    name: String,
) -> C
where
    T: Send + 'static,
    C: BatchConsumer<T>,
{
    loop {
        let first = tokio::select! {
            biased;
            item = receiver.recv() => match item {
                Some(item) => item,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };
        let batch = drain_batch(&mut receiver, first, max_batch_size);
        deliver(&mut consumer, batch, &counters).await;
    }

    // No new writes from here on; finish what producers already handed over.
    receiver.close();
    while let Some(first) = receiver.recv().await {
        let batch = drain_batch(&mut receiver, first, max_batch_size);
        deliver(&mut consumer, batch, &counters).await;
    }

    tracing::debug!(channel = %name, "Channel drained");
    consumer
}

async fn deliver<T, C: BatchConsumer<T>>(consumer: &mut C, batch: Vec<T>, counters: &Counters) {
    counters.batches.fetch_add(1, Ordering::Relaxed);
    counters
        .consumed
        .fetch_add(batch.len() as u64, Ordering::Relaxed);
    consumer.consume(batch).await;
}
