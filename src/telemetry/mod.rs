//! Asynchronous usage telemetry.
//!
//! Request handlers hand [`LogEntry`] values to a [`TelemetryHandle`], which
//! pushes them into a bounded queue with `try_send` and never waits. A
//! single aggregator task (see [`aggregator`]) drains the queue, groups
//! entries into batches and ships each batch to a [`Collector`] when the
//! batch is full or the flush interval elapses, whichever comes first.
//!
//! Delivery is best-effort. A full queue drops the entry, a failed delivery
//! drops the batch, and neither is ever reported back to the request path.

pub mod aggregator;
pub mod collector;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::buffer_pool::BufferPool;
use aggregator::Aggregator;
pub use collector::{Collector, DeliveryError, HttpCollector};

/// Drops are logged on the first occurrence and then once per this many.
const DROP_LOG_EVERY: u64 = 1000;

/// One observed request, as reported to the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub request_id: String,
    pub count: u64,
}

/// How a flushed batch is put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEncoding {
    /// One POST carrying a JSON array of every entry in the batch.
    Array,
    /// One POST per entry, each a single JSON object.
    Single,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub name: &'static str,
    pub buffer_size: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub encoding: BatchEncoding,
}

#[derive(Debug, Default)]
pub struct TelemetryStats {
    pub enqueued: AtomicU64,
    pub dropped: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub entries_delivered: AtomicU64,
    pub delivery_failures: AtomicU64,
}

impl TelemetryStats {
    #[must_use]
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            entries_delivered: self.entries_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub batches_flushed: u64,
    pub entries_delivered: u64,
    pub delivery_failures: u64,
}

/// Producer side of a telemetry pipeline. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TelemetryHandle {
    name: &'static str,
    tx: mpsc::Sender<LogEntry>,
    stats: Arc<TelemetryStats>,
}

impl TelemetryHandle {
    /// Queues `entry` without waiting.
    ///
    /// Returns `false` when the entry was dropped because the queue is full
    /// or the aggregator has stopped.
    pub fn record(&self, entry: LogEntry) -> bool {
        let reason = match self.tx.try_send(entry) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                return true;
            }
            Err(TrySendError::Full(_)) => "queue full",
            Err(TrySendError::Closed(_)) => "pipeline stopped",
        };

        let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % DROP_LOG_EVERY == 0 {
            tracing::warn!(
                pipeline = self.name,
                reason,
                dropped_total = dropped,
                "dropped telemetry entries"
            );
        }
        false
    }

    #[must_use]
    pub fn stats(&self) -> Arc<TelemetryStats> {
        Arc::clone(&self.stats)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// Starts a pipeline and returns its producer handle and aggregator task.
///
/// The aggregator runs until `shutdown` fires or every handle is dropped,
/// then drains what is still queued and flushes it before exiting.
pub fn spawn(
    settings: PipelineSettings,
    collector: Arc<dyn Collector>,
    pool: Arc<BufferPool>,
    shutdown: watch::Receiver<bool>,
) -> (TelemetryHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(settings.buffer_size.max(1));
    let stats = Arc::new(TelemetryStats::default());
    let handle = TelemetryHandle {
        name: settings.name,
        tx,
        stats: Arc::clone(&stats),
    };

    let aggregator = Aggregator::new(settings, rx, collector, pool, stats);
    let task = tokio::spawn(aggregator.run(shutdown));
    (handle, task)
}
