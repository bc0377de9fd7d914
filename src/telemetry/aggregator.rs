//! The batching consumer behind every telemetry pipeline.
//!
//! The aggregator owns the current batch and a flush deadline. A batch is
//! flushed as soon as it holds `batch_size` entries or when the deadline
//! passes with entries pending; every flush pushes the deadline a full
//! interval into the future, and so does every expiry.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::{BufMut, Bytes};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::{BatchEncoding, Collector, LogEntry, PipelineSettings, TelemetryStats};
use crate::buffer_pool::BufferPool;

pub struct Aggregator {
    settings: PipelineSettings,
    rx: mpsc::Receiver<LogEntry>,
    collector: Arc<dyn Collector>,
    pool: Arc<BufferPool>,
    stats: Arc<TelemetryStats>,
    batch: Vec<LogEntry>,
}

impl Aggregator {
    pub(crate) fn new(
        settings: PipelineSettings,
        rx: mpsc::Receiver<LogEntry>,
        collector: Arc<dyn Collector>,
        pool: Arc<BufferPool>,
        stats: Arc<TelemetryStats>,
    ) -> Self {
        let settings = PipelineSettings {
            batch_size: settings.batch_size.max(1),
            ..settings
        };
        Self {
            batch: Vec::with_capacity(settings.batch_size),
            settings,
            rx,
            collector,
            pool,
            stats,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.settings.flush_interval;
        let timer = tokio::time::sleep(interval);
        tokio::pin!(timer);

        tracing::debug!(
            pipeline = self.settings.name,
            batch_size = self.settings.batch_size,
            flush_interval_ms = interval.as_millis() as u64,
            "telemetry aggregator started"
        );

        loop {
            tokio::select! {
                entry = self.rx.recv() => {
                    let Some(entry) = entry else {
                        tracing::debug!(pipeline = self.settings.name, "all producers dropped");
                        break;
                    };
                    self.batch.push(entry);
                    if self.batch.len() >= self.settings.batch_size {
                        self.flush().await;
                        timer.as_mut().reset(Instant::now() + interval);
                    }
                }
                () = &mut timer => {
                    if !self.batch.is_empty() {
                        self.flush().await;
                    }
                    timer.as_mut().reset(Instant::now() + interval);
                }
                _ = shutdown.changed() => {
                    tracing::debug!(pipeline = self.settings.name, "telemetry aggregator shutting down");
                    break;
                }
            }
        }

        self.drain().await;
    }

    /// Closes the queue and flushes everything still buffered in it.
    async fn drain(&mut self) {
        self.rx.close();
        while let Some(entry) = self.rx.recv().await {
            self.batch.push(entry);
            if self.batch.len() >= self.settings.batch_size {
                self.flush().await;
            }
        }
        if !self.batch.is_empty() {
            self.flush().await;
        }
        tracing::info!(
            pipeline = self.settings.name,
            stats = ?self.stats.snapshot(),
            "telemetry pipeline stopped"
        );
    }

    async fn flush(&mut self) {
        let entries = self.batch.len();
        let encoded = self.encode();
        self.batch.clear();
        self.stats.batches_flushed.fetch_add(1, Ordering::Relaxed);

        let payloads = match encoded {
            Ok(payloads) => payloads,
            Err(e) => {
                tracing::error!(
                    pipeline = self.settings.name,
                    error = %e,
                    entries,
                    "failed to encode telemetry batch"
                );
                self.stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        for (payload, carried) in payloads {
            match self.collector.deliver(payload).await {
                Ok(()) => {
                    self.stats
                        .entries_delivered
                        .fetch_add(carried, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        pipeline = self.settings.name,
                        error = %e,
                        entries = carried,
                        "telemetry delivery failed, batch discarded"
                    );
                }
            }
        }

        tracing::debug!(pipeline = self.settings.name, entries, "telemetry batch flushed");
    }

    /// Encodes the current batch, paired with the number of entries each
    /// payload carries.
    fn encode(&self) -> Result<Vec<(Bytes, u64)>, serde_json::Error> {
        let mut buf = self.pool.acquire();
        match self.settings.encoding {
            BatchEncoding::Array => {
                serde_json::to_writer((&mut *buf).writer(), &self.batch)?;
                Ok(vec![(Bytes::copy_from_slice(&buf), self.batch.len() as u64)])
            }
            BatchEncoding::Single => self
                .batch
                .iter()
                .map(|entry| {
                    buf.clear();
                    serde_json::to_writer((&mut *buf).writer(), entry)?;
                    Ok((Bytes::copy_from_slice(&buf), 1))
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::telemetry::{self, DeliveryError};

    /// Collector that forwards every payload to the test and can be told to fail.
    struct RecordingCollector {
        tx: mpsc::UnboundedSender<Bytes>,
        fail: bool,
    }

    #[async_trait]
    impl Collector for RecordingCollector {
        async fn deliver(&self, payload: Bytes) -> Result<(), DeliveryError> {
            let _ = self.tx.send(payload);
            if self.fail {
                Err(DeliveryError::Status {
                    status: axum::http::StatusCode::SERVICE_UNAVAILABLE,
                    body: "down".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    /// Collector that never completes, standing in for a hung remote.
    struct StalledCollector {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl Collector for StalledCollector {
        async fn deliver(&self, _payload: Bytes) -> Result<(), DeliveryError> {
            *self.calls.lock().await += 1;
            std::future::pending().await
        }
    }

    fn settings(buffer_size: usize, batch_size: usize, encoding: BatchEncoding) -> PipelineSettings {
        PipelineSettings {
            name: "test",
            buffer_size,
            batch_size,
            flush_interval: Duration::from_secs(2),
            encoding,
        }
    }

    fn entry(id: &str) -> LogEntry {
        LogEntry {
            request_id: id.into(),
            count: 1,
        }
    }

    fn pool() -> Arc<BufferPool> {
        Arc::new(BufferPool::new(4, 64, 4096))
    }

    fn decode(payload: &Bytes) -> Vec<LogEntry> {
        serde_json::from_slice(payload).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_when_batch_is_full() {
        let (tx, mut payloads) = mpsc::unbounded_channel();
        let collector = Arc::new(RecordingCollector { tx, fail: false });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = telemetry::spawn(
            settings(100, 3, BatchEncoding::Array),
            collector,
            pool(),
            shutdown_rx,
        );

        let start = Instant::now();
        for id in ["a", "b", "c"] {
            assert!(handle.record(entry(id)));
        }

        let batch = decode(&payloads.recv().await.unwrap());
        assert_eq!(batch, vec![entry("a"), entry("b"), entry("c")]);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_partial_batch_when_timer_fires() {
        let (tx, mut payloads) = mpsc::unbounded_channel();
        let collector = Arc::new(RecordingCollector { tx, fail: false });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = telemetry::spawn(
            settings(100, 20, BatchEncoding::Array),
            collector,
            pool(),
            shutdown_rx,
        );

        let start = Instant::now();
        handle.record(entry("a"));
        handle.record(entry("b"));

        let batch = decode(&payloads.recv().await.unwrap());
        assert_eq!(batch.len(), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn size_flush_restarts_the_timer() {
        let (tx, mut payloads) = mpsc::unbounded_channel();
        let collector = Arc::new(RecordingCollector { tx, fail: false });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = telemetry::spawn(
            settings(100, 2, BatchEncoding::Array),
            collector,
            pool(),
            shutdown_rx,
        );

        // Fill a batch just before the first deadline.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.record(entry("a"));
        handle.record(entry("b"));
        assert_eq!(decode(&payloads.recv().await.unwrap()).len(), 2);
        let flushed_at = Instant::now();

        // The next partial batch waits a full interval from that flush.
        handle.record(entry("c"));
        assert_eq!(decode(&payloads.recv().await.unwrap()), vec![entry("c")]);
        assert!(flushed_at.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_timer_expiry_sends_nothing() {
        let (tx, mut payloads) = mpsc::unbounded_channel();
        let collector = Arc::new(RecordingCollector { tx, fail: false });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = telemetry::spawn(
            settings(100, 20, BatchEncoding::Array),
            collector,
            pool(),
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(payloads.try_recv().is_err());
        assert_eq!(handle.stats().snapshot().batches_flushed, 0);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let collector = Arc::new(StalledCollector {
            calls: Mutex::new(0),
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = telemetry::spawn(
            settings(4, 20, BatchEncoding::Array),
            collector,
            pool(),
            shutdown_rx,
        );

        // The aggregator has not been polled yet on this single-threaded
        // runtime, so nothing leaves the queue while we fill it.
        let accepted = (0..5).filter(|i| handle.record(entry(&i.to_string()))).count();

        assert_eq!(accepted, 4);
        let stats = handle.stats().snapshot();
        assert_eq!(stats.enqueued, 4);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_is_counted_and_not_retried() {
        let (tx, mut payloads) = mpsc::unbounded_channel();
        let collector = Arc::new(RecordingCollector { tx, fail: true });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = telemetry::spawn(
            settings(100, 1, BatchEncoding::Array),
            collector,
            pool(),
            shutdown_rx,
        );

        handle.record(entry("a"));
        payloads.recv().await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(payloads.try_recv().is_err());

        let stats = handle.stats().snapshot();
        assert_eq!(stats.delivery_failures, 1);
        assert_eq!(stats.entries_delivered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_encoding_posts_one_object_per_entry() {
        let (tx, mut payloads) = mpsc::unbounded_channel();
        let collector = Arc::new(RecordingCollector { tx, fail: false });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = telemetry::spawn(
            settings(100, 2, BatchEncoding::Single),
            collector,
            pool(),
            shutdown_rx,
        );

        handle.record(entry("a"));
        handle.record(entry("b"));

        let first: LogEntry = serde_json::from_slice(&payloads.recv().await.unwrap()).unwrap();
        let second: LogEntry = serde_json::from_slice(&payloads.recv().await.unwrap()).unwrap();
        assert_eq!(first, entry("a"));
        assert_eq!(second, entry("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_and_flushes_remaining_entries() {
        let (tx, mut payloads) = mpsc::unbounded_channel();
        let collector = Arc::new(RecordingCollector { tx, fail: false });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, task) = telemetry::spawn(
            settings(100, 20, BatchEncoding::Array),
            collector,
            pool(),
            shutdown_rx,
        );

        for id in ["a", "b", "c"] {
            handle.record(entry(id));
        }
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        let batch = decode(&payloads.recv().await.unwrap());
        assert_eq!(batch.len(), 3);
        assert!(!handle.record(entry("late")));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_flushes_and_stops() {
        let (tx, mut payloads) = mpsc::unbounded_channel();
        let collector = Arc::new(RecordingCollector { tx, fail: false });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, task) = telemetry::spawn(
            settings(100, 20, BatchEncoding::Array),
            collector,
            pool(),
            shutdown_rx,
        );

        handle.record(entry("a"));
        drop(handle);
        task.await.unwrap();

        assert_eq!(decode(&payloads.recv().await.unwrap()), vec![entry("a")]);
    }
}
