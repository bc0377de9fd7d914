//! Activity middleware: observe every request, report usage, always forward.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::body;
use super::counter::count_sub_requests;
use super::extract::RequestKeyExtractor;
use crate::buffer_pool::BufferPool;
use crate::config::model::ActivityConfig;
use crate::error::CrossoverError;
use crate::server::HttpClient;
use crate::telemetry::{
    self, BatchEncoding, HttpCollector, LogEntry, PipelineSettings, TelemetryHandle,
    TelemetryStats,
};

pub struct ActivityTracker {
    extractor: RequestKeyExtractor,
    telemetry: TelemetryHandle,
    pool: Arc<BufferPool>,
    max_body_size: usize,
}

impl ActivityTracker {
    #[must_use]
    pub const fn new(
        extractor: RequestKeyExtractor,
        telemetry: TelemetryHandle,
        pool: Arc<BufferPool>,
        max_body_size: usize,
    ) -> Self {
        Self {
            extractor,
            telemetry,
            pool,
            max_body_size,
        }
    }

    /// Builds the tracker and starts its telemetry pipeline.
    ///
    /// Fails when the pattern, remote address or API key is missing or
    /// invalid; no task is spawned in that case.
    pub fn from_config(
        config: &ActivityConfig,
        client: HttpClient,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, JoinHandle<()>), CrossoverError> {
        if config.flush_interval == 0 {
            return Err(CrossoverError::ZeroSetting {
                field: "activity.flush_interval",
            });
        }
        let extractor = RequestKeyExtractor::new(&config.pattern)?;
        let collector = HttpCollector::new(
            client,
            &config.remote_address,
            &config.api_key,
            Duration::from_secs(config.timeout),
        )?;
        let pool = Arc::new(BufferPool::for_ceiling(config.max_body_size));

        let settings = PipelineSettings {
            name: "activity",
            buffer_size: config.buffer_size,
            batch_size: config.batch_size,
            flush_interval: Duration::from_secs(config.flush_interval),
            encoding: BatchEncoding::Array,
        };
        let (handle, task) =
            telemetry::spawn(settings, Arc::new(collector), Arc::clone(&pool), shutdown);

        tracing::info!(
            pattern = extractor.as_str(),
            remote = %config.remote_address,
            buffer_size = config.buffer_size,
            batch_size = config.batch_size,
            flush_interval_secs = config.flush_interval,
            "activity tracking enabled"
        );

        Ok((
            Self::new(extractor, handle, pool, config.max_body_size),
            task,
        ))
    }

    #[must_use]
    pub fn stats(&self) -> Arc<TelemetryStats> {
        self.telemetry.stats()
    }
}

impl std::fmt::Debug for ActivityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityTracker")
            .field("pattern", &self.extractor.as_str())
            .field("max_body_size", &self.max_body_size)
            .finish_non_exhaustive()
    }
}

/// Records `{request_id, count}` for the request and forwards it unchanged.
///
/// Only a failure to read the inbound body stops the request, with a 500.
pub async fn track_activity(
    State(tracker): State<Arc<ActivityTracker>>,
    req: Request,
    next: Next,
) -> Response {
    let (parts, body) = req.into_parts();

    let intercepted = match body::intercept(body, tracker.max_body_size, &tracker.pool).await {
        Ok(intercepted) => intercepted,
        Err(e) => {
            tracing::error!(path = %parts.uri.path(), error = %e, "error reading request body");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error reading request body")
                .into_response();
        }
    };

    if intercepted.truncated() {
        tracing::debug!(
            path = %parts.uri.path(),
            ceiling = tracker.max_body_size,
            "request body truncated"
        );
    }

    let entry = LogEntry {
        request_id: tracker.extractor.extract(parts.uri.path()).to_string(),
        count: count_sub_requests(
            parts.headers.get(CONTENT_TYPE),
            &intercepted.telemetry_copy(),
        ),
    };
    tracker.telemetry.record(entry);

    next.run(intercepted.into_request(parts)).await
}
