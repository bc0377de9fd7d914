//! Rate-limit middleware: admit requests against each user's plan limit.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::extract::{user_id_from_request_id, RequestKeyExtractor};
use crate::buffer_pool::BufferPool;
use crate::config::model::RateLimitConfig;
use crate::error::CrossoverError;
use crate::server::HttpClient;
use crate::telemetry::{
    self, BatchEncoding, HttpCollector, LogEntry, PipelineSettings, TelemetryHandle,
    TelemetryStats,
};
use crate::usage::plan::{HttpPlanLimitSource, PlanLimitSource};
use crate::usage::{refresh, Admission, UsageCache};

/// Header carrying a fresh UUID on every admitted request.
pub const REQUEST_UUID_HEADER: &str = "x-uuid";

/// Queue capacity of the usage-store reporting pipeline.
const STORE_BUFFER_SIZE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Reject,
    /// Plan limit could not be fetched and fail-open is disabled.
    Unavailable,
}

pub struct RateLimiter {
    extractor: RequestKeyExtractor,
    cache: Arc<UsageCache>,
    plans: Arc<dyn PlanLimitSource>,
    store: TelemetryHandle,
    fail_open: bool,
}

impl RateLimiter {
    #[must_use]
    pub fn new(
        extractor: RequestKeyExtractor,
        cache: Arc<UsageCache>,
        plans: Arc<dyn PlanLimitSource>,
        store: TelemetryHandle,
        fail_open: bool,
    ) -> Self {
        Self {
            extractor,
            cache,
            plans,
            store,
            fail_open,
        }
    }

    /// Builds the limiter, its usage-store pipeline and its refresh loop.
    pub fn from_config(
        config: &RateLimitConfig,
        client: HttpClient,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, Vec<JoinHandle<()>>), CrossoverError> {
        // A zero period would panic inside the refresh task.
        if config.refresh_interval == 0 {
            return Err(CrossoverError::ZeroSetting {
                field: "rate_limit.refresh_interval",
            });
        }
        let timeout = Duration::from_secs(config.timeout);
        let extractor = RequestKeyExtractor::new(&config.request_id_pattern)?;
        let plans: Arc<dyn PlanLimitSource> = Arc::new(HttpPlanLimitSource::new(
            client.clone(),
            &config.plan_limit_url,
            &config.api_key,
            timeout,
        )?);
        let store = HttpCollector::new(client, &config.store_url, &config.api_key, timeout)?;
        let cache = Arc::new(UsageCache::new(Duration::from_secs(config.idle_ttl)));

        let settings = PipelineSettings {
            name: "usage-store",
            buffer_size: STORE_BUFFER_SIZE,
            batch_size: 1,
            flush_interval: Duration::from_secs(1),
            encoding: BatchEncoding::Single,
        };
        let pool = Arc::new(BufferPool::for_ceiling(4 * 1024));
        let (store, store_task) =
            telemetry::spawn(settings, Arc::new(store), pool, shutdown.clone());

        let refresh_task = refresh::spawn(
            Arc::clone(&cache),
            Arc::clone(&plans),
            Duration::from_secs(config.refresh_interval),
            shutdown,
        );

        tracing::info!(
            pattern = extractor.as_str(),
            plan_limit_url = %config.plan_limit_url,
            refresh_interval_secs = config.refresh_interval,
            fail_open = config.fail_open,
            "rate limiting enabled"
        );

        Ok((
            Self::new(extractor, cache, plans, store, config.fail_open),
            vec![store_task, refresh_task],
        ))
    }

    /// Decides whether `user_id` may make one more request, counting it if so.
    ///
    /// Users without a record get their plan limit fetched first.
    pub async fn admit(&self, user_id: &str) -> Decision {
        match self.cache.try_acquire(user_id) {
            Admission::Admitted { .. } => return Decision::Allow,
            Admission::Rejected { usage, plan_limit } => {
                tracing::debug!(user_id, usage, plan_limit, "plan limit reached");
                return Decision::Reject;
            }
            Admission::Unknown => {}
        }

        match self.plans.fetch_plan_limit(user_id).await {
            Ok(limit) => self.cache.set_plan_limit(user_id, limit),
            Err(e) => {
                tracing::warn!(
                    user_id,
                    error = %e,
                    fail_open = self.fail_open,
                    "plan limit lookup failed"
                );
                return if self.fail_open {
                    Decision::Allow
                } else {
                    Decision::Unavailable
                };
            }
        }

        match self.cache.try_acquire(user_id) {
            Admission::Rejected { usage, plan_limit } => {
                tracing::debug!(user_id, usage, plan_limit, "plan limit reached");
                Decision::Reject
            }
            // Unknown here means the record was evicted right after insert.
            Admission::Admitted { .. } | Admission::Unknown => Decision::Allow,
        }
    }

    #[must_use]
    pub fn usage(&self) -> &Arc<UsageCache> {
        &self.cache
    }

    #[must_use]
    pub fn store_stats(&self) -> Arc<TelemetryStats> {
        self.store.stats()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("pattern", &self.extractor.as_str())
            .field("tracked_users", &self.cache.len())
            .field("fail_open", &self.fail_open)
            .finish_non_exhaustive()
    }
}

/// Enforces the caller's plan limit before forwarding.
///
/// 400 when no user id can be derived from the path, 429 once the plan is
/// used up, 503 when the plan is unknown and fail-open is off.
pub async fn enforce_rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = limiter.extractor.extract(req.uri().path()).to_string();
    let Some(user_id) = user_id_from_request_id(&request_id) else {
        tracing::debug!(path = %req.uri().path(), "request id missing or malformed");
        return (StatusCode::BAD_REQUEST, "invalid requestId").into_response();
    };
    let user_id = user_id.to_string();

    match limiter.admit(&user_id).await {
        Decision::Allow => {}
        Decision::Reject => {
            return (StatusCode::TOO_MANY_REQUESTS, "too many requests").into_response();
        }
        Decision::Unavailable => {
            return (StatusCode::SERVICE_UNAVAILABLE, "rate limit unavailable").into_response();
        }
    }

    limiter.store.record(LogEntry {
        request_id,
        count: 1,
    });

    if let Ok(value) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
        req.headers_mut().insert(REQUEST_UUID_HEADER, value);
    }
    next.run(req).await
}
