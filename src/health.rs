//! `GET /health` endpoint handler.
//!
//! Returns a [`HealthResponse`] JSON payload with the server version,
//! uptime, config metadata, proxy counters and, for each enabled
//! middleware, its telemetry pipeline counters.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::server::AppState;
use crate::telemetry::TelemetrySnapshot;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub config: ConfigHealth,
    pub stats: StatsResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<TelemetrySnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitHealth>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigHealth {
    pub source: String,
    pub version: String,
    pub loaded_ago_seconds: u64,
    pub upstream: String,
    pub middleware: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub requests_forwarded: u64,
    pub requests_failed: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitHealth {
    pub tracked_users: usize,
    pub usage_store: TelemetrySnapshot,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let loaded = &state.config;
    let version = loaded.version.to_string();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        config: ConfigHealth {
            source: loaded.source.clone(),
            version: version.get(..8).unwrap_or(&version).to_string(),
            loaded_ago_seconds: loaded.loaded_at.elapsed().as_secs(),
            upstream: loaded.config.upstream.url.clone(),
            middleware: loaded
                .config
                .enabled_middleware()
                .into_iter()
                .map(String::from)
                .collect(),
        },
        stats: StatsResponse {
            requests_forwarded: state.stats.forwarded.load(Ordering::Relaxed),
            requests_failed: state.stats.failed.load(Ordering::Relaxed),
        },
        activity: state
            .middleware
            .activity
            .as_ref()
            .map(|tracker| tracker.stats().snapshot()),
        rate_limit: state.middleware.rate_limit.as_ref().map(|limiter| RateLimitHealth {
            tracked_users: limiter.usage().len(),
            usage_store: limiter.store_stats().snapshot(),
        }),
    })
}
