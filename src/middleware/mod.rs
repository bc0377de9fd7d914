//! Request middleware placed in front of the upstream forwarder.
//!
//! [`activity`] observes each request and reports `{request_id, count}` to
//! a collector; [`rate_limit`] admits or rejects requests against per-user
//! plan limits. Both are plain `axum::middleware::from_fn_with_state`
//! functions so they compose with any router. The remaining submodules are
//! the building blocks they share.

pub mod activity;
pub mod body;
pub mod counter;
pub mod extract;
pub mod rate_limit;

use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::model::Config;
use crate::error::CrossoverError;
use crate::server::HttpClient;
use activity::ActivityTracker;
use rate_limit::RateLimiter;

/// The middleware enabled by a config, plus the background tasks they own.
#[derive(Debug, Default, Clone)]
pub struct MiddlewareStack {
    pub activity: Option<Arc<ActivityTracker>>,
    pub rate_limit: Option<Arc<RateLimiter>>,
}

impl MiddlewareStack {
    /// Builds every configured middleware and spawns its tasks.
    ///
    /// The returned handles finish once `shutdown` flips to `true` and the
    /// telemetry queues have drained.
    pub fn from_config(
        config: &Config,
        client: &HttpClient,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(Self, Vec<JoinHandle<()>>), CrossoverError> {
        let mut stack = Self::default();
        let mut tasks = Vec::new();

        if let Some(ref activity) = config.activity {
            let (tracker, task) =
                ActivityTracker::from_config(activity, client.clone(), shutdown.clone())?;
            stack.activity = Some(Arc::new(tracker));
            tasks.push(task);
        }

        if let Some(ref rate_limit) = config.rate_limit {
            let (limiter, limiter_tasks) =
                RateLimiter::from_config(rate_limit, client.clone(), shutdown.clone())?;
            stack.rate_limit = Some(Arc::new(limiter));
            tasks.extend(limiter_tasks);
        }

        Ok((stack, tasks))
    }

    /// Wraps `router` with the enabled middleware.
    ///
    /// Rate limiting runs first, so rejected requests never reach activity
    /// tracking.
    pub fn apply<S>(&self, mut router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        if let Some(ref tracker) = self.activity {
            router = router.layer(axum::middleware::from_fn_with_state(
                Arc::clone(tracker),
                activity::track_activity,
            ));
        }
        if let Some(ref limiter) = self.rate_limit {
            router = router.layer(axum::middleware::from_fn_with_state(
                Arc::clone(limiter),
                rate_limit::enforce_rate_limit,
            ));
        }
        router
    }
}
