//! Periodic plan-limit refresh and idle eviction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::plan::PlanLimitSource;
use super::UsageCache;

/// Spawns the refresh loop. It stops when `shutdown` fires.
pub fn spawn(
    cache: Arc<UsageCache>,
    plans: Arc<dyn PlanLimitSource>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(refresh_loop(cache, plans, interval, shutdown))
}

async fn refresh_loop(
    cache: Arc<UsageCache>,
    plans: Arc<dyn PlanLimitSource>,
    interval_duration: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(interval_duration);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                tracing::debug!("plan limit refresh loop shutting down");
                return;
            }
        }

        refresh_once(&cache, plans.as_ref()).await;
    }
}

/// Evicts idle users, then re-fetches the plan limit of everyone left.
pub async fn refresh_once(cache: &UsageCache, plans: &dyn PlanLimitSource) {
    let evicted = cache.evict_idle(Instant::now());
    if evicted > 0 {
        tracing::debug!(evicted, "evicted idle usage records");
    }

    // Keys are collected first so no shard lock is held across an await.
    let users = cache.user_ids();
    let mut refreshed = 0usize;
    for user_id in &users {
        match plans.fetch_plan_limit(user_id).await {
            Ok(limit) => {
                if cache.refresh_plan_limit(user_id, limit) {
                    refreshed += 1;
                }
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "plan limit refresh failed");
            }
        }
    }

    tracing::debug!(users = users.len(), refreshed, "plan limits refreshed");
}
