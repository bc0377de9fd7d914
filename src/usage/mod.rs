//! Per-user usage tracking for the rate-limit middleware.
//!
//! [`UsageCache`] maps a user id to its current usage and plan limit. The
//! request path admits or rejects under the map's shard lock, so concurrent
//! requests for the same user never lose an increment. Plan limits come
//! from a [`PlanLimitSource`](plan::PlanLimitSource) and are refreshed in
//! place by the task in [`refresh`], which also evicts idle users.

pub mod plan;
pub mod refresh;

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
struct UsageRecord {
    usage: i64,
    plan_limit: i64,
    last_seen: Instant,
}

/// Point-in-time view of one user's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub usage: i64,
    pub plan_limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was counted; `usage` is the value after the increment.
    Admitted { usage: i64, plan_limit: i64 },
    /// The user has used up the plan.
    Rejected { usage: i64, plan_limit: i64 },
    /// No record exists; the plan limit must be fetched first.
    Unknown,
}

#[derive(Debug)]
pub struct UsageCache {
    records: DashMap<String, UsageRecord>,
    idle_ttl: Duration,
}

impl UsageCache {
    #[must_use]
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            idle_ttl,
        }
    }

    /// Counts one request against `user_id`'s plan.
    ///
    /// A user whose usage has reached the plan limit is rejected and the
    /// usage is left unchanged.
    pub fn try_acquire(&self, user_id: &str) -> Admission {
        let Some(mut record) = self.records.get_mut(user_id) else {
            return Admission::Unknown;
        };
        record.last_seen = Instant::now();
        if record.usage >= record.plan_limit {
            return Admission::Rejected {
                usage: record.usage,
                plan_limit: record.plan_limit,
            };
        }
        record.usage += 1;
        Admission::Admitted {
            usage: record.usage,
            plan_limit: record.plan_limit,
        }
    }

    /// Sets the plan limit, creating the record with zero usage if needed.
    pub fn set_plan_limit(&self, user_id: &str, plan_limit: i64) {
        self.records
            .entry(user_id.to_string())
            .and_modify(|record| record.plan_limit = plan_limit)
            .or_insert_with(|| UsageRecord {
                usage: 0,
                plan_limit,
                last_seen: Instant::now(),
            });
    }

    /// Overwrites the plan limit of an existing record only.
    ///
    /// Returns `false` when the user has been evicted in the meantime.
    pub fn refresh_plan_limit(&self, user_id: &str, plan_limit: i64) -> bool {
        self.records
            .get_mut(user_id)
            .map(|mut record| record.plan_limit = plan_limit)
            .is_some()
    }

    /// Drops records not seen for longer than the idle TTL.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| now.saturating_duration_since(record.last_seen) <= self.idle_ttl);
        before.saturating_sub(self.records.len())
    }

    #[must_use]
    pub fn user_ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    #[must_use]
    pub fn snapshot(&self, user_id: &str) -> Option<UsageSnapshot> {
        self.records.get(user_id).map(|record| UsageSnapshot {
            usage: record.usage,
            plan_limit: record.plan_limit,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    fn seed(&self, user_id: &str, usage: i64, plan_limit: i64) {
        self.records.insert(
            user_id.to_string(),
            UsageRecord {
                usage,
                plan_limit,
                last_seen: Instant::now(),
            },
        );
    }
}
