//! Serde data structures for the crossover configuration file.
//!
//! [`Config`] is the root: one [`Upstream`], forwarding [`Defaults`], and the
//! optional [`ActivityConfig`] and [`RateLimitConfig`] sections that switch
//! the middleware on. All types use `deny_unknown_fields`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::middleware::body::MAX_REQUEST_BODY_SIZE;

/// Env var that overrides `activity.api_key`.
pub const ACTIVITY_API_KEY_ENV: &str = "ACTIVITY_API_KEY";

/// Env var that overrides `rate_limit.api_key`.
pub const RATE_LIMIT_API_KEY_ENV: &str = "RATE_LIMIT_API_KEY";

const fn default_upstream_timeout() -> u64 {
    30_000
}

const fn default_true() -> bool {
    true
}

const fn default_buffer_size() -> usize {
    100_000
}

const fn default_batch_size() -> usize {
    20
}

const fn default_flush_interval() -> u64 {
    2
}

const fn default_max_body_size() -> usize {
    MAX_REQUEST_BODY_SIZE
}

const fn default_collector_timeout() -> u64 {
    10
}

fn default_request_id_pattern() -> String {
    "([a-z0-9]{42})".to_string()
}

fn default_store_url() -> String {
    "http://localhost:8083/api/v1/endpoints/stats".to_string()
}

fn default_plan_limit_url() -> String {
    "http://localhost:8083/api/v1/subscriptions/:userId/request-limit".to_string()
}

const fn default_refresh_interval() -> u64 {
    60
}

const fn default_idle_ttl() -> u64 {
    3600
}

const fn default_plan_timeout() -> u64 {
    5
}

fn is_true(v: &bool) -> bool {
    *v
}

fn is_default_defaults(v: &Defaults) -> bool {
    v.forward_headers && v.proxy_headers && v.strip_hop_by_hop && v.headers.is_default()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub upstream: Upstream,

    #[serde(default, skip_serializing_if = "is_default_defaults")]
    pub defaults: Defaults,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Config {
    /// Fills API keys from the environment. A set, non-empty variable wins
    /// over the file value.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());
        if let Some(ref mut activity) = self.activity {
            if let Some(key) = non_empty(ACTIVITY_API_KEY_ENV) {
                activity.api_key = key;
            }
        }
        if let Some(ref mut rate_limit) = self.rate_limit {
            if let Some(key) = non_empty(RATE_LIMIT_API_KEY_ENV) {
                rate_limit.api_key = key;
            }
        }
    }

    /// Names of the enabled middleware, outermost first.
    #[must_use]
    pub fn enabled_middleware(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.rate_limit.is_some() {
            names.push("rate_limit");
        }
        if self.activity.is_some() {
            names.push("activity");
        }
        names
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Upstream {
    pub url: String,

    /// Milliseconds.
    #[serde(default = "default_upstream_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub forward_headers: bool,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub proxy_headers: bool,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub strip_hop_by_hop: bool,

    #[serde(default, skip_serializing_if = "HeaderRules::is_default")]
    pub headers: HeaderRules,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            forward_headers: default_true(),
            proxy_headers: default_true(),
            strip_hop_by_hop: default_true(),
            headers: HeaderRules::default(),
        }
    }
}

/// Static headers added to, or stripped from, every forwarded request.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderRules {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub add: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strip: Vec<String>,
}

impl HeaderRules {
    fn is_default(&self) -> bool {
        self.add.is_empty() && self.strip.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ActivityConfig {
    /// Regex whose first match in the path is the reported `request_id`.
    pub pattern: String,

    pub remote_address: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds.
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,

    /// Bytes captured per request body.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Seconds.
    #[serde(default = "default_collector_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(default = "default_request_id_pattern")]
    pub request_id_pattern: String,

    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Must contain `:userId`.
    #[serde(default = "default_plan_limit_url")]
    pub plan_limit_url: String,

    #[serde(default)]
    pub api_key: String,

    /// Seconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Seconds a user may stay idle before their record is evicted.
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl: u64,

    /// Seconds.
    #[serde(default = "default_plan_timeout")]
    pub timeout: u64,

    #[serde(default = "default_true")]
    pub fail_open: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            request_id_pattern: default_request_id_pattern(),
            store_url: default_store_url(),
            plan_limit_url: default_plan_limit_url(),
            api_key: String::new(),
            refresh_interval: default_refresh_interval(),
            idle_ttl: default_idle_ttl(),
            timeout: default_plan_timeout(),
            fail_open: default_true(),
        }
    }
}
