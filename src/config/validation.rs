//! Configuration validation with detailed error reporting.
//!
//! [`validate`] checks a parsed [`Config`] for problems serde cannot catch:
//! malformed URLs, patterns that do not compile, missing API keys, zero
//! sizes and intervals, and a plan-limit URL without its `:userId`
//! placeholder. Every problem is reported, each with an optional suggestion.

use axum::http::HeaderName;
use regex::Regex;
use url::Url;

use super::model::{ActivityConfig, Config, RateLimitConfig};
use crate::error::ValidationError;
use crate::usage::plan::USER_ID_PLACEHOLDER;

/// Validate an http(s) URL. Returns `Ok(())` or a human-readable error.
pub fn validate_http_url(url: &str) -> Result<(), String> {
    match Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            if scheme != "http" && scheme != "https" {
                Err(format!(
                    "unsupported scheme '{scheme}' (expected http or https)"
                ))
            } else {
                Ok(())
            }
        }
        Err(_) => Err(format!("'{url}' is not a valid URL")),
    }
}

/// Validate a request-path pattern. Returns `Ok(())` or a human-readable error.
pub fn validate_pattern(pattern: &str) -> Result<(), String> {
    if pattern.is_empty() {
        return Err("pattern can't be empty".into());
    }
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| format!("invalid regex: {e}"))
}

struct Report {
    errors: Vec<ValidationError>,
}

impl Report {
    fn push(&mut self, section: &str, field: &str, message: String, suggestion: Option<String>) {
        self.errors.push(ValidationError {
            section: section.into(),
            field: field.into(),
            message,
            suggestion,
        });
    }

    fn url(&mut self, section: &str, field: &str, url: &str) {
        if let Err(msg) = validate_http_url(url) {
            self.push(section, field, msg, None);
        }
    }

    fn pattern(&mut self, section: &str, field: &str, pattern: &str) {
        if let Err(msg) = validate_pattern(pattern) {
            self.push(section, field, msg, None);
        }
    }

    fn positive(&mut self, section: &str, field: &str, value: u64) {
        if value == 0 {
            self.push(section, field, "must be greater than 0".into(), None);
        }
    }

    fn api_key(&mut self, section: &str, key: &str, env: &str) {
        if key.is_empty() {
            self.push(
                section,
                "api_key",
                "api key can't be empty".into(),
                Some(format!("set it in the file or via {env}")),
            );
        }
    }
}

pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut report = Report { errors: Vec::new() };

    report.url("upstream", "url", &config.upstream.url);
    report.positive("upstream", "timeout", config.upstream.timeout);

    for name in config.defaults.headers.add.keys() {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            report.push(
                "defaults",
                "headers.add",
                format!("'{name}' is not a valid header name"),
                None,
            );
        }
    }

    if let Some(ref activity) = config.activity {
        validate_activity(&mut report, activity);
    }
    if let Some(ref rate_limit) = config.rate_limit {
        validate_rate_limit(&mut report, rate_limit);
    }

    if report.errors.is_empty() {
        Ok(())
    } else {
        Err(report.errors)
    }
}

fn validate_activity(report: &mut Report, activity: &ActivityConfig) {
    const SECTION: &str = "activity";

    report.pattern(SECTION, "pattern", &activity.pattern);
    if activity.remote_address.is_empty() {
        report.push(
            SECTION,
            "remote_address",
            "remote address can't be empty".into(),
            None,
        );
    } else {
        report.url(SECTION, "remote_address", &activity.remote_address);
    }
    report.api_key(
        SECTION,
        &activity.api_key,
        super::model::ACTIVITY_API_KEY_ENV,
    );
    report.positive(SECTION, "buffer_size", activity.buffer_size as u64);
    report.positive(SECTION, "batch_size", activity.batch_size as u64);
    report.positive(SECTION, "flush_interval", activity.flush_interval);
    report.positive(SECTION, "max_body_size", activity.max_body_size as u64);
    report.positive(SECTION, "timeout", activity.timeout);

    if activity.batch_size > activity.buffer_size {
        report.push(
            SECTION,
            "batch_size",
            format!(
                "batch_size {} exceeds buffer_size {}",
                activity.batch_size, activity.buffer_size
            ),
            None,
        );
    }
}

fn validate_rate_limit(report: &mut Report, rate_limit: &RateLimitConfig) {
    const SECTION: &str = "rate_limit";

    report.pattern(SECTION, "request_id_pattern", &rate_limit.request_id_pattern);
    report.url(SECTION, "store_url", &rate_limit.store_url);

    if rate_limit.plan_limit_url.contains(USER_ID_PLACEHOLDER) {
        let sample_url = rate_limit
            .plan_limit_url
            .replacen(USER_ID_PLACEHOLDER, "user", 1);
        if let Err(msg) = validate_http_url(&sample_url) {
            report.push(SECTION, "plan_limit_url", msg, None);
        }
    } else {
        report.push(
            SECTION,
            "plan_limit_url",
            format!("missing the {USER_ID_PLACEHOLDER} placeholder"),
            Some(format!(
                "e.g. '{}/{USER_ID_PLACEHOLDER}/request-limit'",
                rate_limit.plan_limit_url.trim_end_matches('/')
            )),
        );
    }

    report.api_key(
        SECTION,
        &rate_limit.api_key,
        super::model::RATE_LIMIT_API_KEY_ENV,
    );
    report.positive(SECTION, "refresh_interval", rate_limit.refresh_interval);
    report.positive(SECTION, "idle_ttl", rate_limit.idle_ttl);
    report.positive(SECTION, "timeout", rate_limit.timeout);
}

#[must_use]
pub fn format_validation_report(path: &str, config: &Config) -> String {
    let middleware = config.enabled_middleware();
    let mut lines = vec![format!(
        "  upstream: {} (timeout {}ms)",
        config.upstream.url, config.upstream.timeout
    )];
    lines.push(format!(
        "  middleware: {}",
        if middleware.is_empty() {
            "none".to_string()
        } else {
            middleware.join(" -> ")
        }
    ));

    if let Some(ref activity) = config.activity {
        lines.push(format!("  activity: {}", activity.remote_address));
        lines.push(format!("    pattern: {}", activity.pattern));
        lines.push(format!(
            "    batch: {} entries or {}s, queue {}",
            activity.batch_size, activity.flush_interval, activity.buffer_size
        ));
        lines.push(format!("    max body: {} bytes", activity.max_body_size));
    }

    if let Some(ref rate_limit) = config.rate_limit {
        lines.push(format!("  rate_limit: {}", rate_limit.plan_limit_url));
        lines.push(format!("    pattern: {}", rate_limit.request_id_pattern));
        lines.push(format!("    store: {}", rate_limit.store_url));
        lines.push(format!(
            "    refresh: {}s, idle ttl {}s, fail {}",
            rate_limit.refresh_interval,
            rate_limit.idle_ttl,
            if rate_limit.fail_open { "open" } else { "closed" }
        ));
    }

    format!("{} is valid\n{}", path, lines.join("\n"))
}
