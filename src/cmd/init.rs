//! `crossover init`: write a starter configuration file.
//!
//! The templates enable both middleware against local services with
//! placeholder API keys, so the result validates as-is.

use std::path::PathBuf;

use crate::cli::{ConfigFormat, InitArgs};
use crate::error::CrossoverError;

pub fn execute(args: &InitArgs) -> Result<(), CrossoverError> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("crossover.{}", args.format.extension())));

    if output.exists() && !args.force {
        return Err(CrossoverError::FileExists { path: output });
    }

    std::fs::write(&output, template(&args.format))?;
    println!("Created {}", output.display());
    Ok(())
}

#[must_use]
pub const fn template(format: &ConfigFormat) -> &'static str {
    match format {
        ConfigFormat::Yaml => YAML_TEMPLATE,
        ConfigFormat::Json => JSON_TEMPLATE,
        ConfigFormat::Toml => TOML_TEMPLATE,
    }
}

const YAML_TEMPLATE: &str = r#"# crossover config
#
# Values shown commented out are the defaults.

upstream:
  url: "http://localhost:8080"
  # timeout: 30000             # ms

# defaults:
#   forward_headers: true      # Forward client headers upstream
#   proxy_headers: true        # Add X-Forwarded-*, Via, X-Correlation-Id
#   strip_hop_by_hop: true     # Strip Connection, TE, etc.
#   headers:
#     add: {}
#     strip: []

# Report {request_id, count} for every request to a collector.
activity:
  pattern: "([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})"
  remote_address: "http://localhost:8082/api/v1/activity"
  api_key: "change-me"         # or ACTIVITY_API_KEY
  # buffer_size: 100000        # queued entries before drops
  # batch_size: 20
  # flush_interval: 2          # seconds
  # max_body_size: 2097152     # bytes inspected per request
  # timeout: 10                # seconds

# Enforce per-user plan limits.
rate_limit:
  api_key: "change-me"         # or RATE_LIMIT_API_KEY
  # request_id_pattern: "([a-z0-9]{42})"
  # store_url: "http://localhost:8083/api/v1/endpoints/stats"
  # plan_limit_url: "http://localhost:8083/api/v1/subscriptions/:userId/request-limit"
  # refresh_interval: 60       # seconds
  # idle_ttl: 3600             # seconds
  # timeout: 5                 # seconds
  # fail_open: true
"#;

const JSON_TEMPLATE: &str = r#"{
  "upstream": {
    "url": "http://localhost:8080",
    "timeout": 30000
  },
  "activity": {
    "pattern": "([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})",
    "remote_address": "http://localhost:8082/api/v1/activity",
    "api_key": "change-me",
    "buffer_size": 100000,
    "batch_size": 20,
    "flush_interval": 2,
    "max_body_size": 2097152,
    "timeout": 10
  },
  "rate_limit": {
    "request_id_pattern": "([a-z0-9]{42})",
    "store_url": "http://localhost:8083/api/v1/endpoints/stats",
    "plan_limit_url": "http://localhost:8083/api/v1/subscriptions/:userId/request-limit",
    "api_key": "change-me",
    "refresh_interval": 60,
    "idle_ttl": 3600,
    "timeout": 5,
    "fail_open": true
  }
}
"#;

const TOML_TEMPLATE: &str = r#"# crossover config
#
# Values shown commented out are the defaults.

[upstream]
url = "http://localhost:8080"
# timeout = 30000

# [defaults]
# forward_headers = true
# proxy_headers = true
# strip_hop_by_hop = true

[activity]
pattern = "([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})"
remote_address = "http://localhost:8082/api/v1/activity"
api_key = "change-me"
# buffer_size = 100000
# batch_size = 20
# flush_interval = 2
# max_body_size = 2097152
# timeout = 10

[rate_limit]
api_key = "change-me"
# request_id_pattern = "([a-z0-9]{42})"
# store_url = "http://localhost:8083/api/v1/endpoints/stats"
# plan_limit_url = "http://localhost:8083/api/v1/subscriptions/:userId/request-limit"
# refresh_interval = 60
# idle_ttl = 3600
# timeout = 5
# fail_open = true
"#;
