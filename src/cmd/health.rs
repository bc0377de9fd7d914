//! `crossover health`: query `GET /health` on a running instance.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;

use crate::cli::HealthArgs;
use crate::error::CrossoverError;
use crate::health::HealthResponse;
use crate::outbound;
use crate::server::build_http_client;
use crate::telemetry::TelemetrySnapshot;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn execute(args: HealthArgs) -> Result<(), CrossoverError> {
    let url = format!("{}/health", args.url.trim_end_matches('/'));
    let uri: hyper::Uri = url.parse().map_err(|e: hyper::http::uri::InvalidUri| {
        CrossoverError::UriParse {
            source: Box::new(e),
        }
    })?;

    let req = hyper::Request::builder()
        .uri(uri)
        .body(Full::new(Bytes::new()))
        .map_err(|e| CrossoverError::HttpRequest {
            source: Box::new(e),
        })?;

    let exchanged = outbound::exchange(&build_http_client(), req, HEALTH_TIMEOUT)
        .await
        .map_err(|e| CrossoverError::HttpRequest {
            source: Box::new(e),
        })?;

    if !exchanged.status.is_success() {
        return Err(CrossoverError::HealthCheckFailed(exchanged.status));
    }

    if args.json {
        println!("{}", String::from_utf8_lossy(&exchanged.body));
        return Ok(());
    }

    match serde_json::from_slice::<HealthResponse>(&exchanged.body) {
        Ok(health) => print_report(&args.url, &health),
        Err(e) => {
            eprintln!("Failed to parse health response: {e}");
            println!("{}", String::from_utf8_lossy(&exchanged.body));
        }
    }

    Ok(())
}

fn print_report(url: &str, health: &HealthResponse) {
    println!("\u{2713} crossover is healthy ({url})");
    println!("  uptime:         {}", format_uptime(health.uptime_seconds));
    println!("  config source:  {}", health.config.source);
    println!(
        "  config version: {} (loaded {}s ago)",
        health.config.version, health.config.loaded_ago_seconds
    );
    println!("  upstream:       {}", health.config.upstream);
    println!(
        "  requests:       {} forwarded, {} failed",
        health.stats.requests_forwarded, health.stats.requests_failed
    );
    if let Some(ref activity) = health.activity {
        println!("  activity:       {}", format_pipeline(activity));
    }
    if let Some(ref rate_limit) = health.rate_limit {
        println!(
            "  rate limit:     {} users tracked, store {}",
            rate_limit.tracked_users,
            format_pipeline(&rate_limit.usage_store)
        );
    }
}

fn format_pipeline(snapshot: &TelemetrySnapshot) -> String {
    format!(
        "{} queued, {} dropped, {} delivered, {} failed",
        snapshot.enqueued, snapshot.dropped, snapshot.entries_delivered, snapshot.delivery_failures
    )
}

fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
