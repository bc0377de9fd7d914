//! Structured logging setup using the `tracing` ecosystem.
//!
//! JSON output for production, pretty output for a TTY. The format is
//! auto-detected from stdout but can be forced with `--json` or `--pretty`.
//! Filtering uses a `Targets` filter so the noisy HTTP client crates can be
//! held at `warn` while crossover logs at the requested level.

use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[must_use]
pub fn resolve_format(pretty: bool, json: bool) -> LogFormat {
    if json {
        LogFormat::Json
    } else if pretty || std::io::IsTerminal::is_terminal(&std::io::stdout()) {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

/// Targets filter: `level` for everything except the HTTP client internals.
#[must_use]
pub fn filter(level: &LogLevel) -> Targets {
    let level = level.to_tracing_level();
    Targets::new()
        .with_default(level)
        .with_target("hyper_util", level.min(tracing::Level::WARN))
        .with_target("rustls", level.min(tracing::Level::WARN))
}

pub fn init(level: &LogLevel, format: LogFormat) {
    let filter = filter(level);

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(false))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn explicit_json_wins() {
        assert_eq!(resolve_format(true, true), LogFormat::Json);
        assert_eq!(resolve_format(true, false), LogFormat::Pretty);
    }

    #[test]
    fn client_crates_stay_at_warn() {
        let filter = filter(&LogLevel::Debug);
        assert!(filter.would_enable("crossover::telemetry", &Level::DEBUG));
        assert!(!filter.would_enable("hyper_util::client", &Level::DEBUG));
        assert!(filter.would_enable("hyper_util::client", &Level::WARN));
    }

    #[test]
    fn quiet_levels_are_not_raised() {
        let filter = filter(&LogLevel::Error);
        assert!(!filter.would_enable("rustls", &Level::WARN));
    }
}
