//! Logging setup
//!
//! Two sinks: a human-readable stdout layer and a rolling file, the latter
//! switchable to JSON for log shipping. Chatty dependency targets are
//! capped at WARN unless `RUST_LOG` overrides the whole filter.

use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependency targets that drown out service logs at DEBUG/INFO.
const QUIET_TARGETS: [&str; 3] = ["sqlx", "lapin", "hyper"];

/// Filter directives for the configured base level, with the noisy
/// dependency targets pinned to WARN.
fn base_directives(level: &str) -> String {
    let mut directives = level.to_string();
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{}=warn", target));
    }
    directives
}

fn file_appender(config: &AppConfig) -> RollingFileAppender {
    let rotation = match config.rotation.as_str() {
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    };
    RollingFileAppender::new(rotation, &config.log_dir, &config.log_file)
}

/// Install the global subscriber. The returned guard flushes the file sink
/// on drop; hold it for the life of the process.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(config));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(base_directives(&config.log_level)));

    let stdout_layer = fmt::layer().with_target(false);
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer);

    if config.use_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(file_writer)
                    .with_ansi(false),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(file_writer)
                    .with_ansi(false),
            )
            .init();
    }

    guard
}
