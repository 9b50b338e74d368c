//! Telemetry initialization: tracing subscriber writing to stdout.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the crate and binary log at
/// `log_level` and sqlx queries at warn.
pub fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directives(log_level).into())
}

fn default_directives(log_level: &str) -> String {
    format!(
        "volume_keeper_backend={level},volume_keeper={level},sqlx::query=warn",
        level = log_level
    )
}
