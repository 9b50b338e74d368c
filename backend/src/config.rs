//! Application configuration loaded from environment variables.
//!
//! Storage credentials and the workload API endpoint are not part of this
//! struct: they live in the settings table and are read on every operation.

use crate::error::{AppError, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Log level used when `RUST_LOG` is not set
    pub log_level: String,

    /// Base directory of the local storage backend
    pub local_backup_path: PathBuf,

    /// Scratch area for downloaded volumes and temporary archives
    pub scratch_path: PathBuf,

    /// Serialize runs that target the same node
    pub node_lock: bool,

    /// Interval between workload state polls during a safe stop
    pub safe_stop_poll_interval: Duration,

    /// Number of polls before a safe stop gives up waiting
    pub safe_stop_max_attempts: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| AppError::Config("DATABASE_URL not set".into()))?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            local_backup_path: env::var("LOCAL_BACKUP_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/volume-keeper/backups")),
            scratch_path: env::var("SCRATCH_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("volume-keeper")),
            node_lock: env::var("NODE_LOCK")
                .map(|v| parse_bool(&v))
                .unwrap_or(false),
            safe_stop_poll_interval: Duration::from_secs(
                env::var("SAFE_STOP_POLL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            ),
            safe_stop_max_attempts: env::var("SAFE_STOP_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(12),
        })
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
