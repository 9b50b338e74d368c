//! Backup schedule model.
//!
//! Schedules define recurring backups of every volume on a node using cron
//! expressions, with a per-schedule retention count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::backup::StorageKind;

/// Recurring backup instruction.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Schedule {
    pub id: Uuid,
    pub name: String,
    pub node_id: Uuid,
    pub cron_expression: String,
    pub storage: StorageKind,
    /// Number of completed backups kept for this node and storage kind
    pub retention_count: i32,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create or update payload for a schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub name: String,
    pub node_id: Uuid,
    pub cron_expression: String,
    pub storage: StorageKind,
    pub retention_count: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ScheduleRequest {
    /// Field checks that do not need the cron parser or the store.
    pub fn validate_fields(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("Schedule name is required".into()));
        }
        if self.cron_expression.trim().is_empty() {
            return Err(AppError::Validation("Cron expression is required".into()));
        }
        if self.retention_count < 1 {
            return Err(AppError::Validation(
                "Retention count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
