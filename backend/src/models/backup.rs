//! Backup run and log entry models.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Volume selector sentinel meaning every volume on the node.
pub const ALL_VOLUMES: &str = "all-volumes";

/// File suffix of every backup artifact.
pub const ARTIFACT_SUFFIX: &str = ".tar.gz";

/// Backup run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "backup_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BackupStatus::Completed | BackupStatus::Failed)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupStatus::Pending => write!(f, "pending"),
            BackupStatus::Running => write!(f, "running"),
            BackupStatus::Completed => write!(f, "completed"),
            BackupStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Destination of a backup artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "storage_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Directory on the local filesystem
    Local,
    /// S3-compatible object storage
    S3,
    /// Remote filesystem reached over SFTP
    Sftp,
}

impl StorageKind {
    pub const ALL: [StorageKind; 3] = [StorageKind::Local, StorageKind::S3, StorageKind::Sftp];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::S3 => "s3",
            StorageKind::Sftp => "sftp",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(StorageKind::Local),
            "s3" => Ok(StorageKind::S3),
            "sftp" => Ok(StorageKind::Sftp),
            other => Err(AppError::Validation(format!(
                "Unknown storage kind: {}",
                other
            ))),
        }
    }
}

/// Which volumes of a node a run copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSelector {
    All,
    Named(String),
}

impl VolumeSelector {
    /// Parse and validate a selector. Named volumes must be a single path segment.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() || value == ALL_VOLUMES {
            return Ok(VolumeSelector::All);
        }
        if value == "." || value == ".." || value.contains('/') || value.contains('\\') {
            return Err(AppError::Validation(format!(
                "Invalid volume name: {}",
                value
            )));
        }
        Ok(VolumeSelector::Named(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            VolumeSelector::All => ALL_VOLUMES,
            VolumeSelector::Named(name) => name,
        }
    }
}

impl fmt::Display for VolumeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the artifact filename for a run.
///
/// `{node}-{selector}-{timestamp}.tar.gz`, where the RFC 3339 timestamp has
/// `:` and `.` replaced by `-` so it is safe on every backend.
pub fn artifact_filename(node_name: &str, selector: &VolumeSelector, at: DateTime<Utc>) -> String {
    let timestamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{}-{}-{}{}", node_name, selector, timestamp, ARTIFACT_SUFFIX)
}

/// One execution of the backup pipeline.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BackupRun {
    pub id: Uuid,
    pub node_id: Uuid,
    pub volume: String,
    pub storage: StorageKind,
    pub filename: String,
    pub status: BackupStatus,
    pub progress: i32,
    pub error_message: Option<String>,
    pub size_bytes: Option<i64>,
    pub storage_path: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BackupRun {
    /// Parse the stored volume name; a corrupt value is a validation error.
    pub fn selector(&self) -> Result<VolumeSelector> {
        VolumeSelector::parse(&self.volume)
    }
}

/// Values needed to insert a run record.
#[derive(Debug, Clone)]
pub struct NewBackupRun {
    pub node_id: Uuid,
    pub volume: VolumeSelector,
    pub storage: StorageKind,
    pub filename: String,
    pub status: BackupStatus,
}

/// Severity of a run log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "log_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Append-only log line attached to a run.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BackupLogEntry {
    pub id: i64,
    pub backup_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counters over all runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow, Serialize)]
pub struct BackupStats {
    pub total: i64,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub total_size_bytes: i64,
}
