//! Test fixtures and data factories for backend tests
//!
//! Provides reusable test data for:
//! - Nodes and their volumes
//! - Schedules
//! - Pre-built run records

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use volume_keeper_backend::models::backup::{BackupRun, BackupStatus, StorageKind};
use volume_keeper_backend::models::node::{AuthMode, NodeRequest};
use volume_keeper_backend::models::schedule::ScheduleRequest;

/// Workload id used as a volume name in safe-stop tests.
pub const WORKLOAD_A: &str = "5b0c6a8e-3f1d-4c2b-9e7a-1d2c3b4a5f60";
pub const WORKLOAD_B: &str = "8f9e0d1c-2b3a-4c5d-8e7f-6a5b4c3d2e1f";

pub fn node_request(name: &str) -> NodeRequest {
    NodeRequest {
        name: name.to_string(),
        host: "10.0.0.5".to_string(),
        port: Some(2222),
        username: "root".to_string(),
        auth_mode: AuthMode::Password,
        credential: Some("s3cret-password".to_string()),
        volumes_path: Some("/srv/volumes".to_string()),
    }
}

pub fn schedule_request(node_id: Uuid, cron: &str, retention: i32) -> ScheduleRequest {
    ScheduleRequest {
        name: "nightly".to_string(),
        node_id,
        cron_expression: cron.to_string(),
        storage: StorageKind::Local,
        retention_count: retention,
        enabled: true,
    }
}

/// A completed local run created `age_minutes` ago.
pub fn completed_run(node_id: Uuid, age_minutes: i64) -> BackupRun {
    let created_at: DateTime<Utc> = Utc::now() - Duration::minutes(age_minutes);
    BackupRun {
        id: Uuid::new_v4(),
        node_id,
        volume: "all-volumes".to_string(),
        storage: StorageKind::Local,
        filename: format!("alpha-all-volumes-{}.tar.gz", age_minutes),
        status: BackupStatus::Completed,
        progress: 100,
        error_message: None,
        size_bytes: Some(1024),
        storage_path: Some(format!("/backups/alpha-all-volumes-{}.tar.gz", age_minutes)),
        started_at: Some(created_at),
        completed_at: Some(created_at),
        created_at,
    }
}

/// A run left `running` by a crashed process.
pub fn running_run(node_id: Uuid) -> BackupRun {
    BackupRun {
        status: BackupStatus::Running,
        progress: 45,
        storage_path: None,
        size_bytes: None,
        completed_at: None,
        ..completed_run(node_id, 1)
    }
}
