//! Record store: persistence for nodes, runs, logs, schedules and settings.
//!
//! The pipeline only talks to the [`RecordStore`] trait. Every write is a
//! single-row update keyed by run, schedule or node id, so concurrent runs
//! need no locking beyond the store's own statement atomicity.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::models::backup::{
    BackupLogEntry, BackupRun, BackupStats, LogLevel, NewBackupRun, StorageKind,
};
use crate::models::node::{Node, NodeRequest, NodeStatus};
use crate::models::schedule::{Schedule, ScheduleRequest};

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

/// Persistence interface consumed by the services.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // Nodes

    async fn create_node(&self, req: &NodeRequest) -> Result<Node>;

    /// Update a node; a `None` credential keeps the stored one.
    async fn update_node(&self, id: Uuid, req: &NodeRequest) -> Result<Node>;

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>>;

    async fn get_node_by_name(&self, name: &str) -> Result<Option<Node>>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Record the outcome of a connectivity check.
    async fn set_node_status(&self, id: Uuid, status: NodeStatus) -> Result<()>;

    async fn delete_node(&self, id: Uuid) -> Result<bool>;

    // Backup runs

    async fn create_run(&self, run: &NewBackupRun) -> Result<BackupRun>;

    async fn get_run(&self, id: Uuid) -> Result<Option<BackupRun>>;

    /// All runs of a node, newest first.
    async fn list_runs_for_node(&self, node_id: Uuid) -> Result<Vec<BackupRun>>;

    /// Completed runs of a node for one storage kind, newest first.
    async fn list_completed_by_node_and_storage(
        &self,
        node_id: Uuid,
        storage: StorageKind,
    ) -> Result<Vec<BackupRun>>;

    async fn list_running(&self) -> Result<Vec<BackupRun>>;

    /// Move a run to `running` with the given progress and a start timestamp.
    async fn mark_running(&self, id: Uuid, progress: i32) -> Result<()>;

    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<()>;

    /// Move a run to `completed`: progress 100, size, locator, completion time.
    async fn mark_completed(&self, id: Uuid, size_bytes: i64, storage_path: &str) -> Result<()>;

    /// Move a run to `failed`: progress 0, error message, no locator.
    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<()>;

    async fn delete_run(&self, id: Uuid) -> Result<bool>;

    async fn aggregate_stats(&self) -> Result<BackupStats>;

    // Run logs

    async fn append_log(&self, backup_id: Uuid, level: LogLevel, message: &str) -> Result<()>;

    /// Log lines of a run in insertion order.
    async fn list_logs(&self, backup_id: Uuid) -> Result<Vec<BackupLogEntry>>;

    // Schedules

    async fn create_schedule(&self, req: &ScheduleRequest) -> Result<Schedule>;

    async fn update_schedule(&self, id: Uuid, req: &ScheduleRequest) -> Result<Schedule>;

    async fn set_schedule_enabled(&self, id: Uuid, enabled: bool) -> Result<Schedule>;

    async fn get_schedule(&self, id: Uuid) -> Result<Option<Schedule>>;

    async fn list_schedules(&self) -> Result<Vec<Schedule>>;

    async fn list_enabled_schedules(&self) -> Result<Vec<Schedule>>;

    /// Set the schedule's last-run timestamp to now.
    async fn touch_schedule(&self, id: Uuid) -> Result<()>;

    async fn delete_schedule(&self, id: Uuid) -> Result<bool>;

    // Settings

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    async fn delete_setting(&self, key: &str) -> Result<()>;

    async fn list_settings(&self) -> Result<HashMap<String, String>>;
}
