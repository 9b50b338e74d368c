//! Postgres record store.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use super::RecordStore;
use crate::error::{AppError, Result};
use crate::models::backup::{
    BackupLogEntry, BackupRun, BackupStats, BackupStatus, LogLevel, NewBackupRun, StorageKind,
};
use crate::models::node::{Node, NodeRequest, NodeStatus};
use crate::models::schedule::{Schedule, ScheduleRequest};

const NODE_COLUMNS: &str = "id, name, host, port, username, auth_mode, credential, \
    volumes_path, status, last_checked_at, created_at, updated_at";

const RUN_COLUMNS: &str = "id, node_id, volume, storage, filename, status, progress, \
    error_message, size_bytes, storage_path, started_at, completed_at, created_at";

const SCHEDULE_COLUMNS: &str = "id, name, node_id, cron_expression, storage, \
    retention_count, enabled, last_run_at, created_at, updated_at";

/// Record store backed by a Postgres pool.
#[derive(Clone)]
pub struct PgRecordStore {
    db: PgPool,
}

impl PgRecordStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Apply the bundled migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.db).await?;
        Ok(())
    }
}

/// Map a unique-constraint failure on node name to a validation error.
fn map_node_error(name: &str, err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::Validation(format!("Node '{}' already exists", name))
        }
        _ => AppError::Database(err),
    }
}

fn run_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Backup {} not found", id))
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create_node(&self, req: &NodeRequest) -> Result<Node> {
        let sql = format!(
            "INSERT INTO nodes (id, name, host, port, username, auth_mode, credential, volumes_path) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            NODE_COLUMNS
        );
        sqlx::query_as::<_, Node>(&sql)
            .bind(Uuid::new_v4())
            .bind(&req.name)
            .bind(&req.host)
            .bind(req.port_or_default())
            .bind(&req.username)
            .bind(req.auth_mode)
            .bind(req.credential.clone().unwrap_or_default())
            .bind(req.volumes_path_or_default())
            .fetch_one(&self.db)
            .await
            .map_err(|e| map_node_error(&req.name, e))
    }

    async fn update_node(&self, id: Uuid, req: &NodeRequest) -> Result<Node> {
        let credential = req.credential.clone().filter(|c| !c.is_empty());
        let sql = format!(
            "UPDATE nodes SET name = $2, host = $3, port = $4, username = $5, auth_mode = $6, \
             credential = COALESCE($7, credential), volumes_path = $8, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            NODE_COLUMNS
        );
        sqlx::query_as::<_, Node>(&sql)
            .bind(id)
            .bind(&req.name)
            .bind(&req.host)
            .bind(req.port_or_default())
            .bind(&req.username)
            .bind(req.auth_mode)
            .bind(credential)
            .bind(req.volumes_path_or_default())
            .fetch_optional(&self.db)
            .await
            .map_err(|e| map_node_error(&req.name, e))?
            .ok_or_else(|| AppError::NodeNotFound(id.to_string()))
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>> {
        let sql = format!("SELECT {} FROM nodes WHERE id = $1", NODE_COLUMNS);
        let node = sqlx::query_as::<_, Node>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(node)
    }

    async fn get_node_by_name(&self, name: &str) -> Result<Option<Node>> {
        let sql = format!("SELECT {} FROM nodes WHERE name = $1", NODE_COLUMNS);
        let node = sqlx::query_as::<_, Node>(&sql)
            .bind(name)
            .fetch_optional(&self.db)
            .await?;
        Ok(node)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let sql = format!("SELECT {} FROM nodes ORDER BY name", NODE_COLUMNS);
        let nodes = sqlx::query_as::<_, Node>(&sql).fetch_all(&self.db).await?;
        Ok(nodes)
    }

    async fn set_node_status(&self, id: Uuid, status: NodeStatus) -> Result<()> {
        let result =
            sqlx::query("UPDATE nodes SET status = $2, last_checked_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(status)
                .execute(&self.db)
                .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NodeNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete_node(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM nodes WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_run(&self, new: &NewBackupRun) -> Result<BackupRun> {
        let sql = format!(
            "INSERT INTO backups (id, node_id, volume, storage, filename, status, started_at) \
             VALUES ($1, $2, $3, $4, $5, $6, CASE WHEN $6 = 'running'::backup_status THEN NOW() END) \
             RETURNING {}",
            RUN_COLUMNS
        );
        let run = sqlx::query_as::<_, BackupRun>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.node_id)
            .bind(new.volume.as_str())
            .bind(new.storage)
            .bind(&new.filename)
            .bind(new.status)
            .fetch_one(&self.db)
            .await?;
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<BackupRun>> {
        let sql = format!("SELECT {} FROM backups WHERE id = $1", RUN_COLUMNS);
        let run = sqlx::query_as::<_, BackupRun>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(run)
    }

    async fn list_runs_for_node(&self, node_id: Uuid) -> Result<Vec<BackupRun>> {
        let sql = format!(
            "SELECT {} FROM backups WHERE node_id = $1 ORDER BY created_at DESC",
            RUN_COLUMNS
        );
        let runs = sqlx::query_as::<_, BackupRun>(&sql)
            .bind(node_id)
            .fetch_all(&self.db)
            .await?;
        Ok(runs)
    }

    async fn list_completed_by_node_and_storage(
        &self,
        node_id: Uuid,
        storage: StorageKind,
    ) -> Result<Vec<BackupRun>> {
        let sql = format!(
            "SELECT {} FROM backups WHERE node_id = $1 AND storage = $2 AND status = $3 \
             ORDER BY created_at DESC",
            RUN_COLUMNS
        );
        let runs = sqlx::query_as::<_, BackupRun>(&sql)
            .bind(node_id)
            .bind(storage)
            .bind(BackupStatus::Completed)
            .fetch_all(&self.db)
            .await?;
        Ok(runs)
    }

    async fn list_running(&self) -> Result<Vec<BackupRun>> {
        let sql = format!(
            "SELECT {} FROM backups WHERE status = $1 ORDER BY created_at DESC",
            RUN_COLUMNS
        );
        let runs = sqlx::query_as::<_, BackupRun>(&sql)
            .bind(BackupStatus::Running)
            .fetch_all(&self.db)
            .await?;
        Ok(runs)
    }

    async fn mark_running(&self, id: Uuid, progress: i32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE backups SET status = $2, progress = $3, started_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(BackupStatus::Running)
        .bind(progress)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(run_not_found(id));
        }
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<()> {
        sqlx::query("UPDATE backups SET progress = $2 WHERE id = $1")
            .bind(id)
            .bind(progress)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, size_bytes: i64, storage_path: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE backups SET status = $2, progress = 100, size_bytes = $3, storage_path = $4, \
             error_message = NULL, completed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(BackupStatus::Completed)
        .bind(size_bytes)
        .bind(storage_path)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(run_not_found(id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE backups SET status = $2, progress = 0, error_message = $3, \
             storage_path = NULL, completed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(BackupStatus::Failed)
        .bind(error_message)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(run_not_found(id));
        }
        Ok(())
    }

    async fn delete_run(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM backups WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn aggregate_stats(&self) -> Result<BackupStats> {
        let stats = sqlx::query_as::<_, BackupStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'running') AS running,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COALESCE(SUM(size_bytes) FILTER (WHERE status = 'completed'), 0)::BIGINT
                    AS total_size_bytes
            FROM backups
            "#,
        )
        .fetch_one(&self.db)
        .await?;
        Ok(stats)
    }

    async fn append_log(&self, backup_id: Uuid, level: LogLevel, message: &str) -> Result<()> {
        sqlx::query("INSERT INTO backup_logs (backup_id, level, message) VALUES ($1, $2, $3)")
            .bind(backup_id)
            .bind(level)
            .bind(message)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn list_logs(&self, backup_id: Uuid) -> Result<Vec<BackupLogEntry>> {
        let logs = sqlx::query_as::<_, BackupLogEntry>(
            "SELECT id, backup_id, level, message, created_at FROM backup_logs \
             WHERE backup_id = $1 ORDER BY id",
        )
        .bind(backup_id)
        .fetch_all(&self.db)
        .await?;
        Ok(logs)
    }

    async fn create_schedule(&self, req: &ScheduleRequest) -> Result<Schedule> {
        let sql = format!(
            "INSERT INTO schedules (id, name, node_id, cron_expression, storage, retention_count, enabled) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            SCHEDULE_COLUMNS
        );
        let schedule = sqlx::query_as::<_, Schedule>(&sql)
            .bind(Uuid::new_v4())
            .bind(&req.name)
            .bind(req.node_id)
            .bind(&req.cron_expression)
            .bind(req.storage)
            .bind(req.retention_count)
            .bind(req.enabled)
            .fetch_one(&self.db)
            .await?;
        Ok(schedule)
    }

    async fn update_schedule(&self, id: Uuid, req: &ScheduleRequest) -> Result<Schedule> {
        let sql = format!(
            "UPDATE schedules SET name = $2, node_id = $3, cron_expression = $4, storage = $5, \
             retention_count = $6, enabled = $7, updated_at = NOW() WHERE id = $1 RETURNING {}",
            SCHEDULE_COLUMNS
        );
        sqlx::query_as::<_, Schedule>(&sql)
            .bind(id)
            .bind(&req.name)
            .bind(req.node_id)
            .bind(&req.cron_expression)
            .bind(req.storage)
            .bind(req.retention_count)
            .bind(req.enabled)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", id)))
    }

    async fn set_schedule_enabled(&self, id: Uuid, enabled: bool) -> Result<Schedule> {
        let sql = format!(
            "UPDATE schedules SET enabled = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            SCHEDULE_COLUMNS
        );
        sqlx::query_as::<_, Schedule>(&sql)
            .bind(id)
            .bind(enabled)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", id)))
    }

    async fn get_schedule(&self, id: Uuid) -> Result<Option<Schedule>> {
        let sql = format!("SELECT {} FROM schedules WHERE id = $1", SCHEDULE_COLUMNS);
        let schedule = sqlx::query_as::<_, Schedule>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(schedule)
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let sql = format!("SELECT {} FROM schedules ORDER BY created_at", SCHEDULE_COLUMNS);
        let schedules = sqlx::query_as::<_, Schedule>(&sql)
            .fetch_all(&self.db)
            .await?;
        Ok(schedules)
    }

    async fn list_enabled_schedules(&self) -> Result<Vec<Schedule>> {
        let sql = format!(
            "SELECT {} FROM schedules WHERE enabled = TRUE ORDER BY created_at",
            SCHEDULE_COLUMNS
        );
        let schedules = sqlx::query_as::<_, Schedule>(&sql)
            .fetch_all(&self.db)
            .await?;
        Ok(schedules)
    }

    async fn touch_schedule(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE schedules SET last_run_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_schedule(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.db)
                .await?;
        Ok(value)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = $1")
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn list_settings(&self) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM settings")
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().collect())
    }
}
