//! In-memory record store.
//!
//! Used by the test suites. Every progress value written to a run is kept
//! so callers can inspect the full trace.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::RecordStore;
use crate::error::{AppError, Result};
use crate::models::backup::{
    BackupLogEntry, BackupRun, BackupStats, BackupStatus, LogLevel, NewBackupRun, StorageKind,
};
use crate::models::node::{Node, NodeRequest, NodeStatus};
use crate::models::schedule::{Schedule, ScheduleRequest};

#[derive(Default)]
struct Inner {
    nodes: HashMap<Uuid, Node>,
    /// Run records with their insertion sequence for stable ordering
    runs: HashMap<Uuid, (u64, BackupRun)>,
    progress: HashMap<Uuid, Vec<i32>>,
    logs: Vec<BackupLogEntry>,
    schedules: HashMap<Uuid, Schedule>,
    settings: HashMap<String, String>,
    next_seq: u64,
    next_log_id: i64,
}

impl Inner {
    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn run_mut(&mut self, id: Uuid) -> Result<&mut BackupRun> {
        self.runs
            .get_mut(&id)
            .map(|(_, run)| run)
            .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", id)))
    }

    fn record_progress(&mut self, id: Uuid, progress: i32) {
        self.progress.entry(id).or_default().push(progress);
    }

    fn sorted_runs<F>(&self, filter: F) -> Vec<BackupRun>
    where
        F: Fn(&BackupRun) -> bool,
    {
        let mut runs: Vec<&(u64, BackupRun)> =
            self.runs.values().filter(|(_, run)| filter(run)).collect();
        runs.sort_by(|(a_seq, a), (b_seq, b)| {
            b.created_at.cmp(&a.created_at).then(b_seq.cmp(a_seq))
        });
        runs.into_iter().map(|(_, run)| run.clone()).collect()
    }
}

/// Record store kept entirely in process memory.
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: RwLock<Inner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed run record, keeping its timestamps.
    pub async fn insert_run(&self, run: BackupRun) {
        let mut inner = self.inner.write().await;
        let seq = inner.seq();
        inner.runs.insert(run.id, (seq, run));
    }

    /// Every progress value written to a run, in write order.
    pub async fn progress_trace(&self, run_id: Uuid) -> Vec<i32> {
        self.inner
            .read()
            .await
            .progress
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_node(&self, req: &NodeRequest) -> Result<Node> {
        let mut inner = self.inner.write().await;
        if inner.nodes.values().any(|n| n.name == req.name) {
            return Err(AppError::Validation(format!(
                "Node '{}' already exists",
                req.name
            )));
        }
        let now = Utc::now();
        let node = Node {
            id: Uuid::new_v4(),
            name: req.name.clone(),
            host: req.host.clone(),
            port: req.port_or_default(),
            username: req.username.clone(),
            auth_mode: req.auth_mode,
            credential: req.credential.clone().unwrap_or_default(),
            volumes_path: req.volumes_path_or_default(),
            status: NodeStatus::Unknown,
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    async fn update_node(&self, id: Uuid, req: &NodeRequest) -> Result<Node> {
        let mut inner = self.inner.write().await;
        if inner
            .nodes
            .values()
            .any(|n| n.name == req.name && n.id != id)
        {
            return Err(AppError::Validation(format!(
                "Node '{}' already exists",
                req.name
            )));
        }
        let node = inner
            .nodes
            .get_mut(&id)
            .ok_or_else(|| AppError::NodeNotFound(id.to_string()))?;
        node.name = req.name.clone();
        node.host = req.host.clone();
        node.port = req.port_or_default();
        node.username = req.username.clone();
        node.auth_mode = req.auth_mode;
        if let Some(credential) = req.credential.as_ref().filter(|c| !c.is_empty()) {
            node.credential = credential.clone();
        }
        node.volumes_path = req.volumes_path_or_default();
        node.updated_at = Utc::now();
        Ok(node.clone())
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>> {
        Ok(self.inner.read().await.nodes.get(&id).cloned())
    }

    async fn get_node_by_name(&self, name: &str) -> Result<Option<Node>> {
        Ok(self
            .inner
            .read()
            .await
            .nodes
            .values()
            .find(|n| n.name == name)
            .cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self.inner.read().await.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }

    async fn set_node_status(&self, id: Uuid, status: NodeStatus) -> Result<()> {
        let mut inner = self.inner.write().await;
        let node = inner
            .nodes
            .get_mut(&id)
            .ok_or_else(|| AppError::NodeNotFound(id.to_string()))?;
        node.status = status;
        node.last_checked_at = Some(Utc::now());
        Ok(())
    }

    async fn delete_node(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let removed = inner.nodes.remove(&id).is_some();
        if removed {
            inner.runs.retain(|_, (_, run)| run.node_id != id);
            inner.schedules.retain(|_, s| s.node_id != id);
        }
        Ok(removed)
    }

    async fn create_run(&self, new: &NewBackupRun) -> Result<BackupRun> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let run = BackupRun {
            id: Uuid::new_v4(),
            node_id: new.node_id,
            volume: new.volume.to_string(),
            storage: new.storage,
            filename: new.filename.clone(),
            status: new.status,
            progress: 0,
            error_message: None,
            size_bytes: None,
            storage_path: None,
            started_at: (new.status == BackupStatus::Running).then_some(now),
            completed_at: None,
            created_at: now,
        };
        let seq = inner.seq();
        inner.runs.insert(run.id, (seq, run.clone()));
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<BackupRun>> {
        Ok(self
            .inner
            .read()
            .await
            .runs
            .get(&id)
            .map(|(_, run)| run.clone()))
    }

    async fn list_runs_for_node(&self, node_id: Uuid) -> Result<Vec<BackupRun>> {
        Ok(self
            .inner
            .read()
            .await
            .sorted_runs(|run| run.node_id == node_id))
    }

    async fn list_completed_by_node_and_storage(
        &self,
        node_id: Uuid,
        storage: StorageKind,
    ) -> Result<Vec<BackupRun>> {
        Ok(self.inner.read().await.sorted_runs(|run| {
            run.node_id == node_id
                && run.storage == storage
                && run.status == BackupStatus::Completed
        }))
    }

    async fn list_running(&self) -> Result<Vec<BackupRun>> {
        Ok(self
            .inner
            .read()
            .await
            .sorted_runs(|run| run.status == BackupStatus::Running))
    }

    async fn mark_running(&self, id: Uuid, progress: i32) -> Result<()> {
        let mut inner = self.inner.write().await;
        let run = inner.run_mut(id)?;
        run.status = BackupStatus::Running;
        run.progress = progress;
        run.started_at = Some(Utc::now());
        inner.record_progress(id, progress);
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.run_mut(id)?.progress = progress;
        inner.record_progress(id, progress);
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, size_bytes: i64, storage_path: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let run = inner.run_mut(id)?;
        run.status = BackupStatus::Completed;
        run.progress = 100;
        run.size_bytes = Some(size_bytes);
        run.storage_path = Some(storage_path.to_string());
        run.error_message = None;
        run.completed_at = Some(Utc::now());
        inner.record_progress(id, 100);
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let run = inner.run_mut(id)?;
        run.status = BackupStatus::Failed;
        run.progress = 0;
        run.storage_path = None;
        run.error_message = Some(error_message.to_string());
        run.completed_at = Some(Utc::now());
        inner.record_progress(id, 0);
        Ok(())
    }

    async fn delete_run(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let removed = inner.runs.remove(&id).is_some();
        inner.logs.retain(|entry| entry.backup_id != id);
        Ok(removed)
    }

    async fn aggregate_stats(&self) -> Result<BackupStats> {
        let inner = self.inner.read().await;
        let mut stats = BackupStats::default();
        for (_, run) in inner.runs.values() {
            stats.total += 1;
            match run.status {
                BackupStatus::Pending => stats.pending += 1,
                BackupStatus::Running => stats.running += 1,
                BackupStatus::Completed => {
                    stats.completed += 1;
                    stats.total_size_bytes += run.size_bytes.unwrap_or(0);
                }
                BackupStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn append_log(&self, backup_id: Uuid, level: LogLevel, message: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.next_log_id += 1;
        let id = inner.next_log_id;
        inner.logs.push(BackupLogEntry {
            id,
            backup_id,
            level,
            message: message.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_logs(&self, backup_id: Uuid) -> Result<Vec<BackupLogEntry>> {
        Ok(self
            .inner
            .read()
            .await
            .logs
            .iter()
            .filter(|entry| entry.backup_id == backup_id)
            .cloned()
            .collect())
    }

    async fn create_schedule(&self, req: &ScheduleRequest) -> Result<Schedule> {
        let now = Utc::now();
        let schedule = Schedule {
            id: Uuid::new_v4(),
            name: req.name.clone(),
            node_id: req.node_id,
            cron_expression: req.cron_expression.clone(),
            storage: req.storage,
            retention_count: req.retention_count,
            enabled: req.enabled,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .write()
            .await
            .schedules
            .insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn update_schedule(&self, id: Uuid, req: &ScheduleRequest) -> Result<Schedule> {
        let mut inner = self.inner.write().await;
        let schedule = inner
            .schedules
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", id)))?;
        schedule.name = req.name.clone();
        schedule.node_id = req.node_id;
        schedule.cron_expression = req.cron_expression.clone();
        schedule.storage = req.storage;
        schedule.retention_count = req.retention_count;
        schedule.enabled = req.enabled;
        schedule.updated_at = Utc::now();
        Ok(schedule.clone())
    }

    async fn set_schedule_enabled(&self, id: Uuid, enabled: bool) -> Result<Schedule> {
        let mut inner = self.inner.write().await;
        let schedule = inner
            .schedules
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", id)))?;
        schedule.enabled = enabled;
        schedule.updated_at = Utc::now();
        Ok(schedule.clone())
    }

    async fn get_schedule(&self, id: Uuid) -> Result<Option<Schedule>> {
        Ok(self.inner.read().await.schedules.get(&id).cloned())
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let mut schedules: Vec<Schedule> =
            self.inner.read().await.schedules.values().cloned().collect();
        schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(schedules)
    }

    async fn list_enabled_schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self
            .list_schedules()
            .await?
            .into_iter()
            .filter(|s| s.enabled)
            .collect())
    }

    async fn touch_schedule(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(schedule) = inner.schedules.get_mut(&id) {
            schedule.last_run_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete_schedule(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.write().await.schedules.remove(&id).is_some())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().await.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<()> {
        self.inner.write().await.settings.remove(key);
        Ok(())
    }

    async fn list_settings(&self) -> Result<HashMap<String, String>> {
        Ok(self.inner.read().await.settings.clone())
    }
}
