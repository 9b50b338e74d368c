//! Backup pipeline orchestrator.
//!
//! Drives one run through `pending -> running -> completed | failed`:
//! connect, enumerate volumes, safe-stop / download / safe-start each volume,
//! archive the scratch tree, upload it, clean up and finalize. Progress and
//! leveled log lines are written to the record store as the run advances.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{truncate_message, AppError, Result};
use crate::models::backup::{
    artifact_filename, BackupLogEntry, BackupRun, BackupStats, BackupStatus, LogLevel,
    NewBackupRun, StorageKind, VolumeSelector,
};
use crate::models::node::Node;
use crate::remote::{join_remote, RemoteConnector, RemoteSession};
use crate::services::archive_service::build_archive;
use crate::services::notification_service::{Notification, NotificationKind, Notifier};
use crate::services::storage_service::StorageProvider;
use crate::services::workload_service::{
    is_workload_id, PowerSignal, SafeStopPolicy, WorkloadCoordinator, WorkloadState,
};
use crate::store::RecordStore;

/// Error message recorded on runs found `running` at startup.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted by process restart";

/// Request to back up a node.
#[derive(Debug, Clone)]
pub struct CreateBackupOptions {
    pub node_id: Uuid,
    /// Volume name, or `all-volumes`
    pub volume: String,
    pub storage: StorageKind,
}

/// A non-fatal error the pipeline recovered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Recovered {
    SafeStop { volume: String, message: String },
    Download { volume: String, message: String },
    SafeStart { volume: String, message: String },
    Cleanup { path: String, message: String },
}

/// Per-volume result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeOutcome {
    pub name: String,
    /// Bytes copied, `None` when the download failed
    pub bytes: Option<u64>,
    /// Whether the workload was stopped for the copy
    pub stopped: bool,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub run_id: Uuid,
    pub filename: String,
    pub size_bytes: u64,
    pub storage_path: String,
    pub duration: Duration,
    pub volumes: Vec<VolumeOutcome>,
    pub recovered: Vec<Recovered>,
}

/// A stored artifact opened for reading.
///
/// Artifacts fetched from remote storage live in a temporary file that is
/// removed when this handle is dropped.
pub struct BackupFile {
    pub filename: String,
    pub size: u64,
    pub file: tokio::fs::File,
    temp_path: Option<PathBuf>,
}

impl Drop for BackupFile {
    fn drop(&mut self) {
        if let Some(path) = self.temp_path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Per-node mutual exclusion for runs.
#[derive(Default)]
pub struct NodeLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl NodeLocks {
    pub async fn acquire(&self, node_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().await.entry(node_id).or_default().clone();
        lock.lock_owned().await
    }
}

struct PipelineOutput {
    size_bytes: u64,
    storage_path: String,
    volumes: Vec<VolumeOutcome>,
}

/// Backup pipeline orchestrator
pub struct BackupService {
    store: Arc<dyn RecordStore>,
    connector: Arc<dyn RemoteConnector>,
    workload: Arc<dyn WorkloadCoordinator>,
    storage: Arc<dyn StorageProvider>,
    notifier: Notifier,
    scratch_path: PathBuf,
    stop_policy: SafeStopPolicy,
    node_locks: Option<NodeLocks>,
}

impl BackupService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        connector: Arc<dyn RemoteConnector>,
        workload: Arc<dyn WorkloadCoordinator>,
        storage: Arc<dyn StorageProvider>,
        notifier: Notifier,
        scratch_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            connector,
            workload,
            storage,
            notifier,
            scratch_path: scratch_path.into(),
            stop_policy: SafeStopPolicy::default(),
            node_locks: None,
        }
    }

    pub fn with_safe_stop(mut self, policy: SafeStopPolicy) -> Self {
        self.stop_policy = policy;
        self
    }

    /// Serialize runs that target the same node.
    pub fn with_node_lock(mut self, enabled: bool) -> Self {
        self.node_locks = enabled.then(NodeLocks::default);
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Validate a request and persist a new run in `initial_status`.
    pub async fn create_backup(
        &self,
        options: CreateBackupOptions,
        initial_status: BackupStatus,
    ) -> Result<BackupRun> {
        let node = self
            .store
            .get_node(options.node_id)
            .await?
            .ok_or_else(|| AppError::NodeNotFound(options.node_id.to_string()))?;
        let selector = VolumeSelector::parse(&options.volume)?;
        let filename = artifact_filename(&node.name, &selector, Utc::now());

        let run = self
            .store
            .create_run(&NewBackupRun {
                node_id: node.id,
                volume: selector,
                storage: options.storage,
                filename,
                status: initial_status,
            })
            .await?;

        tracing::info!(
            backup_id = %run.id,
            node = %node.name,
            volume = %run.volume,
            storage = %run.storage,
            "Backup created"
        );
        Ok(run)
    }

    /// Create a pending run and execute it in the background.
    pub async fn submit(self: &Arc<Self>, options: CreateBackupOptions) -> Result<BackupRun> {
        let run = self.create_backup(options, BackupStatus::Pending).await?;
        let service = Arc::clone(self);
        let run_id = run.id;
        tokio::spawn(async move {
            if let Err(e) = service.execute(run_id).await {
                tracing::error!(backup_id = %run_id, error = %e, "Backup run failed");
            }
        });
        Ok(run)
    }

    /// Execute a run to completion.
    pub async fn execute(&self, run_id: Uuid) -> Result<BackupReport> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", run_id)))?;
        if run.status.is_terminal() {
            return Err(AppError::Validation(format!(
                "Backup {} is already {}",
                run_id, run.status
            )));
        }

        let Some(node) = self.store.get_node(run.node_id).await? else {
            let err = AppError::NodeNotFound(run.node_id.to_string());
            let message = truncate_message(&err.to_string());
            self.store.mark_failed(run.id, &message).await?;
            self.log(run.id, LogLevel::Error, &message).await;
            return Err(err);
        };

        let _node_guard = match &self.node_locks {
            Some(locks) => Some(locks.acquire(node.id).await),
            None => None,
        };

        let started = Instant::now();
        self.store.mark_running(run.id, 5).await?;
        self.log(
            run.id,
            LogLevel::Info,
            &format!(
                "Starting backup of {} on node {} to {} storage",
                run.volume, node.name, run.storage
            ),
        )
        .await;
        self.notifier
            .notify(
                Notification::new(
                    NotificationKind::Info,
                    "Backup started",
                    format!("Backing up {} on {}", run.volume, node.name),
                )
                .field("Storage", run.storage),
            )
            .await;

        let scratch_dir = self.scratch_path.join(run.id.to_string());
        let archive_path = self.scratch_path.join(format!("{}.tar.gz", run.id));

        let mut recovered = Vec::new();
        let result = self
            .run_pipeline(&run, &node, &scratch_dir, &archive_path, &mut recovered)
            .await;
        self.cleanup(run.id, &scratch_dir, &archive_path, &mut recovered)
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                self.fail(&run, &node, &e).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .store
            .mark_completed(run.id, output.size_bytes as i64, &output.storage_path)
            .await
        {
            self.fail(&run, &node, &e).await;
            return Err(e);
        }

        let duration = started.elapsed();
        self.log(
            run.id,
            LogLevel::Info,
            &format!(
                "Backup completed in {:.1}s ({})",
                duration.as_secs_f64(),
                format_size(output.size_bytes)
            ),
        )
        .await;
        self.notifier
            .notify(
                Notification::new(
                    NotificationKind::Success,
                    "Backup completed",
                    format!("Backed up {} on {}", run.volume, node.name),
                )
                .field("Size", format_size(output.size_bytes))
                .field("Duration", format!("{:.1}s", duration.as_secs_f64()))
                .field("File", &run.filename),
            )
            .await;

        Ok(BackupReport {
            run_id: run.id,
            filename: run.filename.clone(),
            size_bytes: output.size_bytes,
            storage_path: output.storage_path,
            duration,
            volumes: output.volumes,
            recovered,
        })
    }

    async fn run_pipeline(
        &self,
        run: &BackupRun,
        node: &Node,
        scratch_dir: &Path,
        archive_path: &Path,
        recovered: &mut Vec<Recovered>,
    ) -> Result<PipelineOutput> {
        tokio::fs::create_dir_all(scratch_dir).await?;

        let mut session = self.connector.connect(node).await?;
        self.store.update_progress(run.id, 10).await?;
        self.log(
            run.id,
            LogLevel::Info,
            &format!("Connected to {}:{}", node.host, node.port),
        )
        .await;

        let copied = self
            .copy_volumes(run, node, session.as_ref(), scratch_dir, recovered)
            .await;
        if let Err(e) = session.close().await {
            tracing::warn!(backup_id = %run.id, error = %e, "Failed to close remote session");
        }
        let volumes = copied?;
        self.store.update_progress(run.id, 75).await?;

        let size_bytes = build_archive(scratch_dir, archive_path).await?;
        self.store.update_progress(run.id, 85).await?;
        self.log(
            run.id,
            LogLevel::Info,
            &format!("Archive created ({})", format_size(size_bytes)),
        )
        .await;

        let backend = self.storage.backend(run.storage).await?;
        let storage_path = backend.upload(archive_path, &run.filename).await?;
        self.store.update_progress(run.id, 95).await?;
        self.log(
            run.id,
            LogLevel::Info,
            &format!("Uploaded to {} storage", run.storage),
        )
        .await;

        Ok(PipelineOutput {
            size_bytes,
            storage_path,
            volumes,
        })
    }

    async fn copy_volumes(
        &self,
        run: &BackupRun,
        node: &Node,
        session: &dyn RemoteSession,
        scratch_dir: &Path,
        recovered: &mut Vec<Recovered>,
    ) -> Result<Vec<VolumeOutcome>> {
        let names = match run.selector()? {
            VolumeSelector::All => session.list_dirs(&node.volumes_path).await?,
            VolumeSelector::Named(name) => vec![name],
        };
        self.store.update_progress(run.id, 15).await?;

        if names.is_empty() {
            self.log(
                run.id,
                LogLevel::Warn,
                &format!("No volumes found under {}", node.volumes_path),
            )
            .await;
        } else {
            self.log(
                run.id,
                LogLevel::Info,
                &format!("Found {} volume(s)", names.len()),
            )
            .await;
        }

        let total = names.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, name) in names.into_iter().enumerate() {
            let local = scratch_dir.join(&name);
            tokio::fs::create_dir_all(&local).await?;

            let stopped = if is_workload_id(&name) {
                self.safe_stop(run.id, &name, recovered).await
            } else {
                false
            };

            let remote = join_remote(&node.volumes_path, &name);
            let bytes = match session.download_dir(&remote, &local).await {
                Ok(bytes) => {
                    self.log(
                        run.id,
                        LogLevel::Info,
                        &format!("Downloaded volume {} ({})", name, format_size(bytes)),
                    )
                    .await;
                    Some(bytes)
                }
                Err(e) => {
                    let message = e.to_string();
                    self.log(
                        run.id,
                        LogLevel::Warn,
                        &format!("Failed to download volume {}: {}", name, message),
                    )
                    .await;
                    recovered.push(Recovered::Download {
                        volume: name.clone(),
                        message,
                    });
                    None
                }
            };

            if stopped {
                self.safe_start(run.id, &name, recovered).await;
            }

            outcomes.push(VolumeOutcome {
                name,
                bytes,
                stopped,
            });
            let progress = 15 + (60 * (index + 1) / total) as i32;
            self.store.update_progress(run.id, progress).await?;
        }

        Ok(outcomes)
    }

    /// Stop a live workload before its volume is copied.
    ///
    /// Returns whether a stop was performed, in which case the workload must
    /// be started again afterwards.
    async fn safe_stop(&self, run_id: Uuid, workload: &str, recovered: &mut Vec<Recovered>) -> bool {
        match self.workload.get_state(workload).await {
            Ok(Some(state)) if state.is_active() => {}
            Ok(Some(state)) => {
                self.log(
                    run_id,
                    LogLevel::Info,
                    &format!("Server {} is {}, no stop needed", workload, state),
                )
                .await;
                return false;
            }
            Ok(None) => return false,
            Err(e) => {
                self.recover_workload(run_id, workload, "query state of", e, recovered, true)
                    .await;
                return false;
            }
        }

        match self.workload.set_state(workload, PowerSignal::Stop).await {
            Ok(true) => {}
            Ok(false) => {
                self.log(
                    run_id,
                    LogLevel::Warn,
                    &format!("Stop request for server {} was not accepted", workload),
                )
                .await;
                return false;
            }
            Err(e) => {
                self.recover_workload(run_id, workload, "stop", e, recovered, true)
                    .await;
                return false;
            }
        }
        self.log(
            run_id,
            LogLevel::Info,
            &format!("Stopping server {} for a consistent copy", workload),
        )
        .await;

        for attempt in 1..=self.stop_policy.max_attempts {
            tokio::time::sleep(self.stop_policy.poll_interval).await;
            match self.workload.get_state(workload).await {
                Ok(Some(WorkloadState::Offline)) => {
                    self.log(
                        run_id,
                        LogLevel::Info,
                        &format!("Server {} is offline", workload),
                    )
                    .await;
                    return true;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(workload, attempt, error = %e, "State poll failed");
                }
            }
        }

        let waited = self.stop_policy.poll_interval * self.stop_policy.max_attempts;
        self.log(
            run_id,
            LogLevel::Warn,
            &format!(
                "Server {} did not stop within {}s; copying anyway, data may be inconsistent",
                workload,
                waited.as_secs()
            ),
        )
        .await;
        true
    }

    async fn safe_start(&self, run_id: Uuid, workload: &str, recovered: &mut Vec<Recovered>) {
        match self.workload.set_state(workload, PowerSignal::Start).await {
            Ok(true) => {
                self.log(
                    run_id,
                    LogLevel::Info,
                    &format!("Started server {}", workload),
                )
                .await;
            }
            Ok(false) => {
                let message = "start request was not accepted".to_string();
                self.log(
                    run_id,
                    LogLevel::Warn,
                    &format!("Failed to start server {}: {}", workload, message),
                )
                .await;
                recovered.push(Recovered::SafeStart {
                    volume: workload.to_string(),
                    message,
                });
            }
            Err(e) => {
                self.recover_workload(run_id, workload, "start", e, recovered, false)
                    .await;
            }
        }
    }

    async fn recover_workload(
        &self,
        run_id: Uuid,
        workload: &str,
        action: &str,
        err: AppError,
        recovered: &mut Vec<Recovered>,
        stopping: bool,
    ) {
        let message = err.to_string();
        self.log(
            run_id,
            LogLevel::Warn,
            &format!("Failed to {} server {}: {}", action, workload, message),
        )
        .await;
        let volume = workload.to_string();
        recovered.push(if stopping {
            Recovered::SafeStop { volume, message }
        } else {
            Recovered::SafeStart { volume, message }
        });
    }

    async fn cleanup(
        &self,
        run_id: Uuid,
        scratch_dir: &Path,
        archive_path: &Path,
        recovered: &mut Vec<Recovered>,
    ) {
        let results = [
            (scratch_dir, tokio::fs::remove_dir_all(scratch_dir).await),
            (archive_path, tokio::fs::remove_file(archive_path).await),
        ];
        for (path, result) in results {
            match result {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    let path = path.display().to_string();
                    let message = e.to_string();
                    self.log(
                        run_id,
                        LogLevel::Warn,
                        &format!("Failed to clean up {}: {}", path, message),
                    )
                    .await;
                    recovered.push(Recovered::Cleanup { path, message });
                }
            }
        }
    }

    async fn fail(&self, run: &BackupRun, node: &Node, err: &AppError) {
        let message = truncate_message(&err.to_string());
        if let Err(e) = self.store.mark_failed(run.id, &message).await {
            tracing::error!(backup_id = %run.id, error = %e, "Failed to record backup failure");
        }
        self.log(run.id, LogLevel::Error, &format!("Backup failed: {}", message))
            .await;
        self.notifier
            .notify(
                Notification::new(
                    NotificationKind::Error,
                    "Backup failed",
                    format!("Backup of {} on {} failed", run.volume, node.name),
                )
                .field("Storage", run.storage)
                .field("Error", &message),
            )
            .await;
    }

    /// Append a run log line and mirror it to tracing.
    async fn log(&self, run_id: Uuid, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!(backup_id = %run_id, "{}", message),
            LogLevel::Warn => tracing::warn!(backup_id = %run_id, "{}", message),
            LogLevel::Error => tracing::error!(backup_id = %run_id, "{}", message),
        }
        if let Err(e) = self.store.append_log(run_id, level, message).await {
            tracing::warn!(backup_id = %run_id, error = %e, "Failed to persist run log");
        }
    }

    /// Delete a run and, best effort, its stored artifact.
    pub async fn delete_backup(&self, run_id: Uuid) -> Result<()> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", run_id)))?;

        if run.storage_path.is_some() {
            let deleted = match self.storage.backend(run.storage).await {
                Ok(backend) => backend.delete(&run.filename).await,
                Err(e) => Err(e),
            };
            if let Err(e) = deleted {
                tracing::warn!(
                    backup_id = %run.id,
                    storage = %run.storage,
                    error = %e,
                    "Failed to delete stored backup file"
                );
            }
        }

        self.store.delete_run(run.id).await?;
        tracing::info!(backup_id = %run.id, filename = %run.filename, "Backup deleted");
        Ok(())
    }

    /// Open the artifact of a completed run for reading.
    pub async fn get_backup_file(&self, run_id: Uuid) -> Result<BackupFile> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", run_id)))?;
        if run.status != BackupStatus::Completed {
            return Err(AppError::Validation(format!(
                "Backup {} is {}, not completed",
                run.id, run.status
            )));
        }

        let backend = self.storage.backend(run.storage).await?;
        if let Some(path) = backend.local_path(&run.filename)? {
            if !tokio::fs::try_exists(&path).await? {
                return Err(AppError::NotFound(format!(
                    "Backup file not found: {}",
                    run.filename
                )));
            }
            let file = tokio::fs::File::open(&path).await?;
            let size = file.metadata().await?.len();
            return Ok(BackupFile {
                filename: run.filename,
                size,
                file,
                temp_path: None,
            });
        }

        tokio::fs::create_dir_all(&self.scratch_path).await?;
        let temp_path = self
            .scratch_path
            .join(format!("download-{}-{}.tar.gz", run.id, Uuid::new_v4()));
        if let Err(e) = backend.download(&run.filename, &temp_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        let file = tokio::fs::File::open(&temp_path).await?;
        let size = file.metadata().await?.len();
        Ok(BackupFile {
            filename: run.filename,
            size,
            file,
            temp_path: Some(temp_path),
        })
    }

    /// Fail every run left `running` by a previous process.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let runs = self.store.list_running().await?;
        for run in &runs {
            self.store.mark_failed(run.id, INTERRUPTED_MESSAGE).await?;
            self.log(run.id, LogLevel::Error, INTERRUPTED_MESSAGE).await;
        }
        if !runs.is_empty() {
            tracing::warn!(count = runs.len(), "Marked interrupted backups as failed");
        }
        Ok(runs.len())
    }

    pub async fn stats(&self) -> Result<BackupStats> {
        self.store.aggregate_stats().await
    }

    pub async fn logs(&self, run_id: Uuid) -> Result<Vec<BackupLogEntry>> {
        self.store.list_logs(run_id).await
    }
}

/// Human-readable byte size.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[tokio::test]
    async fn test_node_locks_serialize_same_node() {
        let locks = Arc::new(NodeLocks::default());
        let node = Uuid::new_v4();
        let guard = locks.acquire(node).await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.acquire(node).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // A different node is not blocked
        let _unrelated = locks.acquire(Uuid::new_v4()).await;

        drop(guard);
        waiter.await.unwrap();
    }

    #[test]
    fn test_recovered_serializes_with_stage() {
        let r = Recovered::Download {
            volume: "v1".into(),
            message: "timeout".into(),
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["stage"], "download");
        assert_eq!(json["volume"], "v1");
    }
}
