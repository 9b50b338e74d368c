//! Backup schedule timers and retention.
//!
//! The scheduler owns one cancellable timer task per enabled schedule. A
//! timer sleeps until the next cron occurrence and then spawns the run as a
//! separate task, so cancelling a timer never aborts a backup in flight.

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::backup::{BackupStatus, ALL_VOLUMES};
use crate::models::schedule::{Schedule, ScheduleRequest};
use crate::services::backup_service::{BackupService, CreateBackupOptions};
use crate::store::RecordStore;

/// Parse a cron expression, accepting the common 5-field form.
///
/// The cron crate expects a leading seconds field, so a 5-field expression
/// gets `0 ` prepended.
pub fn parse_cron_expression(expr: &str) -> Result<CronSchedule> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    };
    CronSchedule::from_str(&normalized)
        .map_err(|e| AppError::Validation(format!("Invalid cron expression '{}': {}", expr, e)))
}

/// Executes schedules: one run, then retention.
#[derive(Clone)]
struct ScheduleRunner {
    store: Arc<dyn RecordStore>,
    backups: Arc<BackupService>,
}

impl ScheduleRunner {
    /// Timer callback: reload the schedule so edits and deletes are honoured.
    async fn trigger(&self, schedule_id: Uuid) {
        let schedule = match self.store.get_schedule(schedule_id).await {
            Ok(Some(schedule)) if schedule.enabled => schedule,
            Ok(_) => {
                tracing::debug!(schedule_id = %schedule_id, "Skipping removed or disabled schedule");
                return;
            }
            Err(e) => {
                tracing::error!(schedule_id = %schedule_id, error = %e, "Failed to load schedule");
                return;
            }
        };
        self.run(&schedule).await;
    }

    async fn run(&self, schedule: &Schedule) {
        tracing::info!(schedule = %schedule.name, "Running scheduled backup");

        let created = self
            .backups
            .create_backup(
                CreateBackupOptions {
                    node_id: schedule.node_id,
                    volume: ALL_VOLUMES.to_string(),
                    storage: schedule.storage,
                },
                BackupStatus::Running,
            )
            .await;

        match created {
            Ok(run) => match self.backups.execute(run.id).await {
                Ok(report) => tracing::info!(
                    schedule = %schedule.name,
                    backup_id = %report.run_id,
                    size_bytes = report.size_bytes,
                    "Scheduled backup completed"
                ),
                Err(e) => tracing::error!(
                    schedule = %schedule.name,
                    backup_id = %run.id,
                    error = %e,
                    "Scheduled backup failed"
                ),
            },
            Err(e) => tracing::error!(
                schedule = %schedule.name,
                error = %e,
                "Failed to create scheduled backup"
            ),
        }

        if let Err(e) = self.store.touch_schedule(schedule.id).await {
            tracing::warn!(schedule = %schedule.name, error = %e, "Failed to record last run");
        }
        if let Err(e) = self.prune(schedule).await {
            tracing::warn!(schedule = %schedule.name, error = %e, "Retention pass failed");
        }
    }

    async fn prune(&self, schedule: &Schedule) -> Result<usize> {
        let keep = schedule.retention_count.max(1) as usize;
        let runs = self
            .store
            .list_completed_by_node_and_storage(schedule.node_id, schedule.storage)
            .await?;

        let mut deleted = 0;
        for run in runs.into_iter().skip(keep) {
            match self.backups.delete_backup(run.id).await {
                Ok(()) => deleted += 1,
                Err(e) => tracing::warn!(
                    backup_id = %run.id,
                    error = %e,
                    "Failed to delete backup during retention"
                ),
            }
        }

        if deleted > 0 {
            tracing::info!(
                schedule = %schedule.name,
                deleted,
                keep,
                "Retention removed old backups"
            );
        }
        Ok(deleted)
    }
}

async fn timer_loop(runner: ScheduleRunner, schedule_id: Uuid, cron: CronSchedule) {
    let mut last: Option<DateTime<Utc>> = None;
    loop {
        let now = Utc::now();
        let from = last.map_or(now, |l| l.max(now));
        let Some(next) = cron.after(&from).next() else {
            tracing::info!(schedule_id = %schedule_id, "Schedule has no further occurrences");
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
        last = Some(next);

        let runner = runner.clone();
        tokio::spawn(async move {
            runner.trigger(schedule_id).await;
        });
    }
}

/// Registry of schedule timers.
pub struct SchedulerService {
    runner: ScheduleRunner,
    jobs: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl SchedulerService {
    pub fn new(store: Arc<dyn RecordStore>, backups: Arc<BackupService>) -> Self {
        Self {
            runner: ScheduleRunner { store, backups },
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn store(&self) -> &dyn RecordStore {
        self.runner.store.as_ref()
    }

    /// Register a timer for every enabled schedule; returns how many started.
    pub async fn init(&self) -> Result<usize> {
        let schedules = self.store().list_enabled_schedules().await?;
        let mut registered = 0;
        for schedule in &schedules {
            if self.add_job(schedule).await {
                registered += 1;
            }
        }
        tracing::info!(registered, total = schedules.len(), "Backup scheduler initialised");
        Ok(registered)
    }

    /// Replace the timer for a schedule.
    ///
    /// Disabled schedules and invalid cron expressions leave no timer. Returns
    /// whether a timer is now registered.
    pub async fn add_job(&self, schedule: &Schedule) -> bool {
        let mut jobs = self.jobs.lock().await;
        if let Some(handle) = jobs.remove(&schedule.id) {
            handle.abort();
        }
        if !schedule.enabled {
            return false;
        }

        let cron = match parse_cron_expression(&schedule.cron_expression) {
            Ok(cron) => cron,
            Err(e) => {
                tracing::warn!(
                    schedule = %schedule.name,
                    error = %e,
                    "Schedule not registered"
                );
                return false;
            }
        };

        let handle = tokio::spawn(timer_loop(self.runner.clone(), schedule.id, cron));
        jobs.insert(schedule.id, handle);
        tracing::debug!(schedule = %schedule.name, cron = %schedule.cron_expression, "Schedule registered");
        true
    }

    /// Cancel a schedule's timer; returns whether one was registered.
    pub async fn remove_job(&self, schedule_id: Uuid) -> bool {
        match self.jobs.lock().await.remove(&schedule_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer. Runs already in flight continue.
    pub async fn stop_all(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
        tracing::info!("Backup scheduler stopped");
    }

    pub async fn is_registered(&self, schedule_id: Uuid) -> bool {
        self.jobs.lock().await.contains_key(&schedule_id)
    }

    pub async fn active_jobs(&self) -> usize {
        self.jobs.lock().await.len()
    }

    async fn validate(&self, req: &ScheduleRequest) -> Result<()> {
        req.validate_fields()?;
        parse_cron_expression(&req.cron_expression)?;
        if self.store().get_node(req.node_id).await?.is_none() {
            return Err(AppError::NodeNotFound(req.node_id.to_string()));
        }
        Ok(())
    }

    pub async fn create_schedule(&self, req: &ScheduleRequest) -> Result<Schedule> {
        self.validate(req).await?;
        let schedule = self.store().create_schedule(req).await?;
        self.add_job(&schedule).await;
        tracing::info!(schedule = %schedule.name, "Schedule created");
        Ok(schedule)
    }

    pub async fn update_schedule(&self, id: Uuid, req: &ScheduleRequest) -> Result<Schedule> {
        self.validate(req).await?;
        let schedule = self.store().update_schedule(id, req).await?;
        self.add_job(&schedule).await;
        Ok(schedule)
    }

    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<Schedule> {
        let schedule = self.store().set_schedule_enabled(id, enabled).await?;
        self.add_job(&schedule).await;
        Ok(schedule)
    }

    pub async fn delete_schedule(&self, id: Uuid) -> Result<()> {
        self.remove_job(id).await;
        if !self.store().delete_schedule(id).await? {
            return Err(AppError::NotFound(format!("Schedule {} not found", id)));
        }
        Ok(())
    }

    pub async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        self.store().list_schedules().await
    }

    /// Run a schedule now, then apply its retention.
    pub async fn run_now(&self, id: Uuid) -> Result<()> {
        let schedule = self
            .store()
            .get_schedule(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", id)))?;
        self.runner.run(&schedule).await;
        Ok(())
    }

    /// Apply a schedule's retention count; returns how many runs were deleted.
    pub async fn prune(&self, schedule: &Schedule) -> Result<usize> {
        self.runner.prune(schedule).await
    }
}
