//! Wiring and command execution for the CLI.

use serde::Serialize;
use std::sync::Arc;

use super::{Cli, Command, OutputFormat};
use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::models::backup::BackupStatus;
use crate::remote::ssh::SshConnector;
use crate::services::backup_service::{BackupService, CreateBackupOptions};
use crate::services::node_service::NodeService;
use crate::services::notification_service::{Notifier, WebhookNotifier};
use crate::services::scheduler_service::SchedulerService;
use crate::services::storage_service::StorageService;
use crate::services::workload_service::{HttpWorkloadCoordinator, SafeStopPolicy};
use crate::store::{PgRecordStore, RecordStore};

/// Fully wired services over one record store.
pub struct Services {
    pub store: Arc<dyn RecordStore>,
    pub nodes: NodeService,
    pub backups: Arc<BackupService>,
    pub scheduler: SchedulerService,
}

impl Services {
    pub fn build(config: &Config, store: Arc<dyn RecordStore>) -> Result<Self> {
        let connector = Arc::new(SshConnector::new());
        let workload = Arc::new(HttpWorkloadCoordinator::new(store.clone())?);
        let storage = Arc::new(StorageService::new(
            store.clone(),
            config.local_backup_path.clone(),
        ));
        let notifier = Notifier::new(Arc::new(WebhookNotifier::new(store.clone())?));

        let backups = Arc::new(
            BackupService::new(
                store.clone(),
                connector.clone(),
                workload,
                storage,
                notifier,
                config.scratch_path.clone(),
            )
            .with_safe_stop(SafeStopPolicy::from_config(config))
            .with_node_lock(config.node_lock),
        );

        Ok(Self {
            nodes: NodeService::new(store.clone(), connector),
            scheduler: SchedulerService::new(store.clone(), backups.clone()),
            backups,
            store,
        })
    }
}

fn print<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => println!("{}", text()),
    }
    Ok(())
}

/// Connect to the database, apply migrations and run one command.
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let pool = db::create_pool(&config.database_url).await?;
    let pg = PgRecordStore::new(pool);
    pg.migrate().await?;
    tracing::info!("Database migrations complete");

    let services = Services::build(&config, Arc::new(pg))?;
    execute(cli, &services).await
}

/// Run one command against already wired services.
pub async fn execute(cli: Cli, services: &Services) -> Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Serve => {
            services.backups.recover_interrupted().await?;
            services.scheduler.init().await?;
            tracing::info!("Volume Keeper running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            services.scheduler.stop_all().await;
        }

        Command::Backup {
            node,
            volume,
            storage,
        } => {
            let node = services.nodes.find_by_name(&node).await?;
            let run = services
                .backups
                .create_backup(
                    CreateBackupOptions {
                        node_id: node.id,
                        volume,
                        storage,
                    },
                    BackupStatus::Pending,
                )
                .await?;
            let report = services.backups.execute(run.id).await?;
            print(format, &report, || {
                let mut text = format!(
                    "{} ({} bytes) -> {}",
                    report.filename, report.size_bytes, report.storage_path
                );
                for warning in &report.recovered {
                    text.push_str(&format!("\nwarning: {:?}", warning));
                }
                text
            })?;
        }

        Command::Volumes { node } => {
            let node = services.nodes.find_by_name(&node).await?;
            let volumes = services.nodes.list_volumes(node.id).await?;
            print(format, &volumes, || volumes.join("\n"))?;
        }

        Command::TestNode { node } => {
            let node = services.nodes.find_by_name(&node).await?;
            let status = services.nodes.test_connection(node.id).await?;
            print(format, &status, || format!("{}: {:?}", node.name, status))?;
        }

        Command::Stats => {
            let stats = services.backups.stats().await?;
            print(format, &stats, || {
                format!(
                    "total {} | pending {} | running {} | completed {} | failed {} | {} bytes stored",
                    stats.total,
                    stats.pending,
                    stats.running,
                    stats.completed,
                    stats.failed,
                    stats.total_size_bytes
                )
            })?;
        }

        Command::Logs { backup } => {
            let logs = services.backups.logs(backup).await?;
            print(format, &logs, || {
                logs.iter()
                    .map(|l| format!("{} [{:?}] {}", l.created_at.to_rfc3339(), l.level, l.message))
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
    }
    Ok(())
}
