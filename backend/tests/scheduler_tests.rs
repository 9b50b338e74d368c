//! Schedule registry and retention tests.

mod common;

use std::time::Duration;
use uuid::Uuid;

use common::fixtures::{completed_run, schedule_request};
use common::{FakeNode, Harness, HarnessBuilder};
use volume_keeper_backend::error::AppError;
use volume_keeper_backend::models::backup::{BackupStatus, StorageKind};
use volume_keeper_backend::models::node::Node;
use volume_keeper_backend::services::scheduler_service::SchedulerService;
use volume_keeper_backend::store::RecordStore;

fn node_with_volume() -> FakeNode {
    FakeNode::default().with_volume("world", &[("level.dat", "data")])
}

async fn setup(h: &Harness) -> (SchedulerService, Node) {
    let node = h.add_node("alpha").await;
    let scheduler = SchedulerService::new(h.store.clone(), h.backups.clone());
    (scheduler, node)
}

#[tokio::test]
async fn test_prune_keeps_newest_completed_runs() {
    let h = HarnessBuilder::new(node_with_volume()).build();
    let (scheduler, node) = setup(&h).await;

    let runs: Vec<_> = [50, 40, 30, 20, 10]
        .into_iter()
        .map(|age| completed_run(node.id, age))
        .collect();
    for run in &runs {
        h.store.insert_run(run.clone()).await;
    }
    // Other storage kinds and failed runs are outside the retention set
    let mut on_s3 = completed_run(node.id, 60);
    on_s3.storage = StorageKind::S3;
    h.store.insert_run(on_s3.clone()).await;
    let mut failed = completed_run(node.id, 70);
    failed.status = BackupStatus::Failed;
    h.store.insert_run(failed.clone()).await;

    let schedule = scheduler
        .create_schedule(&schedule_request(node.id, "0 3 * * *", 3))
        .await
        .unwrap();
    assert_eq!(scheduler.prune(&schedule).await.unwrap(), 2);

    let remaining: Vec<Uuid> = h
        .store
        .list_completed_by_node_and_storage(node.id, StorageKind::Local)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(remaining, vec![runs[4].id, runs[3].id, runs[2].id]);
    assert!(h.store.get_run(on_s3.id).await.unwrap().is_some());
    assert!(h.store.get_run(failed.id).await.unwrap().is_some());

    // Already within retention
    assert_eq!(scheduler.prune(&schedule).await.unwrap(), 0);
    scheduler.stop_all().await;
}

#[tokio::test]
async fn test_run_now_prunes_even_when_run_fails() {
    let h = HarnessBuilder::new(node_with_volume())
        .failing_upload()
        .build();
    let (scheduler, node) = setup(&h).await;
    let old: Vec<_> = [30, 20, 10]
        .into_iter()
        .map(|age| completed_run(node.id, age))
        .collect();
    for run in &old {
        h.store.insert_run(run.clone()).await;
    }

    let schedule = scheduler
        .create_schedule(&schedule_request(node.id, "0 3 * * *", 2))
        .await
        .unwrap();
    scheduler.run_now(schedule.id).await.unwrap();

    let runs = h.store.list_runs_for_node(node.id).await.unwrap();
    let failed: Vec<_> = runs
        .iter()
        .filter(|r| r.status == BackupStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(h.store.get_run(old[0].id).await.unwrap().is_none());
    assert!(h.store.get_run(old[1].id).await.unwrap().is_some());
    assert!(h.store.get_run(old[2].id).await.unwrap().is_some());

    let touched = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
    assert!(touched.last_run_at.is_some());
    scheduler.stop_all().await;
}

#[tokio::test]
async fn test_run_now_completes_backup() {
    let h = HarnessBuilder::new(node_with_volume()).build();
    let (scheduler, node) = setup(&h).await;
    let schedule = scheduler
        .create_schedule(&schedule_request(node.id, "0 3 * * *", 5))
        .await
        .unwrap();

    scheduler.run_now(schedule.id).await.unwrap();

    let runs = h.store.list_runs_for_node(node.id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, BackupStatus::Completed);
    assert_eq!(runs[0].volume, "all-volumes");
    scheduler.stop_all().await;
}

#[tokio::test]
async fn test_create_schedule_validation() {
    let h = HarnessBuilder::new(node_with_volume()).build();
    let (scheduler, node) = setup(&h).await;

    let bad_cron = scheduler
        .create_schedule(&schedule_request(node.id, "every day", 3))
        .await;
    assert!(matches!(bad_cron, Err(AppError::Validation(_))));

    let bad_retention = scheduler
        .create_schedule(&schedule_request(node.id, "0 3 * * *", 0))
        .await;
    assert!(matches!(bad_retention, Err(AppError::Validation(_))));

    let unknown_node = scheduler
        .create_schedule(&schedule_request(Uuid::new_v4(), "0 3 * * *", 3))
        .await;
    assert!(matches!(unknown_node, Err(AppError::NodeNotFound(_))));

    assert!(scheduler.list_schedules().await.unwrap().is_empty());
    assert_eq!(scheduler.active_jobs().await, 0);
}

#[tokio::test]
async fn test_invalid_stored_cron_leaves_no_timer() {
    let h = HarnessBuilder::new(node_with_volume()).build();
    let (scheduler, node) = setup(&h).await;

    // Bypass service validation the way a hand-edited row would
    let schedule = h
        .store
        .create_schedule(&schedule_request(node.id, "not a cron", 3))
        .await
        .unwrap();

    assert!(!scheduler.add_job(&schedule).await);
    assert!(!scheduler.is_registered(schedule.id).await);
    assert_eq!(scheduler.init().await.unwrap(), 0);
}

#[tokio::test]
async fn test_timer_lifecycle() {
    let h = HarnessBuilder::new(node_with_volume()).build();
    let (scheduler, node) = setup(&h).await;

    let schedule = scheduler
        .create_schedule(&schedule_request(node.id, "0 3 * * *", 3))
        .await
        .unwrap();
    assert!(scheduler.is_registered(schedule.id).await);

    scheduler.set_enabled(schedule.id, false).await.unwrap();
    assert!(!scheduler.is_registered(schedule.id).await);

    scheduler.set_enabled(schedule.id, true).await.unwrap();
    assert!(scheduler.is_registered(schedule.id).await);

    let mut req = schedule_request(node.id, "30 4 * * 1", 3);
    req.name = "weekly".to_string();
    let updated = scheduler.update_schedule(schedule.id, &req).await.unwrap();
    assert_eq!(updated.cron_expression, "30 4 * * 1");
    assert_eq!(scheduler.active_jobs().await, 1);

    scheduler.delete_schedule(schedule.id).await.unwrap();
    assert!(!scheduler.is_registered(schedule.id).await);
    assert!(matches!(
        scheduler.delete_schedule(schedule.id).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_init_and_stop_all() {
    let h = HarnessBuilder::new(node_with_volume()).build();
    let (scheduler, node) = setup(&h).await;

    h.store
        .create_schedule(&schedule_request(node.id, "0 3 * * *", 3))
        .await
        .unwrap();
    let mut disabled = schedule_request(node.id, "0 4 * * *", 3);
    disabled.enabled = false;
    h.store.create_schedule(&disabled).await.unwrap();

    assert_eq!(scheduler.init().await.unwrap(), 1);
    assert_eq!(scheduler.active_jobs().await, 1);

    scheduler.stop_all().await;
    assert_eq!(scheduler.active_jobs().await, 0);
}

#[tokio::test]
async fn test_timer_fires_scheduled_backup() {
    let h = HarnessBuilder::new(node_with_volume()).build();
    let (scheduler, node) = setup(&h).await;

    let schedule = scheduler
        .create_schedule(&schedule_request(node.id, "* * * * * *", 10))
        .await
        .unwrap();

    let mut completed = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let runs = h.store.list_runs_for_node(node.id).await.unwrap();
        if runs.iter().any(|r| r.status == BackupStatus::Completed) {
            completed = true;
            break;
        }
    }
    scheduler.stop_all().await;
    assert!(completed, "scheduled backup never completed");

    let touched = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
    assert!(touched.last_run_at.is_some());
}

#[tokio::test]
async fn test_removed_schedule_is_not_run() {
    let h = HarnessBuilder::new(node_with_volume()).build();
    let (scheduler, node) = setup(&h).await;
    let schedule = scheduler
        .create_schedule(&schedule_request(node.id, "0 3 * * *", 3))
        .await
        .unwrap();
    scheduler.delete_schedule(schedule.id).await.unwrap();

    assert!(matches!(
        scheduler.run_now(schedule.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(h.store.list_runs_for_node(node.id).await.unwrap().is_empty());
}
