//! Node management tests.

mod common;

use std::sync::Arc;

use common::fixtures::{node_request, running_run, schedule_request};
use common::{events_of, Events, FakeConnector, FakeNode};
use volume_keeper_backend::error::AppError;
use volume_keeper_backend::models::node::NodeStatus;
use volume_keeper_backend::services::node_service::NodeService;
use volume_keeper_backend::store::{MemoryRecordStore, RecordStore};

fn service(node: FakeNode) -> (NodeService, Arc<MemoryRecordStore>, Events) {
    let store = Arc::new(MemoryRecordStore::new());
    let events = Events::default();
    let connector = Arc::new(FakeConnector::new(node, events.clone()));
    (NodeService::new(store.clone(), connector), store, events)
}

#[tokio::test]
async fn test_create_rejects_duplicate_name() {
    let (nodes, _, _) = service(FakeNode::default());
    nodes.create_node(&node_request("alpha")).await.unwrap();

    let dup = nodes.create_node(&node_request("alpha")).await;
    assert!(matches!(dup, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn test_create_requires_credential() {
    let (nodes, _, _) = service(FakeNode::default());
    let mut req = node_request("alpha");
    req.credential = None;
    assert!(matches!(
        nodes.create_node(&req).await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn test_update_without_credential_keeps_stored_one() {
    let (nodes, store, _) = service(FakeNode::default());
    let node = nodes.create_node(&node_request("alpha")).await.unwrap();

    let mut req = node_request("alpha-renamed");
    req.credential = None;
    req.port = Some(22);
    let updated = nodes.update_node(node.id, &req).await.unwrap();
    assert_eq!(updated.name, "alpha-renamed");
    assert_eq!(updated.port, 22);

    let stored = store.get_node(node.id).await.unwrap().unwrap();
    assert_eq!(stored.credential, "s3cret-password");
}

#[tokio::test]
async fn test_update_rejects_name_of_other_node() {
    let (nodes, _, _) = service(FakeNode::default());
    nodes.create_node(&node_request("alpha")).await.unwrap();
    let beta = nodes.create_node(&node_request("beta")).await.unwrap();

    let result = nodes.update_node(beta.id, &node_request("alpha")).await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    // Keeping its own name is fine
    nodes.update_node(beta.id, &node_request("beta")).await.unwrap();
}

#[tokio::test]
async fn test_credential_never_echoed() {
    let (nodes, _, _) = service(FakeNode::default());
    let node = nodes.create_node(&node_request("alpha")).await.unwrap();

    let json = serde_json::to_string(&node).unwrap();
    assert!(!json.contains("s3cret-password"));
    assert!(!format!("{:?}", node).contains("s3cret-password"));
    assert!(!format!("{:?}", node_request("alpha")).contains("s3cret-password"));
}

#[tokio::test]
async fn test_delete_refused_while_referenced() {
    let (nodes, store, _) = service(FakeNode::default());
    let node = nodes.create_node(&node_request("alpha")).await.unwrap();

    let schedule = store
        .create_schedule(&schedule_request(node.id, "0 3 * * *", 3))
        .await
        .unwrap();
    assert!(matches!(
        nodes.delete_node(node.id).await,
        Err(AppError::Validation(_))
    ));
    store.delete_schedule(schedule.id).await.unwrap();

    let run = running_run(node.id);
    store.insert_run(run.clone()).await;
    assert!(matches!(
        nodes.delete_node(node.id).await,
        Err(AppError::Validation(_))
    ));
    store.mark_failed(run.id, "interrupted").await.unwrap();

    nodes.delete_node(node.id).await.unwrap();
    assert!(store.get_node(node.id).await.unwrap().is_none());
    assert!(store.get_run(run.id).await.unwrap().is_none());
    assert!(matches!(
        nodes.get_node(node.id).await,
        Err(AppError::NodeNotFound(_))
    ));
}

#[tokio::test]
async fn test_connection_check_records_status() {
    let (nodes, store, events) = service(FakeNode::default().with_volume("v1", &[]));
    let node = nodes.create_node(&node_request("alpha")).await.unwrap();
    assert_eq!(node.status, NodeStatus::Unknown);

    assert_eq!(
        nodes.test_connection(node.id).await.unwrap(),
        NodeStatus::Online
    );
    let stored = store.get_node(node.id).await.unwrap().unwrap();
    assert_eq!(stored.status, NodeStatus::Online);
    assert!(stored.last_checked_at.is_some());
    assert!(events_of(&events).contains(&"close".to_string()));

    let (offline, store, _) = service(FakeNode::default().unreachable());
    let node = offline.create_node(&node_request("beta")).await.unwrap();
    assert_eq!(
        offline.test_connection(node.id).await.unwrap(),
        NodeStatus::Offline
    );
    let stored = store.get_node(node.id).await.unwrap().unwrap();
    assert_eq!(stored.status, NodeStatus::Offline);
}

#[tokio::test]
async fn test_list_volumes() {
    let node = FakeNode::default()
        .with_volume("zeta", &[])
        .with_volume("alpha", &[]);
    let (nodes, _, _) = service(node);
    let node = nodes.create_node(&node_request("alpha")).await.unwrap();

    assert_eq!(nodes.list_volumes(node.id).await.unwrap(), vec!["alpha", "zeta"]);
    assert!(matches!(
        nodes.find_by_name("missing").await,
        Err(AppError::NodeNotFound(_))
    ));
}
