//! Common test utilities for backend integration tests
//!
//! This module provides shared infrastructure for testing:
//! - In-memory fakes for remote nodes, the workload API and notifications
//! - Storage providers over a temporary directory
//! - A fully wired backup service over the in-memory record store

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fixtures;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use volume_keeper_backend::error::{AppError, Result};
use volume_keeper_backend::models::backup::StorageKind;
use volume_keeper_backend::models::node::Node;
use volume_keeper_backend::remote::{RemoteConnector, RemoteSession};
use volume_keeper_backend::services::backup_service::BackupService;
use volume_keeper_backend::services::notification_service::{
    Notification, NotificationKind, NotificationSink, Notifier,
};
use volume_keeper_backend::services::storage_service::StorageProvider;
use volume_keeper_backend::services::workload_service::{
    PowerSignal, SafeStopPolicy, WorkloadCoordinator, WorkloadState,
};
use volume_keeper_backend::storage::filesystem::FilesystemStorage;
use volume_keeper_backend::storage::StorageBackend;
use volume_keeper_backend::store::{MemoryRecordStore, RecordStore};

/// Ordered record of side effects across the fakes.
pub type Events = Arc<Mutex<Vec<String>>>;

pub fn events_of(events: &Events) -> Vec<String> {
    events.lock().unwrap().clone()
}

/// A node with a fixed set of volumes, each a list of `(relative path, content)` files.
#[derive(Clone, Default)]
pub struct FakeNode {
    pub volumes: BTreeMap<String, Vec<(String, Vec<u8>)>>,
    pub failing: HashSet<String>,
    pub unreachable: bool,
}

impl FakeNode {
    pub fn with_volume(mut self, name: &str, files: &[(&str, &str)]) -> Self {
        self.volumes.insert(
            name.to_string(),
            files
                .iter()
                .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
                .collect(),
        );
        self
    }

    /// The volume is listed but its download fails.
    pub fn with_failing_volume(mut self, name: &str) -> Self {
        self.volumes.insert(name.to_string(), Vec::new());
        self.failing.insert(name.to_string());
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }
}

pub struct FakeConnector {
    node: FakeNode,
    events: Events,
    download_delay: Duration,
}

impl FakeConnector {
    pub fn new(node: FakeNode, events: Events) -> Self {
        Self {
            node,
            events,
            download_delay: Duration::ZERO,
        }
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }
}

#[async_trait]
impl RemoteConnector for FakeConnector {
    async fn connect(&self, node: &Node) -> Result<Box<dyn RemoteSession>> {
        if self.node.unreachable {
            return Err(AppError::Connection(format!(
                "Failed to connect to {}:{}: connection refused",
                node.host, node.port
            )));
        }
        self.events.lock().unwrap().push(format!("connect:{}", node.name));
        Ok(Box::new(FakeSession {
            node: self.node.clone(),
            events: self.events.clone(),
            download_delay: self.download_delay,
            closed: false,
        }))
    }
}

pub struct FakeSession {
    node: FakeNode,
    events: Events,
    download_delay: Duration,
    closed: bool,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn list_dirs(&self, _path: &str) -> Result<Vec<String>> {
        Ok(self.node.volumes.keys().cloned().collect())
    }

    async fn download_dir(&self, remote: &str, local: &Path) -> Result<u64> {
        let name = remote.rsplit('/').next().unwrap_or(remote).to_string();
        self.events.lock().unwrap().push(format!("download:{}", name));
        if !self.download_delay.is_zero() {
            tokio::time::sleep(self.download_delay).await;
        }
        if self.node.failing.contains(&name) {
            return Err(AppError::Connection(format!("Read of {} timed out", remote)));
        }
        let files = self
            .node
            .volumes
            .get(&name)
            .ok_or_else(|| AppError::NotFound(format!("Remote path not found: {}", remote)))?;

        let mut bytes = 0u64;
        for (path, content) in files {
            let dest = local.join(path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, content).await?;
            bytes += content.len() as u64;
        }
        Ok(bytes)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.events.lock().unwrap().push("close".to_string());
        }
        Ok(())
    }
}

/// Workload API fake. Each id answers state queries from a script; the last
/// scripted state repeats forever.
pub struct FakeWorkload {
    states: Mutex<HashMap<String, VecDeque<WorkloadState>>>,
    reject_stop: bool,
    events: Events,
}

impl FakeWorkload {
    pub fn new(events: Events) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            reject_stop: false,
            events,
        }
    }

    pub fn script(self, id: &str, states: Vec<WorkloadState>) -> Self {
        self.states
            .lock()
            .unwrap()
            .insert(id.to_string(), states.into());
        self
    }

    pub fn rejecting_stop(mut self) -> Self {
        self.reject_stop = true;
        self
    }
}

#[async_trait]
impl WorkloadCoordinator for FakeWorkload {
    async fn get_state(&self, id: &str) -> Result<Option<WorkloadState>> {
        self.events.lock().unwrap().push(format!("state:{}", id));
        let mut states = self.states.lock().unwrap();
        let Some(queue) = states.get_mut(id) else {
            return Ok(None);
        };
        if queue.len() > 1 {
            Ok(queue.pop_front())
        } else {
            Ok(queue.front().cloned())
        }
    }

    async fn set_state(&self, id: &str, signal: PowerSignal) -> Result<bool> {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:{}", signal.as_str(), id));
        if signal == PowerSignal::Stop && self.reject_stop {
            return Ok(false);
        }
        Ok(true)
    }
}

/// Collects every notification it is sent.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent.lock().unwrap().iter().map(|n| n.kind).collect()
    }

    pub fn last(&self) -> Option<Notification> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Serves one backend for every storage kind.
pub struct StaticStorage {
    backend: Arc<dyn StorageBackend>,
}

impl StaticStorage {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl StorageProvider for StaticStorage {
    async fn backend(&self, _kind: StorageKind) -> Result<Arc<dyn StorageBackend>> {
        Ok(self.backend.clone())
    }
}

/// Backend whose uploads always fail.
pub struct FailingUpload;

#[async_trait]
impl StorageBackend for FailingUpload {
    fn kind(&self) -> StorageKind {
        StorageKind::S3
    }

    async fn upload(&self, _local: &Path, name: &str) -> Result<String> {
        Err(AppError::StorageOperation(format!(
            "Failed to upload {}: bucket unreachable",
            name
        )))
    }

    async fn download(&self, name: &str, _dest: &Path) -> Result<()> {
        Err(AppError::NotFound(name.to_string()))
    }

    async fn delete(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn size(&self, name: &str) -> Result<u64> {
        Err(AppError::NotFound(name.to_string()))
    }
}

/// Everything a pipeline test needs, wired over temporary directories.
pub struct Harness {
    pub store: Arc<MemoryRecordStore>,
    pub backups: Arc<BackupService>,
    pub events: Events,
    pub sink: Arc<RecordingSink>,
    pub storage_dir: PathBuf,
    pub scratch_dir: PathBuf,
    _temp: TempDir,
}

pub struct HarnessBuilder {
    node: FakeNode,
    workload: Option<FakeWorkload>,
    failing_upload: bool,
    node_lock: bool,
    download_delay: Duration,
    events: Events,
}

impl HarnessBuilder {
    pub fn new(node: FakeNode) -> Self {
        Self {
            node,
            workload: None,
            failing_upload: false,
            node_lock: false,
            download_delay: Duration::ZERO,
            events: Events::default(),
        }
    }

    pub fn events(&self) -> Events {
        self.events.clone()
    }

    pub fn workload(mut self, workload: FakeWorkload) -> Self {
        self.workload = Some(workload);
        self
    }

    pub fn failing_upload(mut self) -> Self {
        self.failing_upload = true;
        self
    }

    pub fn node_lock(mut self) -> Self {
        self.node_lock = true;
        self
    }

    pub fn download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    pub fn build(self) -> Harness {
        let temp = TempDir::new().unwrap();
        let storage_dir = temp.path().join("backups");
        let scratch_dir = temp.path().join("scratch");

        let store = Arc::new(MemoryRecordStore::new());
        let backend: Arc<dyn StorageBackend> = if self.failing_upload {
            Arc::new(FailingUpload)
        } else {
            Arc::new(FilesystemStorage::new(&storage_dir))
        };
        let workload = self
            .workload
            .unwrap_or_else(|| FakeWorkload::new(self.events.clone()));
        let sink = Arc::new(RecordingSink::default());

        let backups = BackupService::new(
            store.clone(),
            Arc::new(
                FakeConnector::new(self.node, self.events.clone())
                    .with_download_delay(self.download_delay),
            ),
            Arc::new(workload),
            Arc::new(StaticStorage::new(backend)),
            Notifier::new(sink.clone()),
            &scratch_dir,
        )
        .with_safe_stop(SafeStopPolicy {
            poll_interval: Duration::from_millis(1),
            max_attempts: 3,
        })
        .with_node_lock(self.node_lock);

        Harness {
            store,
            backups: Arc::new(backups),
            events: self.events,
            sink,
            storage_dir,
            scratch_dir,
            _temp: temp,
        }
    }
}

impl Harness {
    pub async fn add_node(&self, name: &str) -> Node {
        self.store
            .create_node(&fixtures::node_request(name))
            .await
            .unwrap()
    }
}

/// Remove consecutive duplicates from a progress trace.
pub fn dedup(mut trace: Vec<i32>) -> Vec<i32> {
    trace.dedup();
    trace
}
