//! Node management: definitions, connectivity checks and volume listing.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::backup::BackupStatus;
use crate::models::node::{Node, NodeRequest, NodeStatus};
use crate::remote::RemoteConnector;
use crate::store::RecordStore;

/// Node service
pub struct NodeService {
    store: Arc<dyn RecordStore>,
    connector: Arc<dyn RemoteConnector>,
}

impl NodeService {
    pub fn new(store: Arc<dyn RecordStore>, connector: Arc<dyn RemoteConnector>) -> Self {
        Self { store, connector }
    }

    pub async fn create_node(&self, req: &NodeRequest) -> Result<Node> {
        req.validate(true)?;
        if self.store.get_node_by_name(&req.name).await?.is_some() {
            return Err(AppError::Validation(format!(
                "Node '{}' already exists",
                req.name
            )));
        }
        let node = self.store.create_node(req).await?;
        tracing::info!(node = %node.name, host = %node.host, "Node created");
        Ok(node)
    }

    /// Update a node. An omitted credential keeps the stored one.
    pub async fn update_node(&self, id: Uuid, req: &NodeRequest) -> Result<Node> {
        req.validate(false)?;
        if let Some(existing) = self.store.get_node_by_name(&req.name).await? {
            if existing.id != id {
                return Err(AppError::Validation(format!(
                    "Node '{}' already exists",
                    req.name
                )));
            }
        }
        self.store.update_node(id, req).await
    }

    /// Delete a node together with its run history and schedules.
    ///
    /// Refused while a run against the node is in progress or while schedules
    /// still target it. Stored artifacts are left in place.
    pub async fn delete_node(&self, id: Uuid) -> Result<()> {
        let node = self.get_node(id).await?;

        let runs = self.store.list_runs_for_node(id).await?;
        if runs.iter().any(|r| r.status == BackupStatus::Running) {
            return Err(AppError::Validation(format!(
                "Node '{}' has a backup in progress",
                node.name
            )));
        }
        let schedules = self.store.list_schedules().await?;
        if schedules.iter().any(|s| s.node_id == id) {
            return Err(AppError::Validation(format!(
                "Node '{}' is still used by a schedule",
                node.name
            )));
        }

        self.store.delete_node(id).await?;
        tracing::info!(node = %node.name, "Node deleted");
        Ok(())
    }

    pub async fn get_node(&self, id: Uuid) -> Result<Node> {
        self.store
            .get_node(id)
            .await?
            .ok_or_else(|| AppError::NodeNotFound(id.to_string()))
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Node> {
        self.store
            .get_node_by_name(name)
            .await?
            .ok_or_else(|| AppError::NodeNotFound(name.to_string()))
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.store.list_nodes().await
    }

    /// Connect and list the volumes root, recording the node as online or offline.
    pub async fn test_connection(&self, id: Uuid) -> Result<NodeStatus> {
        let node = self.get_node(id).await?;

        let status = match self.check_reachable(&node).await {
            Ok(count) => {
                tracing::info!(node = %node.name, volumes = count, "Node is reachable");
                NodeStatus::Online
            }
            Err(e) => {
                tracing::warn!(node = %node.name, error = %e, "Node connection test failed");
                NodeStatus::Offline
            }
        };

        self.store.set_node_status(id, status).await?;
        Ok(status)
    }

    async fn check_reachable(&self, node: &Node) -> Result<usize> {
        let mut session = self.connector.connect(node).await?;
        let listed = session.list_dirs(&node.volumes_path).await;
        if let Err(e) = session.close().await {
            tracing::debug!(node = %node.name, error = %e, "Failed to close check session");
        }
        Ok(listed?.len())
    }

    /// Names of the volumes currently present on a node.
    pub async fn list_volumes(&self, id: Uuid) -> Result<Vec<String>> {
        let node = self.get_node(id).await?;
        let mut session = self.connector.connect(&node).await?;
        let listed = session.list_dirs(&node.volumes_path).await;
        if let Err(e) = session.close().await {
            tracing::debug!(node = %node.name, error = %e, "Failed to close session");
        }
        listed
    }
}
