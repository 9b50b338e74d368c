//! Node model: a remote host holding backup volumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Default remote directory containing one subdirectory per volume.
pub const DEFAULT_VOLUMES_PATH: &str = "/var/lib/pterodactyl/volumes";

/// Default SSH port.
pub const DEFAULT_SSH_PORT: i32 = 22;

/// How the SSH session authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "auth_mode", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Credential is the path of a private key file
    Key,
    /// Credential is the account password
    Password,
}

/// Last observed connectivity of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "node_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Unknown,
    Online,
    Offline,
}

/// Remote host definition.
///
/// The credential is skipped on serialization and redacted from `Debug`
/// output so it is never echoed back once stored.
#[derive(Clone, FromRow, Serialize)]
pub struct Node {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    pub auth_mode: AuthMode,
    #[serde(skip_serializing)]
    pub credential: String,
    pub volumes_path: String,
    pub status: NodeStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

redacted_debug!(Node {
    show id,
    show name,
    show host,
    show port,
    show username,
    show auth_mode,
    redact credential,
    show volumes_path,
    show status,
});

/// Create or update payload for a node.
///
/// On update an omitted credential keeps the stored one.
#[derive(Clone, Deserialize)]
pub struct NodeRequest {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<i32>,
    pub username: String,
    pub auth_mode: AuthMode,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub volumes_path: Option<String>,
}

redacted_debug!(NodeRequest {
    show name,
    show host,
    show port,
    show username,
    show auth_mode,
    redact_option credential,
    show volumes_path,
});

impl NodeRequest {
    /// Validate the request; `require_credential` is true on create.
    pub fn validate(&self, require_credential: bool) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("Node name is required".into()));
        }
        if self.host.trim().is_empty() {
            return Err(AppError::Validation("Node host is required".into()));
        }
        if self.username.trim().is_empty() {
            return Err(AppError::Validation("Node username is required".into()));
        }
        let port = self.port.unwrap_or(DEFAULT_SSH_PORT);
        if !(1..=65535).contains(&port) {
            return Err(AppError::Validation(format!(
                "Port {} is out of range",
                port
            )));
        }
        let has_credential = self
            .credential
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());
        if require_credential && !has_credential {
            let what = match self.auth_mode {
                AuthMode::Key => "a private key path",
                AuthMode::Password => "a password",
            };
            return Err(AppError::Validation(format!(
                "Node authentication requires {}",
                what
            )));
        }
        if let Some(path) = &self.volumes_path {
            if !path.starts_with('/') {
                return Err(AppError::Validation(
                    "Volumes path must be absolute".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn port_or_default(&self) -> i32 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }

    pub fn volumes_path_or_default(&self) -> String {
        self.volumes_path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_VOLUMES_PATH.to_string())
    }
}
