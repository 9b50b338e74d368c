//! Remote volume access over SSH/SFTP.
//!
//! [`RemoteConnector`] opens an authenticated [`RemoteSession`] to a node.
//! The pipeline only depends on these traits; [`ssh::SshConnector`] is the
//! production implementation.

pub mod ssh;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::node::{AuthMode, Node};

/// How an SSH session authenticates.
#[derive(Clone)]
pub enum SshAuth {
    Password(String),
    /// Path of a private key file
    KeyFile(PathBuf),
    /// PEM-encoded private key held in memory
    KeyData(String),
}

/// Everything needed to open an SSH session.
#[derive(Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
}

redacted_debug!(SshTarget {
    show host,
    show port,
    show username,
    redact auth,
});

impl SshTarget {
    pub fn from_node(node: &Node) -> Result<Self> {
        let port = u16::try_from(node.port)
            .map_err(|_| AppError::Validation(format!("Invalid port {}", node.port)))?;
        let auth = match node.auth_mode {
            AuthMode::Password => SshAuth::Password(node.credential.clone()),
            AuthMode::Key => SshAuth::KeyFile(PathBuf::from(&node.credential)),
        };
        Ok(Self {
            host: node.host.clone(),
            port,
            username: node.username.clone(),
            auth,
        })
    }
}

/// Opens sessions to nodes.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Connect and authenticate; failures are connection errors.
    async fn connect(&self, node: &Node) -> Result<Box<dyn RemoteSession>>;
}

/// An open, authenticated session to one node.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Immediate subdirectories of `path`, hidden entries excluded, sorted by name.
    async fn list_dirs(&self, path: &str) -> Result<Vec<String>>;

    /// Mirror a remote directory tree into `local`; returns bytes copied.
    async fn download_dir(&self, remote: &str, local: &Path) -> Result<u64>;

    /// Close the session. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// Join a remote directory and an entry name with a single `/`.
pub fn join_remote(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Keep visible directory names and sort them.
pub fn visible_sorted(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut names: Vec<String> = names.into_iter().filter(|n| !n.starts_with('.')).collect();
    names.sort();
    names
}

/// Run blocking SSH work on the blocking thread pool.
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Blocking task failed: {}", e)))?
}
