//! SSH/SFTP implementation of the remote volume client (ssh2 / libssh2).
//!
//! libssh2 is blocking, so every call runs under [`run_blocking`].

use async_trait::async_trait;
use ssh2::{Session, Sftp};
use std::fs::File;
use std::io;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{run_blocking, visible_sorted, RemoteConnector, RemoteSession, SshAuth, SshTarget};
use crate::error::{AppError, Result};
use crate::models::node::Node;

/// Timeout applied to blocking libssh2 calls.
const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// libssh2 SFTP status code for a missing path.
pub(crate) const SFTP_NO_SUCH_FILE: i32 = 2;

/// Open a TCP connection, complete the SSH handshake and authenticate.
pub fn open_session(target: &SshTarget) -> Result<Session> {
    let tcp = TcpStream::connect((target.host.as_str(), target.port)).map_err(|e| {
        AppError::Connection(format!(
            "Failed to connect to {}:{}: {}",
            target.host, target.port, e
        ))
    })?;

    let mut session = Session::new()
        .map_err(|e| AppError::Connection(format!("Failed to create SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(SESSION_TIMEOUT.as_millis() as u32);
    session
        .handshake()
        .map_err(|e| AppError::Connection(format!("SSH handshake with {} failed: {}", target.host, e)))?;

    let auth_result = match &target.auth {
        SshAuth::Password(password) => session.userauth_password(&target.username, password),
        SshAuth::KeyFile(path) => session.userauth_pubkey_file(&target.username, None, path, None),
        SshAuth::KeyData(pem) => session.userauth_pubkey_memory(&target.username, None, pem, None),
    };
    auth_result.map_err(|e| {
        AppError::Connection(format!(
            "SSH authentication as {} on {} failed: {}",
            target.username, target.host, e
        ))
    })?;

    if !session.authenticated() {
        return Err(AppError::Connection(format!(
            "SSH authentication as {} on {} was rejected",
            target.username, target.host
        )));
    }

    Ok(session)
}

/// Whether an ssh2 error means the remote path does not exist.
pub(crate) fn is_no_such_file(err: &ssh2::Error) -> bool {
    matches!(err.code(), ssh2::ErrorCode::SFTP(SFTP_NO_SUCH_FILE))
}

fn sftp_error(context: &str, path: &Path, err: ssh2::Error) -> AppError {
    AppError::Connection(format!("{} {}: {}", context, path.display(), err))
}

/// Mirror `remote` into `local`, regular files and directories only.
fn mirror_dir(sftp: &Sftp, remote: &Path, local: &Path) -> Result<u64> {
    std::fs::create_dir_all(local)?;

    let entries = sftp
        .readdir(remote)
        .map_err(|e| sftp_error("Failed to read remote directory", remote, e))?;

    let mut copied = 0u64;
    for (path, stat) in entries {
        let name = match path.file_name() {
            Some(name) => name.to_owned(),
            None => continue,
        };
        let target = local.join(&name);

        if stat.is_dir() {
            copied += mirror_dir(sftp, &path, &target)?;
        } else if stat.is_file() {
            let mut src = sftp
                .open(&path)
                .map_err(|e| sftp_error("Failed to open remote file", &path, e))?;
            let mut dst = File::create(&target)?;
            copied += io::copy(&mut src, &mut dst)?;
        } else {
            tracing::debug!(path = %path.display(), "Skipping non-regular remote entry");
        }
    }

    Ok(copied)
}

/// Connector that opens real SSH sessions.
#[derive(Debug, Default, Clone)]
pub struct SshConnector;

impl SshConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn connect(&self, node: &Node) -> Result<Box<dyn RemoteSession>> {
        let target = SshTarget::from_node(node)?;
        let host = target.host.clone();
        let session = run_blocking(move || open_session(&target)).await?;

        tracing::debug!(node = %node.name, host = %host, "SSH session established");
        Ok(Box::new(SshSession {
            session: Some(Arc::new(session)),
            host,
        }))
    }
}

/// Authenticated session to one node.
pub struct SshSession {
    session: Option<Arc<Session>>,
    host: String,
}

impl SshSession {
    fn session(&self) -> Result<Arc<Session>> {
        self.session
            .clone()
            .ok_or_else(|| AppError::Connection(format!("Session to {} is closed", self.host)))
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn list_dirs(&self, path: &str) -> Result<Vec<String>> {
        let session = self.session()?;
        let path = path.to_string();
        run_blocking(move || {
            let sftp = session
                .sftp()
                .map_err(|e| AppError::Connection(format!("Failed to open SFTP channel: {}", e)))?;
            let entries = sftp
                .readdir(Path::new(&path))
                .map_err(|e| sftp_error("Failed to list", Path::new(&path), e))?;

            let names = entries
                .into_iter()
                .filter(|(_, stat)| stat.is_dir())
                .filter_map(|(p, _)| p.file_name().and_then(|n| n.to_str()).map(str::to_string));
            Ok(visible_sorted(names))
        })
        .await
    }

    async fn download_dir(&self, remote: &str, local: &Path) -> Result<u64> {
        let session = self.session()?;
        let remote = remote.to_string();
        let local = local.to_path_buf();
        run_blocking(move || {
            let sftp = session
                .sftp()
                .map_err(|e| AppError::Connection(format!("Failed to open SFTP channel: {}", e)))?;
            mirror_dir(&sftp, Path::new(&remote), &local)
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            let host = self.host.clone();
            run_blocking(move || {
                session
                    .disconnect(None, "backup complete", None)
                    .map_err(|e| AppError::Connection(format!("Failed to disconnect from {}: {}", host, e)))
            })
            .await?;
        }
        Ok(())
    }
}

/// Run the disconnect of a session that was never closed.
///
/// Inside a runtime it goes to the blocking pool so a hung peer cannot stall
/// an async worker. Returns the blocking task handle when one was spawned.
fn release<F>(disconnect: F) -> Option<tokio::task::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn_blocking(disconnect)),
        Err(_) => {
            disconnect();
            None
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            release(move || {
                let _ = session.disconnect(None, "session dropped", None);
            });
        }
    }
}
