//! SFTP storage backend.
//!
//! Every operation opens a fresh authenticated connection from the current
//! settings and releases it through [`SftpConnection`]'s drop guard.

use async_trait::async_trait;
use ssh2::{Session, Sftp};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use super::{is_artifact, StorageBackend};
use crate::error::{AppError, Result};
use crate::models::backup::StorageKind;
use crate::models::setting;
use crate::remote::ssh::{is_no_such_file, open_session};
use crate::remote::{join_remote, run_blocking, SshAuth, SshTarget};

const DEFAULT_REMOTE_PATH: &str = "/backups";
const DEFAULT_PORT: u16 = 22;

/// SFTP backend configuration
#[derive(Clone)]
pub struct SftpConfig {
    pub target: SshTarget,
    /// Remote directory holding the artifacts
    pub remote_path: String,
}

redacted_debug!(SftpConfig {
    show target,
    show remote_path,
});

impl SftpConfig {
    /// Build config from the settings table
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            settings
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let host = get(setting::SFTP_HOST)
            .ok_or_else(|| AppError::StorageConfig("SFTP host is not configured".into()))?;
        let username = get(setting::SFTP_USERNAME)
            .ok_or_else(|| AppError::StorageConfig("SFTP username is not configured".into()))?;
        let port = match get(setting::SFTP_PORT) {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| AppError::StorageConfig(format!("Invalid SFTP port: {}", p)))?,
            None => DEFAULT_PORT,
        };

        let auth = if let Some(key) = get(setting::SFTP_PRIVATE_KEY) {
            if key.starts_with("-----BEGIN") {
                SshAuth::KeyData(key)
            } else {
                SshAuth::KeyFile(PathBuf::from(key))
            }
        } else if let Some(password) = get(setting::SFTP_PASSWORD) {
            SshAuth::Password(password)
        } else {
            return Err(AppError::StorageConfig(
                "SFTP requires a password or private key".into(),
            ));
        };

        let remote_path = get(setting::SFTP_PATH).unwrap_or_else(|| DEFAULT_REMOTE_PATH.into());
        if !remote_path.starts_with('/') {
            return Err(AppError::StorageConfig(format!(
                "SFTP path must be absolute: {}",
                remote_path
            )));
        }

        Ok(Self {
            target: SshTarget {
                host,
                port,
                username,
                auth,
            },
            remote_path,
        })
    }
}

/// An open SFTP channel; the SSH session is disconnected when dropped.
struct SftpConnection {
    session: Session,
    sftp: Sftp,
}

impl SftpConnection {
    fn open(target: &SshTarget) -> Result<Self> {
        let session = open_session(target)?;
        let sftp = session
            .sftp()
            .map_err(|e| AppError::StorageOperation(format!("Failed to open SFTP channel: {}", e)))?;
        Ok(Self { session, sftp })
    }
}

impl Drop for SftpConnection {
    fn drop(&mut self) {
        let _ = self.session.disconnect(None, "transfer complete", None);
    }
}

/// Create every missing component of an absolute remote directory.
fn ensure_remote_dir(sftp: &Sftp, dir: &str) -> Result<()> {
    let mut current = PathBuf::from("/");
    for part in dir.split('/').filter(|p| !p.is_empty()) {
        current.push(part);
        match sftp.stat(&current) {
            Ok(stat) if stat.is_dir() => continue,
            Ok(_) => {
                return Err(AppError::StorageOperation(format!(
                    "Remote path {} exists and is not a directory",
                    current.display()
                )))
            }
            Err(e) if is_no_such_file(&e) => {
                sftp.mkdir(&current, 0o755).map_err(|e| {
                    AppError::StorageOperation(format!(
                        "Failed to create remote directory {}: {}",
                        current.display(),
                        e
                    ))
                })?;
            }
            Err(e) => {
                return Err(AppError::StorageOperation(format!(
                    "Failed to stat {}: {}",
                    current.display(),
                    e
                )))
            }
        }
    }
    Ok(())
}

/// SFTP storage backend
pub struct SftpBackend {
    config: SftpConfig,
}

impl SftpBackend {
    pub fn new(config: SftpConfig) -> Self {
        Self { config }
    }

    /// Create SFTP backend from the settings table
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        Ok(Self::new(SftpConfig::from_settings(settings)?))
    }

    fn remote_file(&self, name: &str) -> String {
        join_remote(&self.config.remote_path, name)
    }

    /// Run `op` against a fresh connection on the blocking pool.
    async fn with_connection<F, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&SftpConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let target = self.config.target.clone();
        run_blocking(move || {
            let conn = SftpConnection::open(&target)?;
            op(&conn)
        })
        .await
    }
}

fn not_found_or(name: &str, context: &str, err: ssh2::Error) -> AppError {
    if is_no_such_file(&err) {
        AppError::NotFound(format!("Backup file not found: {}", name))
    } else {
        AppError::StorageOperation(format!("{} '{}': {}", context, name, err))
    }
}

#[async_trait]
impl StorageBackend for SftpBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Sftp
    }

    async fn upload(&self, local: &Path, name: &str) -> Result<String> {
        let remote_dir = self.config.remote_path.clone();
        let remote_file = self.remote_file(name);
        let local = local.to_path_buf();
        let locator = remote_file.clone();

        self.with_connection(move |conn| {
            ensure_remote_dir(&conn.sftp, &remote_dir)?;
            let mut src = File::open(&local)?;
            let mut dst = conn.sftp.create(Path::new(&remote_file)).map_err(|e| {
                AppError::StorageOperation(format!("Failed to create {}: {}", remote_file, e))
            })?;
            io::copy(&mut src, &mut dst).map_err(|e| {
                AppError::StorageOperation(format!("Failed to upload {}: {}", remote_file, e))
            })?;
            Ok(())
        })
        .await?;

        tracing::debug!(path = %locator, "SFTP upload successful");
        Ok(locator)
    }

    async fn download(&self, name: &str, dest: &Path) -> Result<()> {
        let remote_file = self.remote_file(name);
        let dest = dest.to_path_buf();
        let name = name.to_string();

        self.with_connection(move |conn| {
            let mut src = conn
                .sftp
                .open(Path::new(&remote_file))
                .map_err(|e| not_found_or(&name, "Failed to open", e))?;
            let mut dst = File::create(&dest)?;
            io::copy(&mut src, &mut dst)?;
            dst.sync_all()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let remote_file = self.remote_file(name);
        let name = name.to_string();

        self.with_connection(move |conn| {
            conn.sftp
                .unlink(Path::new(&remote_file))
                .map_err(|e| not_found_or(&name, "Failed to delete", e))
        })
        .await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let remote_file = self.remote_file(name);
        let name = name.to_string();

        self.with_connection(move |conn| match conn.sftp.stat(Path::new(&remote_file)) {
            Ok(_) => Ok(true),
            Err(e) if is_no_such_file(&e) => Ok(false),
            Err(e) => Err(AppError::StorageOperation(format!(
                "Failed to check existence of '{}': {}",
                name, e
            ))),
        })
        .await
    }

    async fn list(&self) -> Result<Vec<String>> {
        let remote_dir = self.config.remote_path.clone();

        self.with_connection(move |conn| {
            let entries = match conn.sftp.readdir(Path::new(&remote_dir)) {
                Ok(entries) => entries,
                Err(e) if is_no_such_file(&e) => return Ok(Vec::new()),
                Err(e) => {
                    return Err(AppError::StorageOperation(format!(
                        "Failed to list {}: {}",
                        remote_dir, e
                    )))
                }
            };
            let mut names: Vec<String> = entries
                .into_iter()
                .filter(|(_, stat)| stat.is_file())
                .filter_map(|(p, _)| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .filter(|n| is_artifact(n))
                .collect();
            names.sort();
            Ok(names)
        })
        .await
    }

    async fn size(&self, name: &str) -> Result<u64> {
        let remote_file = self.remote_file(name);
        let name = name.to_string();

        self.with_connection(move |conn| {
            let stat = conn
                .sftp
                .stat(Path::new(&remote_file))
                .map_err(|e| not_found_or(&name, "Failed to stat", e))?;
            Ok(stat.size.unwrap_or(0))
        })
        .await
    }
}
