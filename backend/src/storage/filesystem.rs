//! Filesystem storage backend.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{is_artifact, StorageBackend};
use crate::error::{AppError, Result};
use crate::models::backup::StorageKind;

/// Filesystem-based storage backend
pub struct FilesystemStorage {
    base_path: PathBuf,
}

impl FilesystemStorage {
    /// Create new filesystem storage
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a name to a path directly inside the base directory.
    ///
    /// Only the final path component is used; anything else is logged as a
    /// blocked traversal attempt.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let base_name = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AppError::Validation(format!("Invalid backup file name: {:?}", name)))?;

        if base_name != name {
            tracing::warn!(
                requested = %name,
                resolved = %base_name,
                "Blocked path traversal attempt in storage name"
            );
        }

        Ok(self.base_path.join(base_name))
    }

    async fn require(&self, name: &str) -> Result<PathBuf> {
        let path = self.resolve(name)?;
        if !fs::try_exists(&path).await? {
            return Err(AppError::NotFound(format!("Backup file not found: {}", name)));
        }
        Ok(path)
    }
}

#[async_trait]
impl StorageBackend for FilesystemStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn upload(&self, local: &Path, name: &str) -> Result<String> {
        let path = self.resolve(name)?;
        fs::create_dir_all(&self.base_path).await?;

        fs::copy(local, &path).await.map_err(|e| {
            AppError::StorageOperation(format!("Failed to store {}: {}", name, e))
        })?;
        let file = fs::File::open(&path).await?;
        file.sync_all().await?;

        let absolute = fs::canonicalize(&path).await?;
        tracing::debug!(path = %absolute.display(), "Stored backup on local disk");
        Ok(absolute.to_string_lossy().into_owned())
    }

    async fn download(&self, name: &str, dest: &Path) -> Result<()> {
        let path = self.require(name).await?;
        fs::copy(&path, dest).await.map_err(|e| {
            AppError::StorageOperation(format!("Failed to read {}: {}", name, e))
        })?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.require(name).await?;
        fs::remove_file(&path).await.map_err(|e| {
            AppError::StorageOperation(format!("Failed to delete {}: {}", name, e))
        })?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.resolve(name)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn list(&self) -> Result<Vec<String>> {
        if !fs::try_exists(&self.base_path).await? {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&self.base_path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_artifact(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn size(&self, name: &str) -> Result<u64> {
        let path = self.require(name).await?;
        Ok(fs::metadata(&path).await?.len())
    }

    fn local_path(&self, name: &str) -> Result<Option<PathBuf>> {
        self.resolve(name).map(Some)
    }
}
