//! Storage backends for backup artifacts.

pub mod filesystem;
pub mod s3;
pub mod sftp;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::backup::{StorageKind, ARTIFACT_SUFFIX};

/// Storage backend trait
///
/// Backends address artifacts by file name. `upload` returns the locator that
/// is recorded on the run.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Kind of storage this backend writes to
    fn kind(&self) -> StorageKind;

    /// Store a local file under `name` and return its locator
    async fn upload(&self, local: &Path, name: &str) -> Result<String>;

    /// Copy a stored artifact to a local file
    async fn download(&self, name: &str, dest: &Path) -> Result<()>;

    /// Delete a stored artifact
    async fn delete(&self, name: &str) -> Result<()>;

    /// Check if an artifact exists
    async fn exists(&self, name: &str) -> Result<bool>;

    /// List stored artifact names
    async fn list(&self) -> Result<Vec<String>>;

    /// Get artifact size without fetching its content
    async fn size(&self, name: &str) -> Result<u64>;

    /// Path of an artifact on the local filesystem, when the backend is local
    fn local_path(&self, name: &str) -> Result<Option<PathBuf>> {
        let _ = name;
        Ok(None)
    }
}

/// Whether a stored name looks like a backup artifact.
pub fn is_artifact(name: &str) -> bool {
    name.ends_with(ARTIFACT_SUFFIX)
}
