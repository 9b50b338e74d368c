//! Storage service - resolves a storage kind to a backend.
//!
//! Backends are built per operation from the current settings, so settings
//! edits apply to the next upload without a restart.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::backup::StorageKind;
use crate::models::setting;
use crate::storage::filesystem::FilesystemStorage;
use crate::storage::s3::S3Backend;
use crate::storage::sftp::SftpBackend;
use crate::storage::StorageBackend;
use crate::store::RecordStore;

/// Snapshot of the settings table.
#[derive(Clone, Default)]
pub struct StorageSettings {
    values: HashMap<String, String>,
}

impl StorageSettings {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub async fn load(store: &dyn RecordStore) -> Result<Self> {
        Ok(Self::new(store.list_settings().await?))
    }

    fn has(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| !v.trim().is_empty())
    }

    /// Whether the minimum settings for a kind are present.
    pub fn is_configured(&self, kind: StorageKind) -> bool {
        match kind {
            StorageKind::Local => true,
            StorageKind::S3 => self.has(setting::S3_BUCKET) && self.has(setting::S3_ACCESS_KEY),
            StorageKind::Sftp => self.has(setting::SFTP_HOST) && self.has(setting::SFTP_USERNAME),
        }
    }

    pub fn values(&self) -> &HashMap<String, String> {
        &self.values
    }
}

/// Resolves storage kinds to backends.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn backend(&self, kind: StorageKind) -> Result<Arc<dyn StorageBackend>>;
}

/// Production provider over local disk, S3 and SFTP.
pub struct StorageService {
    store: Arc<dyn RecordStore>,
    local_path: PathBuf,
}

impl StorageService {
    pub fn new(store: Arc<dyn RecordStore>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            local_path: local_path.into(),
        }
    }

    /// Which storage kinds currently have their required settings.
    pub async fn configured_kinds(&self) -> Result<Vec<StorageKind>> {
        let settings = StorageSettings::load(self.store.as_ref()).await?;
        Ok(StorageKind::ALL
            .into_iter()
            .filter(|k| settings.is_configured(*k))
            .collect())
    }
}

#[async_trait]
impl StorageProvider for StorageService {
    async fn backend(&self, kind: StorageKind) -> Result<Arc<dyn StorageBackend>> {
        match kind {
            StorageKind::Local => Ok(Arc::new(FilesystemStorage::new(self.local_path.clone()))),
            StorageKind::S3 | StorageKind::Sftp => {
                let settings = StorageSettings::load(self.store.as_ref()).await?;
                if !settings.is_configured(kind) {
                    return Err(AppError::StorageConfig(format!(
                        "{} storage is not configured",
                        kind
                    )));
                }
                let backend: Arc<dyn StorageBackend> = match kind {
                    StorageKind::S3 => Arc::new(S3Backend::from_settings(settings.values())?),
                    _ => Arc::new(SftpBackend::from_settings(settings.values())?),
                };
                Ok(backend)
            }
        }
    }
}
