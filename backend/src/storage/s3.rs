//! S3 storage backend using rust-s3 crate.
//!
//! Supports AWS S3 and S3-compatible services (MinIO, etc.). Configuration is
//! read from the settings table on every operation:
//! - `s3_bucket`: Bucket name (required)
//! - `s3_access_key` / `s3_secret_key`: Credentials (required)
//! - `s3_region`: Region (default: us-east-1)
//! - `s3_endpoint`: Custom endpoint for S3-compatible services
//! - `s3_prefix`: Optional key prefix for all objects

use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use super::{is_artifact, StorageBackend};
use crate::error::{AppError, Result};
use crate::models::backup::StorageKind;
use crate::models::setting;

const DEFAULT_REGION: &str = "us-east-1";

/// S3 storage backend configuration
#[derive(Clone)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// Region name
    pub region: String,
    /// Custom endpoint URL, scheme included
    pub endpoint: Option<String>,
    /// Optional key prefix for all objects
    pub prefix: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

redacted_debug!(S3Config {
    show bucket,
    show region,
    show endpoint,
    show prefix,
    mask access_key,
    redact secret_key,
});

impl S3Config {
    /// Build config from the settings table
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            settings
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let bucket = get(setting::S3_BUCKET)
            .ok_or_else(|| AppError::StorageConfig("S3 bucket is not configured".into()))?;
        let access_key = get(setting::S3_ACCESS_KEY)
            .ok_or_else(|| AppError::StorageConfig("S3 access key is not configured".into()))?;
        let secret_key = get(setting::S3_SECRET_KEY)
            .ok_or_else(|| AppError::StorageConfig("S3 secret key is not configured".into()))?;

        Ok(Self {
            bucket,
            region: get(setting::S3_REGION).unwrap_or_else(|| DEFAULT_REGION.into()),
            endpoint: get(setting::S3_ENDPOINT).map(|e| normalize_endpoint(&e)),
            prefix: get(setting::S3_PREFIX),
            access_key,
            secret_key,
        })
    }
}

/// Prepend `https://` to an endpoint that has no scheme.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

fn is_not_found(err: &s3::error::S3Error) -> bool {
    let err_str = err.to_string();
    err_str.contains("404") || err_str.contains("NoSuchKey") || err_str.contains("Not Found")
}

/// S3-compatible storage backend
pub struct S3Backend {
    bucket: Box<Bucket>,
    bucket_name: String,
    prefix: Option<String>,
}

impl S3Backend {
    /// Create new S3 backend from configuration
    pub fn new(config: S3Config) -> Result<Self> {
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| AppError::StorageConfig(format!("Invalid S3 credentials: {}", e)))?;

        let region = match &config.endpoint {
            Some(endpoint) => Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => config.region.parse().map_err(|_| {
                AppError::StorageConfig(format!("Invalid S3 region: {}", config.region))
            })?,
        };

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| AppError::StorageConfig(format!("Failed to create S3 bucket: {}", e)))?;

        // Custom endpoints (MinIO and friends) need path-style addressing
        let bucket = if config.endpoint.is_some() {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(Self {
            bucket,
            bucket_name: config.bucket,
            prefix: config.prefix,
        })
    }

    /// Create S3 backend from the settings table
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        Self::new(S3Config::from_settings(settings)?)
    }

    /// Generate the full S3 key with optional prefix
    fn full_key(&self, name: &str) -> String {
        full_key(self.prefix.as_deref(), name)
    }

    fn locator(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket_name, key)
    }
}

fn full_key(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_matches('/'), name),
        None => name.to_string(),
    }
}

fn strip_prefix(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => {
            let prefix_with_slash = format!("{}/", prefix.trim_matches('/'));
            key.strip_prefix(&prefix_with_slash)
                .unwrap_or(key)
                .to_string()
        }
        None => key.to_string(),
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn kind(&self) -> StorageKind {
        StorageKind::S3
    }

    async fn upload(&self, local: &Path, name: &str) -> Result<String> {
        let key = self.full_key(name);
        let mut file = tokio::fs::File::open(local).await?;

        self.bucket
            .put_object_stream(&mut file, &key)
            .await
            .map_err(|e| {
                AppError::StorageOperation(format!("Failed to upload '{}': {}", name, e))
            })?;

        tracing::debug!(key = %key, "S3 upload successful");
        Ok(self.locator(&key))
    }

    async fn download(&self, name: &str, dest: &Path) -> Result<()> {
        let key = self.full_key(name);
        let mut file = tokio::fs::File::create(dest).await?;

        self.bucket
            .get_object_to_writer(&key, &mut file)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    AppError::NotFound(format!("Backup file not found: {}", name))
                } else {
                    AppError::StorageOperation(format!("Failed to download '{}': {}", name, e))
                }
            })?;
        file.flush().await?;
        file.sync_all().await?;

        tracing::debug!(key = %key, "S3 download successful");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let key = self.full_key(name);

        self.bucket.delete_object(&key).await.map_err(|e| {
            AppError::StorageOperation(format!("Failed to delete object '{}': {}", name, e))
        })?;

        tracing::debug!(key = %key, "S3 delete object successful");
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let key = self.full_key(name);

        match self.bucket.head_object(&key).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(AppError::StorageOperation(format!(
                "Failed to check existence of '{}': {}",
                name, e
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let search_prefix = match &self.prefix {
            Some(base) => format!("{}/", base.trim_matches('/')),
            None => String::new(),
        };

        let results = self
            .bucket
            .list(search_prefix, None)
            .await
            .map_err(|e| AppError::StorageOperation(format!("Failed to list objects: {}", e)))?;

        let mut names: Vec<String> = results
            .into_iter()
            .flat_map(|result| result.contents)
            .map(|obj| strip_prefix(self.prefix.as_deref(), &obj.key))
            .filter(|name| is_artifact(name))
            .collect();
        names.sort();

        tracing::debug!(count = names.len(), "S3 list objects successful");
        Ok(names)
    }

    async fn size(&self, name: &str) -> Result<u64> {
        let key = self.full_key(name);

        let (head, _) = self.bucket.head_object(&key).await.map_err(|e| {
            if is_not_found(&e) {
                AppError::NotFound(format!("Backup file not found: {}", name))
            } else {
                AppError::StorageOperation(format!("Failed to get size of '{}': {}", name, e))
            }
        })?;

        Ok(head.content_length.unwrap_or(0).max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn complete() -> HashMap<String, String> {
        settings(&[
            (setting::S3_BUCKET, "backups"),
            (setting::S3_ACCESS_KEY, "AKIAEXAMPLEKEY1234"),
            (setting::S3_SECRET_KEY, "super-secret-value"),
            (setting::S3_ENDPOINT, "minio.local:9000"),
        ])
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("minio.local:9000"), "https://minio.local:9000");
        assert_eq!(normalize_endpoint("http://minio.local/"), "http://minio.local");
        assert_eq!(normalize_endpoint("https://s3.example.com"), "https://s3.example.com");
    }

    #[test]
    fn test_config_from_settings() {
        let config = S3Config::from_settings(&complete()).unwrap();
        assert_eq!(config.bucket, "backups");
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.endpoint.as_deref(), Some("https://minio.local:9000"));
        assert!(config.prefix.is_none());
    }

    #[test]
    fn test_missing_required_settings() {
        for key in [setting::S3_BUCKET, setting::S3_ACCESS_KEY, setting::S3_SECRET_KEY] {
            let mut s = complete();
            s.remove(key);
            assert!(
                matches!(S3Config::from_settings(&s), Err(AppError::StorageConfig(_))),
                "missing {} should be a storage config error",
                key
            );
        }
    }

    #[test]
    fn test_blank_setting_counts_as_missing() {
        let mut s = complete();
        s.insert(setting::S3_BUCKET.into(), "   ".into());
        assert!(matches!(
            S3Config::from_settings(&s),
            Err(AppError::StorageConfig(_))
        ));
    }

    #[test]
    fn test_debug_hides_credentials() {
        let config = S3Config::from_settings(&complete()).unwrap();
        let output = format!("{:?}", config);
        assert!(!output.contains("super-secret-value"));
        assert!(!output.contains("AKIAEXAMPLE"));
        assert!(output.contains("backups"));
    }

    #[test]
    fn test_key_prefix_handling() {
        assert_eq!(full_key(Some("/nightly/"), "a.tar.gz"), "nightly/a.tar.gz");
        assert_eq!(full_key(None, "a.tar.gz"), "a.tar.gz");
        assert_eq!(strip_prefix(Some("nightly"), "nightly/a.tar.gz"), "a.tar.gz");
        assert_eq!(strip_prefix(None, "a.tar.gz"), "a.tar.gz");
    }

    #[test]
    fn test_backend_locator() {
        let mut s = complete();
        s.insert(setting::S3_PREFIX.into(), "nightly".into());
        let backend = S3Backend::from_settings(&s).unwrap();
        let key = backend.full_key("a.tar.gz");
        assert_eq!(backend.locator(&key), "s3://backups/nightly/a.tar.gz");
        assert_eq!(backend.kind(), StorageKind::S3);
    }
}
