//! Keys of the flat settings table.
//!
//! Settings are read on every operation so edits apply to the next run
//! without a restart.

pub const S3_ENDPOINT: &str = "s3_endpoint";
pub const S3_REGION: &str = "s3_region";
pub const S3_BUCKET: &str = "s3_bucket";
pub const S3_ACCESS_KEY: &str = "s3_access_key";
pub const S3_SECRET_KEY: &str = "s3_secret_key";
pub const S3_PREFIX: &str = "s3_prefix";

pub const SFTP_HOST: &str = "sftp_host";
pub const SFTP_PORT: &str = "sftp_port";
pub const SFTP_USERNAME: &str = "sftp_username";
pub const SFTP_PASSWORD: &str = "sftp_password";
pub const SFTP_PRIVATE_KEY: &str = "sftp_private_key";
pub const SFTP_PATH: &str = "sftp_path";

pub const WORKLOAD_API_URL: &str = "workload_api_url";
pub const WORKLOAD_API_TOKEN: &str = "workload_api_token";

pub const WEBHOOK_URL: &str = "webhook_url";
