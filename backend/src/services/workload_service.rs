//! Workload state coordination.
//!
//! Volumes whose name is a workload identifier belong to a live server
//! managed by an external panel. Before such a volume is copied the server is
//! stopped and, once the copy is done, started again.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::setting;
use crate::store::RecordStore;

/// Whether a volume name is a workload identifier (hyphenated 8-4-4-4-12 UUID).
pub fn is_workload_id(name: &str) -> bool {
    name.len() == 36 && Uuid::try_parse(name).is_ok()
}

/// Power state reported by the workload API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadState {
    Running,
    Starting,
    Stopping,
    Offline,
    Unknown(String),
}

impl WorkloadState {
    pub fn parse(value: &str) -> Self {
        match value {
            "running" => WorkloadState::Running,
            "starting" => WorkloadState::Starting,
            "stopping" => WorkloadState::Stopping,
            "offline" => WorkloadState::Offline,
            other => WorkloadState::Unknown(other.to_string()),
        }
    }

    /// States in which the workload may be writing to its volume.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkloadState::Running | WorkloadState::Starting)
    }
}

impl fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadState::Running => write!(f, "running"),
            WorkloadState::Starting => write!(f, "starting"),
            WorkloadState::Stopping => write!(f, "stopping"),
            WorkloadState::Offline => write!(f, "offline"),
            WorkloadState::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Power action sent to the workload API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSignal {
    Start,
    Stop,
    Restart,
    Kill,
}

impl PowerSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerSignal::Start => "start",
            PowerSignal::Stop => "stop",
            PowerSignal::Restart => "restart",
            PowerSignal::Kill => "kill",
        }
    }
}

/// Query and toggle workload power state.
#[async_trait]
pub trait WorkloadCoordinator: Send + Sync {
    /// Current state, or `None` when unconfigured or the workload is unknown.
    async fn get_state(&self, id: &str) -> Result<Option<WorkloadState>>;

    /// Send a power signal; returns whether the request was accepted.
    async fn set_state(&self, id: &str, signal: PowerSignal) -> Result<bool>;
}

/// Polling bounds for the wait after a stop is accepted.
#[derive(Debug, Clone, Copy)]
pub struct SafeStopPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for SafeStopPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_attempts: 12,
        }
    }
}

impl SafeStopPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.safe_stop_poll_interval,
            max_attempts: config.safe_stop_max_attempts,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResourcesResponse {
    attributes: ResourceAttributes,
}

#[derive(Debug, Deserialize)]
struct ResourceAttributes {
    current_state: String,
}

/// HTTP client for the panel's client API.
///
/// The base URL and token are read from settings on every call.
pub struct HttpWorkloadCoordinator {
    store: Arc<dyn RecordStore>,
    client: Client,
}

impl HttpWorkloadCoordinator {
    pub fn new(store: Arc<dyn RecordStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { store, client })
    }

    /// Base URL and token, or `None` when either is unset.
    async fn endpoint(&self) -> Result<Option<(String, String)>> {
        let url = self.store.get_setting(setting::WORKLOAD_API_URL).await?;
        let token = self.store.get_setting(setting::WORKLOAD_API_TOKEN).await?;
        Ok(match (url, token) {
            (Some(url), Some(token)) if !url.trim().is_empty() && !token.trim().is_empty() => {
                Some((url.trim().trim_end_matches('/').to_string(), token))
            }
            _ => None,
        })
    }
}

#[async_trait]
impl WorkloadCoordinator for HttpWorkloadCoordinator {
    async fn get_state(&self, id: &str) -> Result<Option<WorkloadState>> {
        let Some((base, token)) = self.endpoint().await? else {
            tracing::debug!(workload = %id, "Workload API not configured");
            return Ok(None);
        };
        let url = format!("{}/api/client/servers/{}/resources", base, id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AppError::Workload(format!("State query for {} failed: {}", id, e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Workload(format!(
                "State query for {} returned {}",
                id,
                response.status()
            )));
        }

        let body = response
            .json::<ResourcesResponse>()
            .await
            .map_err(|e| AppError::Workload(format!("Failed to parse state of {}: {}", id, e)))?;

        Ok(Some(WorkloadState::parse(&body.attributes.current_state)))
    }

    async fn set_state(&self, id: &str, signal: PowerSignal) -> Result<bool> {
        let Some((base, token)) = self.endpoint().await? else {
            return Ok(false);
        };
        let url = format!("{}/api/client/servers/{}/power", base, id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .header("Accept", "application/json")
            .json(&serde_json::json!({ "signal": signal.as_str() }))
            .send()
            .await
            .map_err(|e| {
                AppError::Workload(format!("Power {} for {} failed: {}", signal.as_str(), id, e))
            })?;

        let accepted = response.status().is_success();
        if !accepted {
            tracing::warn!(
                workload = %id,
                signal = signal.as_str(),
                status = %response.status(),
                "Power signal rejected"
            );
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;

    #[test]
    fn test_is_workload_id() {
        assert!(is_workload_id("8f14e45f-ceea-467f-a0e6-0b6a2f6c9d1e"));
        assert!(!is_workload_id("8f14e45fceea467fa0e60b6a2f6c9d1e"));
        assert!(!is_workload_id("{8f14e45f-ceea-467f-a0e6-0b6a2f6c9d1e}"));
        assert!(!is_workload_id("minecraft"));
        assert!(!is_workload_id("8f14e45f-ceea-467f-a0e6-0b6a2f6c9d1z"));
    }

    #[test]
    fn test_state_parse() {
        assert_eq!(WorkloadState::parse("running"), WorkloadState::Running);
        assert_eq!(WorkloadState::parse("offline"), WorkloadState::Offline);
        assert_eq!(
            WorkloadState::parse("installing"),
            WorkloadState::Unknown("installing".into())
        );
        assert!(WorkloadState::Starting.is_active());
        assert!(!WorkloadState::Stopping.is_active());
    }

    #[test]
    fn test_policy_default() {
        let policy = SafeStopPolicy::default();
        assert_eq!(policy.poll_interval, Duration::from_secs(5));
        assert_eq!(policy.max_attempts, 12);
    }

    #[tokio::test]
    async fn test_unconfigured_api_is_a_no_op() {
        let store = Arc::new(MemoryRecordStore::new());
        let coordinator = HttpWorkloadCoordinator::new(store).unwrap();
        let id = "8f14e45f-ceea-467f-a0e6-0b6a2f6c9d1e";
        assert_eq!(coordinator.get_state(id).await.unwrap(), None);
        assert!(!coordinator.set_state(id, PowerSignal::Stop).await.unwrap());
    }
}
