//! Run notifications.
//!
//! Notifications are best effort: a failing sink is logged and never fails
//! the pipeline.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::setting;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
    /// Ordered name/value pairs rendered by the receiver
    pub fields: Vec<(String, String)>,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((name.into(), value.to_string()));
        self
    }
}

/// Destination for notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Posts notifications as JSON to the `webhook_url` setting.
pub struct WebhookNotifier {
    store: Arc<dyn RecordStore>,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(store: Arc<dyn RecordStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { store, client })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let Some(url) = self
            .store
            .get_setting(setting::WEBHOOK_URL)
            .await?
            .filter(|u| !u.trim().is_empty())
        else {
            return Ok(());
        };

        let fields: Vec<serde_json::Value> = notification
            .fields
            .iter()
            .map(|(name, value)| serde_json::json!({ "name": name, "value": value }))
            .collect();

        let response = self
            .client
            .post(url.trim())
            .json(&serde_json::json!({
                "kind": notification.kind,
                "title": notification.title,
                "description": notification.description,
                "fields": fields,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "Webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Error-absorbing front for a [`NotificationSink`].
#[derive(Clone)]
pub struct Notifier {
    sink: Option<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// A notifier that drops everything.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub async fn notify(&self, notification: Notification) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(e) = sink.send(&notification).await {
            tracing::warn!(
                title = %notification.title,
                error = %e,
                "Failed to deliver notification"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn send(&self, _notification: &Notification) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Internal("webhook down".into()))
        }
    }

    #[tokio::test]
    async fn test_notifier_absorbs_sink_errors() {
        let sink = Arc::new(FailingSink {
            calls: AtomicUsize::new(0),
        });
        let notifier = Notifier::new(sink.clone());
        notifier
            .notify(Notification::new(NotificationKind::Error, "Backup failed", "boom"))
            .await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_webhook_without_url_is_a_no_op() {
        let store = Arc::new(MemoryRecordStore::new());
        let notifier = WebhookNotifier::new(store).unwrap();
        let n = Notification::new(NotificationKind::Info, "Backup started", "alpha");
        assert!(notifier.send(&n).await.is_ok());
    }

    #[test]
    fn test_fields_keep_order() {
        let n = Notification::new(NotificationKind::Success, "Backup completed", "alpha")
            .field("Size", "1.0 MB")
            .field("Duration", "3s");
        assert_eq!(n.fields[0].0, "Size");
        assert_eq!(n.fields[1].1, "3s");
    }
}
