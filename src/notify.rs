//! Best-effort announcement of new file records to a downstream system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

/// Payload announcing a new file record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCreated {
    pub user_id: Uuid,
    pub company: String,
    pub category: String,
    pub file_url: String,
    pub relative_path: String,
    pub created_at: DateTime<Utc>,
}

/// Fire-and-forget notifier. Implementations log failures and report them only
/// through the returned flag; they never return errors.
#[async_trait]
pub trait FileNotifier: Send + Sync {
    async fn file_created(&self, event: &FileCreated) -> bool;
}

/// Used when no downstream endpoint is configured.
pub struct NoopNotifier;

#[async_trait]
impl FileNotifier for NoopNotifier {
    async fn file_created(&self, _event: &FileCreated) -> bool {
        true
    }
}

/// Posts [`FileCreated`] as JSON to `{base_url}/files`.
pub struct HttpNotifier {
    client: Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/files", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl FileNotifier for HttpNotifier {
    async fn file_created(&self, event: &FileCreated) -> bool {
        tracing::debug!(user_id = %event.user_id, endpoint = %self.endpoint, "Sending file record");

        match self.client.post(&self.endpoint).json(event).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(user_id = %event.user_id, "Created downstream file record");
                true
            }
            Ok(resp) => {
                tracing::warn!(
                    user_id = %event.user_id,
                    status = %resp.status(),
                    "Downstream rejected file record"
                );
                false
            }
            Err(e) => {
                tracing::error!(user_id = %event.user_id, error = %e, "Failed to send file record");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> FileCreated {
        FileCreated {
            user_id: Uuid::nil(),
            company: "acme".to_string(),
            category: "avatars".to_string(),
            file_url: "file:///tmp/t1/acme/avatars/u1".to_string(),
            relative_path: "t1/acme/avatars/u1".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_payload_uses_camel_case() {
        let json = serde_json::to_value(event()).unwrap();
        assert_eq!(json["relativePath"], "t1/acme/avatars/u1");
        assert_eq!(json["userId"], Uuid::nil().to_string());
        assert!(json.get("fileUrl").is_some());
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let notifier = HttpNotifier::new("http://records.internal/api/").unwrap();
        assert_eq!(notifier.endpoint, "http://records.internal/api/files");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_failure() {
        // Port 9 (discard) is not listening on loopback in test environments.
        let notifier = HttpNotifier::new("http://127.0.0.1:9").unwrap();
        assert!(!notifier.file_created(&event()).await);
    }
}
