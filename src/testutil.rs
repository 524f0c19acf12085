//! Shared test helpers for tenant-storage HTTP tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::blob_store::LocalStore;
use crate::config::{Config, ServerConfig, StorageConfig};
use crate::gateway::{ObjectGateway, UploadGuard};
use crate::key::ObjectKey;
use crate::notify::{FileCreated, FileNotifier};
use crate::storage::{AssociationError, AssociationRecorder, Database};
use crate::AppState;

/// Notifier that remembers every event it was handed.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<FileCreated>>,
}

#[async_trait]
impl FileNotifier for RecordingNotifier {
    async fn file_created(&self, event: &FileCreated) -> bool {
        self.events.lock().unwrap().push(event.clone());
        true
    }
}

/// Association recorder whose writes always fail.
pub struct FailingRecorder;

impl AssociationRecorder for FailingRecorder {
    fn record_association(
        &self,
        user_id: Uuid,
        _key: &ObjectKey,
        _file_url: &str,
    ) -> Result<(), AssociationError> {
        Err(AssociationError::UserNotFound(user_id))
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub notifier: Arc<RecordingNotifier>,
}

/// Create a test AppState with a temporary database and local blob store.
pub fn test_app(temp_dir: &tempfile::TempDir) -> TestApp {
    build(temp_dir, None)
}

/// Like [`test_app`], but with an association recorder that always fails.
pub fn test_app_with_failing_associations(temp_dir: &tempfile::TempDir) -> TestApp {
    build(temp_dir, Some(Arc::new(FailingRecorder)))
}

fn build(
    temp_dir: &tempfile::TempDir,
    associations: Option<Arc<dyn AssociationRecorder>>,
) -> TestApp {
    let data_dir = temp_dir.path().join("data");
    let files_dir = temp_dir.path().join("files");

    let config = Config {
        server: ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
        },
        storage: StorageConfig {
            local_storage_path: files_dir.to_string_lossy().to_string(),
            ..StorageConfig::default()
        },
        notify_base_url: None,
        max_upload_size: 1024 * 1024, // 1MB for tests
    };

    let db = Database::open(&data_dir).expect("Failed to open test database");
    let store = LocalStore::new(&files_dir, &config.storage.container)
        .expect("Failed to create test blob store");
    let notifier = Arc::new(RecordingNotifier::default());

    let state = Arc::new(AppState {
        config,
        associations: associations.unwrap_or_else(|| Arc::new(db.clone())),
        db,
        gateway: ObjectGateway::new(Arc::new(store), UploadGuard::Conditional),
        notifier: notifier.clone(),
    });

    TestApp { state, notifier }
}

pub const BOUNDARY: &str = "tenant-storage-test-boundary";

/// Encode a multipart/form-data body. Text fields first, then an optional file part.
pub fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}
