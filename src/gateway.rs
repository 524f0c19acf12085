//! Upload/download/delete/list protocol over a [`BlobStore`].
//!
//! The gateway owns no mutable state besides a one-shot latch recording that the
//! container has been provisioned. Every call round-trips to the store.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::blob_store::{BlobStore, BlobStoreError, ByteStream, PutMode, StoredObject};
use crate::key::{KeyError, ObjectKey};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    InvalidKeySegment(#[from] KeyError),
    #[error("Object already exists: {0}")]
    ObjectAlreadyExists(ObjectKey),
    #[error("Object not found: {0}")]
    NotFound(ObjectKey),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

/// How an upload guarantees it never replaces an existing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadGuard {
    /// Existence check, then a store-level create-only write. Concurrent uploads
    /// to the same key resolve to exactly one winner.
    #[default]
    Conditional,
    /// Existence check, then a plain write. Two uploads racing between the
    /// check and the write can both succeed, and the last writer wins.
    CheckThenWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    pub file_url: String,
    pub relative_key: ObjectKey,
}

pub struct ObjectGateway {
    store: Arc<dyn BlobStore>,
    guard: UploadGuard,
    container_ready: OnceCell<()>,
}

impl ObjectGateway {
    pub fn new(store: Arc<dyn BlobStore>, guard: UploadGuard) -> Self {
        Self {
            store,
            guard,
            container_ready: OnceCell::new(),
        }
    }

    pub fn guard(&self) -> UploadGuard {
        self.guard
    }

    /// Store `content` under `{tenant_id}/{company}/{category}/{file_id}`.
    /// Never overwrites: an occupied key yields `ObjectAlreadyExists`.
    pub async fn upload(
        &self,
        tenant_id: &str,
        company: &str,
        category: &str,
        file_id: &str,
        content: ByteStream,
        content_type: &str,
    ) -> Result<UploadResult, GatewayError> {
        let key = ObjectKey::build(tenant_id, company, category, file_id).inspect_err(|e| {
            tracing::warn!(
                tenant_id,
                company,
                category,
                file_id,
                error = %e,
                "Rejected upload with invalid key"
            );
        })?;

        self.ensure_container().await?;

        if self
            .store
            .exists(&key)
            .await
            .map_err(|e| store_failure(&key, "exists", e))?
        {
            log_conflict(&key);
            return Err(GatewayError::ObjectAlreadyExists(key));
        }

        let mode = match self.guard {
            UploadGuard::Conditional => PutMode::CreateOnly,
            UploadGuard::CheckThenWrite => PutMode::Overwrite,
        };

        match self.store.put(&key, content, content_type, mode).await {
            Ok(()) => {}
            Err(BlobStoreError::AlreadyExists(_)) => {
                // Another upload won the race after our existence check.
                log_conflict(&key);
                return Err(GatewayError::ObjectAlreadyExists(key));
            }
            Err(e) => return Err(store_failure(&key, "put", e)),
        }

        tracing::info!(
            tenant_id = key.tenant_id(),
            company = key.company(),
            category = key.category(),
            file_id = key.file_id(),
            content_type,
            "Uploaded object"
        );

        Ok(UploadResult {
            file_url: self.store.object_url(&key),
            relative_key: key,
        })
    }

    pub async fn download(&self, key: &ObjectKey) -> Result<StoredObject, GatewayError> {
        match self.store.get(key).await {
            Ok(object) => Ok(object),
            Err(BlobStoreError::NotFound(_)) => {
                tracing::debug!(key = %key, "Download of missing object");
                Err(GatewayError::NotFound(key.clone()))
            }
            Err(e) => Err(store_failure(key, "get", e)),
        }
    }

    /// Idempotent: deleting an absent key succeeds.
    pub async fn delete(&self, key: &ObjectKey) -> Result<(), GatewayError> {
        self.store
            .delete(key)
            .await
            .map_err(|e| store_failure(key, "delete", e))?;

        tracing::info!(key = %key, "Deleted object");
        Ok(())
    }

    /// Lazily enumerate keys in the configured container, optionally under `prefix`.
    /// Without a prefix this spans every tenant.
    pub fn list<'a>(
        &'a self,
        prefix: Option<&'a str>,
    ) -> BoxStream<'a, Result<ObjectKey, GatewayError>> {
        self.store
            .list(prefix)
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to list objects");
                GatewayError::StoreUnavailable(e.to_string())
            })
            .boxed()
    }

    /// Collect [`ObjectGateway::list`] into memory.
    pub async fn list_all(&self, prefix: Option<&str>) -> Result<Vec<ObjectKey>, GatewayError> {
        self.list(prefix).try_collect().await
    }

    async fn ensure_container(&self) -> Result<(), GatewayError> {
        self.container_ready
            .get_or_try_init(|| async {
                self.store.ensure_container().await.inspect_err(|e| {
                    tracing::error!(error = %e, "Failed to provision storage container");
                })
            })
            .await
            .map(|_| ())
            .map_err(|e| GatewayError::StoreUnavailable(e.to_string()))
    }
}

fn log_conflict(key: &ObjectKey) {
    tracing::warn!(
        tenant_id = key.tenant_id(),
        company = key.company(),
        category = key.category(),
        file_id = key.file_id(),
        "Object already exists"
    );
}

fn store_failure(key: &ObjectKey, operation: &'static str, e: BlobStoreError) -> GatewayError {
    tracing::error!(
        tenant_id = key.tenant_id(),
        company = key.company(),
        category = key.category(),
        file_id = key.file_id(),
        operation,
        error = %e,
        "Blob store operation failed"
    );
    GatewayError::StoreUnavailable(e.to_string())
}
