mod gcs;
mod local;

pub use gcs::GcsStore;
pub use local::LocalStore;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use thiserror::Error;

use crate::key::ObjectKey;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Object already exists: {0}")]
    AlreadyExists(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Object payload as a stream of chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Lazy, single-pass enumeration of keys in a container.
pub type KeyStream<'a> = BoxStream<'a, Result<ObjectKey, BlobStoreError>>;

/// Whether a write may replace an existing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    Overwrite,
    /// Fail with `AlreadyExists` if the key is occupied, atomically at the store.
    CreateOnly,
}

/// A stored object as read back from the backing store.
pub struct StoredObject {
    pub content_type: String,
    pub size: Option<u64>,
    /// Opaque revision maintained by the store (ETag, generation, ...).
    pub revision: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject")
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

/// Abstraction over a single container in a backing blob store.
/// One implementation instance owns one client and is shared for the process lifetime.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create the container if it is missing. Never grants public access.
    async fn ensure_container(&self) -> Result<(), BlobStoreError>;
    async fn exists(&self, key: &ObjectKey) -> Result<bool, BlobStoreError>;
    async fn put(
        &self,
        key: &ObjectKey,
        content: ByteStream,
        content_type: &str,
        mode: PutMode,
    ) -> Result<(), BlobStoreError>;
    async fn get(&self, key: &ObjectKey) -> Result<StoredObject, BlobStoreError>;
    /// Succeeds when the key is already absent.
    async fn delete(&self, key: &ObjectKey) -> Result<(), BlobStoreError>;
    fn list<'a>(&'a self, prefix: Option<&'a str>) -> KeyStream<'a>;
    /// Absolute locator for a key in this store.
    fn object_url(&self, key: &ObjectKey) -> String;
}

/// Wrap an in-memory payload as a single-chunk stream.
pub fn byte_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(stream::once(async move { Ok(data) }))
}

/// Drain a stream into one buffer.
pub async fn collect_bytes(mut body: ByteStream) -> Result<Bytes, std::io::Error> {
    use futures::TryStreamExt;

    let mut buf = bytes::BytesMut::new();
    while let Some(chunk) = body.try_next().await? {
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}
