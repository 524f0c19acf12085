use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use tenant_storage::blob_store::{
    byte_stream, collect_bytes, BlobStore, BlobStoreError, ByteStream, KeyStream, LocalStore,
    PutMode, StoredObject,
};
use tenant_storage::gateway::{GatewayError, ObjectGateway, UploadGuard};
use tenant_storage::key::{KeyError, ObjectKey};

/// Wraps a [`LocalStore`] and lets a test break individual behaviors.
struct TestStore {
    inner: LocalStore,
    /// Report every key as absent, as if a concurrent upload landed after the check.
    blind_exists: bool,
    /// Fail every call as unreachable.
    offline: AtomicBool,
    container_calls: AtomicUsize,
}

impl TestStore {
    fn new(dir: &tempfile::TempDir, blind_exists: bool) -> Self {
        Self {
            inner: LocalStore::new(dir.path(), "files").unwrap(),
            blind_exists,
            offline: AtomicBool::new(false),
            container_calls: AtomicUsize::new(0),
        }
    }

    fn check(&self) -> Result<(), BlobStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for TestStore {
    async fn ensure_container(&self) -> Result<(), BlobStoreError> {
        self.container_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.ensure_container().await
    }

    async fn exists(&self, key: &ObjectKey) -> Result<bool, BlobStoreError> {
        self.check()?;
        if self.blind_exists {
            return Ok(false);
        }
        self.inner.exists(key).await
    }

    async fn put(
        &self,
        key: &ObjectKey,
        content: ByteStream,
        content_type: &str,
        mode: PutMode,
    ) -> Result<(), BlobStoreError> {
        self.check()?;
        self.inner.put(key, content, content_type, mode).await
    }

    async fn get(&self, key: &ObjectKey) -> Result<StoredObject, BlobStoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), BlobStoreError> {
        self.check()?;
        self.inner.delete(key).await
    }

    fn list<'a>(&'a self, prefix: Option<&'a str>) -> KeyStream<'a> {
        if self.offline.load(Ordering::SeqCst) {
            return Box::pin(futures::stream::once(async {
                Err(BlobStoreError::Unavailable("connection refused".to_string()))
            }));
        }
        self.inner.list(prefix)
    }

    fn object_url(&self, key: &ObjectKey) -> String {
        self.inner.object_url(key)
    }
}

fn gateway(dir: &tempfile::TempDir) -> ObjectGateway {
    let store = LocalStore::new(dir.path(), "files").unwrap();
    ObjectGateway::new(Arc::new(store), UploadGuard::Conditional)
}

async fn read_back(gateway: &ObjectGateway, path: &str) -> Vec<u8> {
    let key = ObjectKey::parse(path).unwrap();
    let object = gateway.download(&key).await.unwrap();
    collect_bytes(object.body).await.unwrap().to_vec()
}

#[tokio::test]
async fn test_upload_then_download() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(&dir);

    let result = gateway
        .upload("t1", "acme", "avatars", "u123", byte_stream("pixels"), "image/png")
        .await
        .unwrap();

    assert_eq!(result.relative_key.as_str(), "t1/acme/avatars/u123");
    assert!(result.file_url.ends_with("t1/acme/avatars/u123"));

    let object = gateway.download(&result.relative_key).await.unwrap();
    assert_eq!(object.content_type, "image/png");
    assert_eq!(collect_bytes(object.body).await.unwrap(), "pixels");
}

#[tokio::test]
async fn test_upload_never_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(&dir);

    gateway
        .upload("t1", "acme", "avatars", "u123", byte_stream("original"), "image/png")
        .await
        .unwrap();

    let err = gateway
        .upload("t1", "acme", "avatars", "u123", byte_stream("replacement"), "image/png")
        .await
        .unwrap_err();
    match err {
        GatewayError::ObjectAlreadyExists(key) => {
            assert_eq!(key.as_str(), "t1/acme/avatars/u123")
        }
        other => panic!("expected ObjectAlreadyExists, got {other:?}"),
    }

    assert_eq!(read_back(&gateway, "t1/acme/avatars/u123").await, b"original");
}

#[tokio::test]
async fn test_delete_then_reupload() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(&dir);

    let result = gateway
        .upload("t1", "acme", "avatars", "u123", byte_stream("v1"), "image/png")
        .await
        .unwrap();
    gateway.delete(&result.relative_key).await.unwrap();

    let err = gateway.download(&result.relative_key).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));

    // Idempotent
    gateway.delete(&result.relative_key).await.unwrap();

    gateway
        .upload("t1", "acme", "avatars", "u123", byte_stream("v2"), "image/png")
        .await
        .unwrap();
    assert_eq!(read_back(&gateway, "t1/acme/avatars/u123").await, b"v2");
}

#[tokio::test]
async fn test_upload_rejects_invalid_segments() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(&dir);

    for (tenant, company, category, file_id) in [
        ("", "acme", "avatars", "u1"),
        ("t1", "a/b", "avatars", "u1"),
        ("t1", "acme", "..", "u1"),
        ("t1", "acme", "avatars", " u1"),
    ] {
        let err = gateway
            .upload(tenant, company, category, file_id, byte_stream("x"), "text/plain")
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                GatewayError::InvalidKeySegment(KeyError::InvalidKeySegment { .. })
            ),
            "expected invalid segment for {tenant:?}/{company:?}/{category:?}/{file_id:?}"
        );
    }

    let keys = gateway.list_all(None).await.unwrap();
    assert!(keys.is_empty());
}

#[tokio::test]
async fn test_list_across_tenants() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(&dir);

    for (tenant, file_id) in [("t1", "a"), ("t1", "b"), ("t2", "c")] {
        gateway
            .upload(tenant, "acme", "docs", file_id, byte_stream("x"), "text/plain")
            .await
            .unwrap();
    }

    let mut keys: Vec<String> = gateway
        .list_all(None)
        .await
        .unwrap()
        .into_iter()
        .map(|k| k.to_string())
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["t1/acme/docs/a", "t1/acme/docs/b", "t2/acme/docs/c"]);

    let scoped = gateway.list_all(Some("t2/")).await.unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].tenant_id(), "t2");
}

#[tokio::test]
async fn test_list_stream_is_lazy() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(&dir);

    for file_id in ["a", "b", "c"] {
        gateway
            .upload("t1", "acme", "docs", file_id, byte_stream("x"), "text/plain")
            .await
            .unwrap();
    }

    let mut stream = gateway.list(None);
    let first = stream.try_next().await.unwrap();
    assert!(first.is_some());
}

#[tokio::test]
async fn test_container_provisioned_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TestStore::new(&dir, false));
    let gateway = ObjectGateway::new(store.clone(), UploadGuard::Conditional);

    for file_id in ["a", "b", "c"] {
        gateway
            .upload("t1", "acme", "docs", file_id, byte_stream("x"), "text/plain")
            .await
            .unwrap();
    }

    assert_eq!(store.container_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_store_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TestStore::new(&dir, false));
    let gateway = ObjectGateway::new(store.clone(), UploadGuard::Conditional);

    store.offline.store(true, Ordering::SeqCst);

    let err = gateway
        .upload("t1", "acme", "docs", "a", byte_stream("x"), "text/plain")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::StoreUnavailable(_)));

    let key = ObjectKey::parse("t1/acme/docs/a").unwrap();
    assert!(matches!(
        gateway.download(&key).await.unwrap_err(),
        GatewayError::StoreUnavailable(_)
    ));
    assert!(matches!(
        gateway.delete(&key).await.unwrap_err(),
        GatewayError::StoreUnavailable(_)
    ));
    assert!(matches!(
        gateway.list_all(None).await.unwrap_err(),
        GatewayError::StoreUnavailable(_)
    ));

    // A failed provisioning attempt is retried once the store is back.
    store.offline.store(false, Ordering::SeqCst);
    gateway
        .upload("t1", "acme", "docs", "a", byte_stream("x"), "text/plain")
        .await
        .unwrap();
    assert_eq!(store.container_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_conditional_guard_survives_stale_check() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TestStore::new(&dir, true));
    let gateway = ObjectGateway::new(store, UploadGuard::Conditional);

    gateway
        .upload("t1", "acme", "docs", "a", byte_stream("first"), "text/plain")
        .await
        .unwrap();

    let err = gateway
        .upload("t1", "acme", "docs", "a", byte_stream("second"), "text/plain")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ObjectAlreadyExists(_)));
    assert_eq!(read_back(&gateway, "t1/acme/docs/a").await, b"first");
}

#[tokio::test]
async fn test_check_then_write_last_writer_wins() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TestStore::new(&dir, true));
    let gateway = ObjectGateway::new(store, UploadGuard::CheckThenWrite);
    assert_eq!(gateway.guard(), UploadGuard::CheckThenWrite);

    gateway
        .upload("t1", "acme", "docs", "a", byte_stream("first"), "text/plain")
        .await
        .unwrap();
    gateway
        .upload("t1", "acme", "docs", "a", byte_stream("second"), "text/plain")
        .await
        .unwrap();

    assert_eq!(read_back(&gateway, "t1/acme/docs/a").await, b"second");
}

#[tokio::test]
async fn test_check_then_write_still_rejects_visible_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path(), "files").unwrap();
    let gateway = ObjectGateway::new(Arc::new(store), UploadGuard::CheckThenWrite);

    gateway
        .upload("t1", "acme", "docs", "a", byte_stream("first"), "text/plain")
        .await
        .unwrap();
    let err = gateway
        .upload("t1", "acme", "docs", "a", byte_stream("second"), "text/plain")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ObjectAlreadyExists(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_single_winner() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(gateway(&dir));

    let mut handles = Vec::new();
    for i in 0..8 {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move {
            gateway
                .upload(
                    "t1",
                    "acme",
                    "docs",
                    "contended",
                    byte_stream(format!("writer-{i}")),
                    "text/plain",
                )
                .await
        }));
    }

    let mut winners = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await.unwrap() {
            Ok(_) => winners.push(i),
            Err(GatewayError::ObjectAlreadyExists(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(winners.len(), 1);
    let stored = read_back(&gateway, "t1/acme/docs/contended").await;
    assert_eq!(stored, format!("writer-{}", winners[0]).into_bytes());
}
