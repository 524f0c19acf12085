use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::{BlobStore, BlobStoreError, ByteStream, KeyStream, PutMode, StoredObject};
use crate::key::ObjectKey;

/// Local filesystem blob store for development and testing.
///
/// Layout under `{base_path}/{container}`:
/// - `objects/{key}` holds payloads
/// - `meta/{key}.json` holds content type and revision
/// - `staging/` holds in-flight uploads, which become addressable only on commit
pub struct LocalStore {
    container_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObjectMeta {
    content_type: String,
    revision: String,
    size: u64,
    created_at: DateTime<Utc>,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P, container: &str) -> Result<Self, std::io::Error> {
        let base_path = std::path::absolute(base_path.as_ref())?;
        Ok(Self {
            container_path: base_path.join(container),
        })
    }

    fn objects_dir(&self) -> PathBuf {
        self.container_path.join("objects")
    }

    fn staging_dir(&self) -> PathBuf {
        self.container_path.join("staging")
    }

    fn object_path(&self, key: &ObjectKey) -> PathBuf {
        key.segments()
            .fold(self.objects_dir(), |path, segment| path.join(segment))
    }

    fn meta_path(&self, key: &ObjectKey) -> PathBuf {
        let mut path = key
            .segments()
            .fold(self.container_path.join("meta"), |path, segment| {
                path.join(segment)
            });
        path.as_mut_os_string().push(".json");
        path
    }

    async fn write_meta(&self, key: &ObjectKey, meta: &ObjectMeta) -> Result<(), BlobStoreError> {
        let path = self.meta_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec(meta).map_err(std::io::Error::other)?;
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn read_meta(&self, key: &ObjectKey) -> Option<ObjectMeta> {
        let data = tokio::fs::read(self.meta_path(key)).await.ok()?;
        serde_json::from_slice(&data).ok()
    }
}

/// Stream `content` into a fresh staging file, returning the byte count.
async fn write_staged(path: &Path, mut content: ByteStream) -> Result<u64, std::io::Error> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = content.try_next().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.sync_all().await?;
    Ok(written)
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn ensure_container(&self) -> Result<(), BlobStoreError> {
        tokio::fs::create_dir_all(self.objects_dir()).await?;
        tokio::fs::create_dir_all(self.staging_dir()).await?;
        Ok(())
    }

    async fn exists(&self, key: &ObjectKey) -> Result<bool, BlobStoreError> {
        Ok(tokio::fs::try_exists(self.object_path(key)).await?)
    }

    async fn put(
        &self,
        key: &ObjectKey,
        content: ByteStream,
        content_type: &str,
        mode: PutMode,
    ) -> Result<(), BlobStoreError> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir_all(self.staging_dir()).await?;

        let staging = self.staging_dir().join(uuid::Uuid::new_v4().to_string());
        let size = match write_staged(&staging, content).await {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(e.into());
            }
        };

        // Commit. A hard link refuses to clobber, which makes CreateOnly atomic.
        let committed = match mode {
            PutMode::Overwrite => tokio::fs::rename(&staging, &path).await,
            PutMode::CreateOnly => tokio::fs::hard_link(&staging, &path).await,
        };
        let _ = tokio::fs::remove_file(&staging).await;

        match committed {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(BlobStoreError::AlreadyExists(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let meta = ObjectMeta {
            content_type: content_type.to_string(),
            revision: uuid::Uuid::new_v4().to_string(),
            size,
            created_at: Utc::now(),
        };
        // The payload is already durable; missing metadata only degrades the content type.
        if let Err(e) = self.write_meta(key, &meta).await {
            tracing::warn!(key = %key, error = %e, "Failed to write object metadata");
        }

        Ok(())
    }

    async fn get(&self, key: &ObjectKey) -> Result<StoredObject, BlobStoreError> {
        let file = match tokio::fs::File::open(self.object_path(key)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BlobStoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        let meta = self.read_meta(key).await;

        Ok(StoredObject {
            content_type: meta
                .as_ref()
                .map(|m| m.content_type.clone())
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size: Some(size),
            revision: meta.map(|m| m.revision),
            body: Box::pin(ReaderStream::new(file)),
        })
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), BlobStoreError> {
        // Sidecar first. `put` writes it after committing the payload, so a
        // concurrent re-upload that survives this delete still has its metadata.
        // The reverse interleaving can only leave an orphaned sidecar, which the
        // next `put` replaces.
        for path in [self.meta_path(key), self.object_path(key)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn list<'a>(&'a self, prefix: Option<&'a str>) -> KeyStream<'a> {
        let walker = DirWalker::new(self.objects_dir());
        Box::pin(stream::try_unfold(walker, move |mut walker| async move {
            walker
                .next_key(prefix)
                .await
                .map(|next| next.map(|key| (key, walker)))
        }))
    }

    fn object_url(&self, key: &ObjectKey) -> String {
        format!("file://{}", self.object_path(key).display())
    }
}

/// Depth-first walk over the objects directory, one `read_dir` at a time.
struct DirWalker {
    root: PathBuf,
    pending: Vec<PathBuf>,
    current: Option<tokio::fs::ReadDir>,
}

impl DirWalker {
    fn new(root: PathBuf) -> Self {
        Self {
            pending: vec![root.clone()],
            root,
            current: None,
        }
    }

    async fn next_key(
        &mut self,
        prefix: Option<&str>,
    ) -> Result<Option<ObjectKey>, BlobStoreError> {
        loop {
            if let Some(entries) = self.current.as_mut() {
                let Some(entry) = entries.next_entry().await? else {
                    self.current = None;
                    continue;
                };
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    self.pending.push(path);
                    continue;
                }
                let Some(key) = self.key_for(&path) else {
                    tracing::debug!(path = %path.display(), "Skipping non-key file in container");
                    continue;
                };
                if prefix.map_or(true, |p| key.has_prefix(p)) {
                    return Ok(Some(key));
                }
                continue;
            }

            let Some(dir) = self.pending.pop() else {
                return Ok(None);
            };
            match tokio::fs::read_dir(&dir).await {
                Ok(entries) => self.current = Some(entries),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn key_for(&self, path: &Path) -> Option<ObjectKey> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments = relative
            .components()
            .map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        ObjectKey::parse(&segments.join("/")).ok()
    }
}
