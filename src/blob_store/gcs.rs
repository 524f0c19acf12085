use async_trait::async_trait;
use futures::{future, stream, StreamExt, TryStreamExt};
use reqwest::{header, Client, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::{Duration, Instant};

use super::{
    collect_bytes, BlobStore, BlobStoreError, ByteStream, KeyStream, PutMode, StoredObject,
};
use crate::key::ObjectKey;

const STORAGE_HOST: &str = "https://storage.googleapis.com";

/// Refresh this long before the token actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Google Cloud Storage blob store backend. One bucket is one container.
pub struct GcsStore {
    bucket: String,
    project: Option<String>,
    client: Client,
    host: Url,
    access_token: tokio::sync::RwLock<Option<AccessToken>>,
    credentials_file: Option<String>,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ListItem {
    name: String,
}

impl GcsStore {
    pub async fn new(
        bucket: &str,
        credentials_file: Option<&str>,
        project: Option<&str>,
    ) -> Result<Self, anyhow::Error> {
        let client = Client::builder().build()?;

        let store = Self {
            bucket: bucket.to_string(),
            project: project.map(|s| s.to_string()),
            client,
            host: Url::parse(STORAGE_HOST)?,
            access_token: tokio::sync::RwLock::new(None),
            credentials_file: credentials_file.map(|s| s.to_string()),
        };

        // Fail fast on bad credentials rather than on the first request.
        store.refresh_token().await?;
        Ok(store)
    }

    async fn token(&self) -> Result<String, BlobStoreError> {
        {
            let current = self.access_token.read().await;
            if let Some(token) = current.as_ref() {
                if token.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                    return Ok(token.value.clone());
                }
            }
        }

        self.refresh_token()
            .await
            .map_err(|e| BlobStoreError::Unavailable(format!("GCS authentication failed: {e}")))
    }

    async fn refresh_token(&self) -> Result<String, anyhow::Error> {
        let resp = if let Some(ref creds_path) = self.credentials_file {
            self.token_from_service_account(creds_path).await?
        } else {
            self.token_from_metadata_server().await?
        };

        let value = resp.access_token;
        let mut lock = self.access_token.write().await;
        *lock = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(resp.expires_in),
        });
        tracing::debug!(expires_in = resp.expires_in, "Refreshed GCS access token");
        Ok(value)
    }

    async fn token_from_service_account(&self, path: &str) -> Result<TokenResponse, anyhow::Error> {
        let key_json = tokio::fs::read_to_string(path).await?;
        let key: ServiceAccountKey = serde_json::from_str(&key_json)?;

        let now = chrono::Utc::now().timestamp();
        let claims = serde_json::json!({
            "iss": key.client_email,
            "scope": "https://www.googleapis.com/auth/devstorage.read_write",
            "aud": key.token_uri,
            "iat": now,
            "exp": now + 3600,
        });

        // Build JWT (header.claims.signature)
        let header = base64_url_encode(&serde_json::to_vec(&serde_json::json!({
            "alg": "RS256",
            "typ": "JWT"
        }))?);
        let payload = base64_url_encode(&serde_json::to_vec(&claims)?);
        let unsigned = format!("{header}.{payload}");

        let signature = sign_rs256(unsigned.as_bytes(), &key.private_key)?;
        let jwt = format!("{unsigned}.{}", base64_url_encode(&signature));

        let resp = self
            .client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp)
    }

    async fn token_from_metadata_server(&self) -> Result<TokenResponse, anyhow::Error> {
        let resp = self
            .client
            .get("http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token")
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp)
    }

    fn bucket_url(&self) -> Url {
        endpoint(&self.host, &["storage", "v1", "b", self.bucket.as_str()])
    }

    fn object_resource_url(&self, key: &ObjectKey) -> Url {
        endpoint(
            &self.host,
            &["storage", "v1", "b", self.bucket.as_str(), "o", key.as_str()],
        )
    }

    fn list_page_url(&self, prefix: Option<&str>, page_token: Option<&str>) -> Url {
        let mut url = endpoint(&self.host, &["storage", "v1", "b", self.bucket.as_str(), "o"]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("fields", "items(name),nextPageToken");
            if let Some(prefix) = prefix {
                query.append_pair("prefix", prefix);
            }
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        url
    }

    async fn list_page(
        &self,
        prefix: Option<&str>,
        page_token: Option<String>,
    ) -> Result<ListResponse, BlobStoreError> {
        let token = self.token().await?;
        let resp = self
            .client
            .get(self.list_page_url(prefix, page_token.as_deref()))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(unavailable)?;

        if !resp.status().is_success() {
            return Err(failure("list", resp).await);
        }

        resp.json().await.map_err(unavailable)
    }

    async fn create_bucket(&self, project: &str) -> Result<(), BlobStoreError> {
        let token = self.token().await?;
        let mut url = endpoint(&self.host, &["storage", "v1", "b"]);
        url.query_pairs_mut().append_pair("project", project);

        let resp = self
            .client
            .post(url)
            .bearer_auth(&token)
            .json(&serde_json::json!({
                "name": self.bucket,
                "iamConfiguration": {
                    "publicAccessPrevention": "enforced",
                    "uniformBucketLevelAccess": { "enabled": true },
                },
            }))
            .send()
            .await
            .map_err(unavailable)?;

        // 409: created concurrently by someone else
        if resp.status().is_success() || resp.status() == StatusCode::CONFLICT {
            tracing::info!(bucket = %self.bucket, "Provisioned GCS bucket");
            return Ok(());
        }

        Err(failure("bucket create", resp).await)
    }
}

#[async_trait]
impl BlobStore for GcsStore {
    async fn ensure_container(&self) -> Result<(), BlobStoreError> {
        let token = self.token().await?;
        let resp = self
            .client
            .get(self.bucket_url())
            .bearer_auth(&token)
            .send()
            .await
            .map_err(unavailable)?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::FORBIDDEN => {
                // Object-scoped service accounts cannot read bucket metadata.
                tracing::warn!(bucket = %self.bucket, "Cannot verify bucket, assuming it exists");
                Ok(())
            }
            StatusCode::NOT_FOUND => match self.project.as_deref() {
                Some(project) => self.create_bucket(project).await,
                None => Err(BlobStoreError::Unavailable(format!(
                    "GCS bucket '{}' does not exist and GCS_PROJECT is not set",
                    self.bucket
                ))),
            },
            _ => Err(failure("bucket lookup", resp).await),
        }
    }

    async fn exists(&self, key: &ObjectKey) -> Result<bool, BlobStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .get(self.object_resource_url(key))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(unavailable)?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(failure("metadata lookup", resp).await),
        }
    }

    async fn put(
        &self,
        key: &ObjectKey,
        content: ByteStream,
        content_type: &str,
        mode: PutMode,
    ) -> Result<(), BlobStoreError> {
        // The media upload body must be Sync, which a boxed stream is not.
        let data = collect_bytes(content).await?;
        let token = self.token().await?;

        let mut url = endpoint(
            &self.host,
            &["upload", "storage", "v1", "b", self.bucket.as_str(), "o"],
        );
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("uploadType", "media")
                .append_pair("name", key.as_str());
            if mode == PutMode::CreateOnly {
                // Generation 0 matches only when no live object exists.
                query.append_pair("ifGenerationMatch", "0");
            }
        }

        let resp = self
            .client
            .post(url)
            .bearer_auth(&token)
            .header(header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await
            .map_err(unavailable)?;

        if resp.status() == StatusCode::PRECONDITION_FAILED {
            return Err(BlobStoreError::AlreadyExists(key.to_string()));
        }

        if !resp.status().is_success() {
            return Err(failure("upload", resp).await);
        }

        Ok(())
    }

    async fn get(&self, key: &ObjectKey) -> Result<StoredObject, BlobStoreError> {
        let token = self.token().await?;

        let mut url = self.object_resource_url(key);
        url.query_pairs_mut().append_pair("alt", "media");

        let resp = self
            .client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(unavailable)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(BlobStoreError::NotFound(key.to_string()));
        }

        if !resp.status().is_success() {
            return Err(failure("download", resp).await);
        }

        let headers = resp.headers();
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let revision = headers
            .get("x-goog-generation")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let size = resp.content_length();

        Ok(StoredObject {
            content_type,
            size,
            revision,
            body: resp.bytes_stream().map_err(std::io::Error::other).boxed(),
        })
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), BlobStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .delete(self.object_resource_url(key))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(unavailable)?;

        // 404 is fine -- object already gone
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(failure("delete", resp).await);
        }

        Ok(())
    }

    fn list<'a>(&'a self, prefix: Option<&'a str>) -> KeyStream<'a> {
        // Cursor: Some(None) is the first page, Some(Some(t)) a continuation, None is done.
        let first_page: Option<Option<String>> = Some(None);
        let pages = stream::try_unfold(first_page, move |cursor| async move {
            let Some(page_token) = cursor else {
                return Ok(None);
            };
            self.list_page(prefix, page_token).await.map(|page| {
                let names: Vec<String> = page.items.into_iter().map(|item| item.name).collect();
                Some((names, page.next_page_token.map(Some)))
            })
        });

        pages
            .map_ok(|names| stream::iter(names.into_iter().map(Ok::<String, BlobStoreError>)))
            .try_flatten()
            .try_filter_map(|name| {
                let key = ObjectKey::parse(&name).ok();
                if key.is_none() {
                    tracing::debug!(name = %name, "Skipping non-key object in bucket");
                }
                future::ready(Ok::<_, BlobStoreError>(key))
            })
            .boxed()
    }

    fn object_url(&self, key: &ObjectKey) -> String {
        let mut segments = vec![self.bucket.as_str()];
        segments.extend(key.segments());
        endpoint(&self.host, &segments).to_string()
    }
}

/// Append percent-encoded path segments to `base`. A `/` inside a segment is encoded.
fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn unavailable(e: reqwest::Error) -> BlobStoreError {
    BlobStoreError::Unavailable(e.to_string())
}

async fn failure(operation: &str, resp: Response) -> BlobStoreError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    BlobStoreError::Unavailable(format!("GCS {operation} failed ({status}): {body}"))
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn sign_rs256(data: &[u8], private_key_pem: &str) -> Result<Vec<u8>, anyhow::Error> {
    // Strip PEM armour and decode base64
    let der_b64: String = private_key_pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let der = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &der_b64)?;

    let key_pair = ring::signature::RsaKeyPair::from_pkcs8(&der)
        .map_err(|e| anyhow::anyhow!("Failed to parse RSA key: {e}"))?;

    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &ring::signature::RSA_PKCS1_SHA256,
            &ring::rand::SystemRandom::new(),
            data,
            &mut signature,
        )
        .map_err(|e| anyhow::anyhow!("Failed to sign: {e}"))?;

    Ok(signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Url {
        Url::parse(STORAGE_HOST).unwrap()
    }

    #[test]
    fn test_endpoint_encodes_slashes_inside_segments() {
        let url = endpoint(&host(), &["storage", "v1", "b", "bucket", "o", "t1/acme/a/u1"]);
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/bucket/o/t1%2Facme%2Fa%2Fu1"
        );
    }

    #[test]
    fn test_endpoint_encodes_spaces() {
        let url = endpoint(&host(), &["bucket", "Acme Corp"]);
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/bucket/Acme%20Corp"
        );
    }
}
