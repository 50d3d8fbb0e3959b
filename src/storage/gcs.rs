//! Google Cloud Storage client (JSON API)
//!
//! Only the three calls the provisioner needs are implemented. Listing
//! follows `nextPageToken` until the prefix is exhausted.
//!
//! A fixed bearer token expires after about an hour, so long-running
//! daemons should use [`GcsAuth::Metadata`], which fetches tokens from the
//! compute metadata server and refreshes them before they expire.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{ObjectInfo, ObjectStore, StorageError};

/// Public GCS endpoint; override for emulators such as fake-gcs-server
pub const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Token endpoint of the GCE/GKE/Cloud Run metadata server
pub const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Metadata tokens are replaced this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// How requests to the bucket are authenticated
#[derive(Debug, Clone)]
pub enum GcsAuth {
    /// No `Authorization` header (emulators, public buckets)
    Anonymous,
    /// A fixed OAuth access token
    Static(String),
    /// Access tokens from the metadata server at `token_url`
    Metadata { token_url: Url },
}

impl GcsAuth {
    /// Metadata-server auth against [`DEFAULT_METADATA_TOKEN_URL`]
    pub fn metadata() -> Result<Self, StorageError> {
        Self::metadata_at(DEFAULT_METADATA_TOKEN_URL)
    }

    pub fn metadata_at(token_url: &str) -> Result<Self, StorageError> {
        let token_url = Url::parse(token_url).map_err(|_| StorageError::InvalidEndpoint {
            endpoint: token_url.to_string(),
        })?;
        Ok(Self::Metadata { token_url })
    }
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// One page of `objects.list`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
    /// GCS encodes uint64 values as strings
    size: Option<String>,
}

/// Client for a GCS-compatible JSON API
pub struct GcsStore {
    endpoint: Url,
    auth: GcsAuth,
    cached_token: Mutex<Option<CachedToken>>,
    client: reqwest::Client,
}

impl GcsStore {
    /// Create a client for `endpoint`
    pub fn new(endpoint: &str, auth: GcsAuth) -> Result<Self, StorageError> {
        let endpoint = Url::parse(endpoint).map_err(|_| StorageError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(StorageError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
            });
        }
        Ok(Self {
            endpoint,
            auth,
            cached_token: Mutex::new(None),
            client: reqwest::Client::new(),
        })
    }

    /// Build `{endpoint}/{segments...}` with each segment percent-encoded
    fn url(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidEndpoint {
                endpoint: self.endpoint.to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Current bearer token, refreshing a metadata token that is about to expire
    async fn bearer_token(&self) -> Result<Option<String>, StorageError> {
        let token_url = match &self.auth {
            GcsAuth::Anonymous => return Ok(None),
            GcsAuth::Static(token) => return Ok(Some(token.clone())),
            GcsAuth::Metadata { token_url } => token_url,
        };

        let mut cached = self.cached_token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
            return Ok(Some(token.value.clone()));
        }

        let response = self
            .client
            .get(token_url.clone())
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        let body = Self::check(response).await?.text().await?;
        let token: MetadataToken = serde_json::from_str(&body)?;
        tracing::debug!("[GCS] Refreshed access token, expires in {}s", token.expires_in);

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(Some(token.access_token))
    }

    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, StorageError> {
        Ok(match self.bearer_token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(StorageError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url(&["storage", "v1", "b", bucket, "o"])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("prefix", prefix);
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let response = self.authorize(self.client.get(url)).await?.send().await?;
            let body = Self::check(response).await?.text().await?;
            let page: ListResponse = serde_json::from_str(&body)?;

            objects.extend(page.items.into_iter().map(|item| ObjectInfo {
                key: item.name,
                size: item.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!(
            "[GCS] Listed {} objects under gs://{}/{}",
            objects.len(),
            bucket,
            prefix
        );
        Ok(objects)
    }

    async fn download_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let mut url = self.url(&["storage", "v1", "b", bucket, "o", key])?;
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self.authorize(self.client.get(url)).await?.send().await?;
        let bytes = Self::check(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        let mut url = self.url(&["upload", "storage", "v1", "b", bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);

        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        let response = self.authorize(request).await?.send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_object_urls_encode_slashes_in_keys() {
        let store = GcsStore::new(DEFAULT_GCS_ENDPOINT, GcsAuth::Anonymous).unwrap();
        let url = store
            .url(&["storage", "v1", "b", "bucket", "o", "workspaces/workspace_a/x y.txt"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/bucket/o/workspaces%2Fworkspace_a%2Fx%20y.txt"
        );
    }

    #[test]
    fn test_endpoint_with_path_prefix() {
        let store = GcsStore::new("http://localhost:4443/gcs/", GcsAuth::Anonymous).unwrap();
        let url = store.url(&["storage", "v1", "b", "bkt", "o"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:4443/gcs/storage/v1/b/bkt/o");
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        assert!(matches!(
            GcsStore::new("not a url", GcsAuth::Anonymous),
            Err(StorageError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_list_response_parsing() {
        let body = r#"{
            "kind": "storage#objects",
            "nextPageToken": "abc",
            "items": [
                {"name": "workspaces/workspace_a/", "size": "0"},
                {"name": "workspaces/workspace_a/readme.md", "size": "42"}
            ]
        }"#;
        let page: ListResponse = serde_json::from_str(body).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[1].size.as_deref(), Some("42"));
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));

        let empty: ListResponse = serde_json::from_str(r#"{"kind":"storage#objects"}"#).unwrap();
        assert!(empty.items.is_empty());
        assert!(empty.next_page_token.is_none());
    }

    /// Serve `body` as the metadata token response, counting requests
    async fn token_server(body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/token", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (url, hits)
    }

    #[tokio::test]
    async fn test_metadata_token_is_cached() {
        let (url, hits) =
            token_server(r#"{"access_token":"ya29.fresh","expires_in":3599,"token_type":"Bearer"}"#)
                .await;
        let store = GcsStore::new(DEFAULT_GCS_ENDPOINT, GcsAuth::metadata_at(&url).unwrap()).unwrap();

        assert_eq!(store.bearer_token().await.unwrap().as_deref(), Some("ya29.fresh"));
        assert_eq!(store.bearer_token().await.unwrap().as_deref(), Some("ya29.fresh"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_metadata_token_near_expiry_is_refreshed() {
        let (url, hits) =
            token_server(r#"{"access_token":"ya29.short","expires_in":30,"token_type":"Bearer"}"#)
                .await;
        let store = GcsStore::new(DEFAULT_GCS_ENDPOINT, GcsAuth::metadata_at(&url).unwrap()).unwrap();

        store.bearer_token().await.unwrap();
        store.bearer_token().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_static_and_anonymous_auth() {
        let store = GcsStore::new(DEFAULT_GCS_ENDPOINT, GcsAuth::Static("t".to_string())).unwrap();
        assert_eq!(store.bearer_token().await.unwrap().as_deref(), Some("t"));

        let store = GcsStore::new(DEFAULT_GCS_ENDPOINT, GcsAuth::Anonymous).unwrap();
        assert!(store.bearer_token().await.unwrap().is_none());
    }
}
