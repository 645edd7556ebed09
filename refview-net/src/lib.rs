//! HTTP client for the preview backend.
//!
//! The backend serves a freshly highlighted copy of the referenced document
//! per page and offers a cleanup endpoint for its transient render
//! artifacts. Non-success statuses map to [`PreviewError::Fetch`]; nothing
//! is retried here.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use refview_core::{PreviewError, ResourceFetcher};
use tracing::{debug, instrument};

const BACKEND_URL_ENV: &str = "REFVIEW_BACKEND_URL";
const DEFAULT_BACKEND_URL: &str = "http://localhost:8000/api";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl BackendConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Resolve the base URL from `REFVIEW_BACKEND_URL`, falling back to the
    /// local development backend.
    #[must_use]
    pub fn from_env() -> Self {
        let base_url =
            std::env::var(BACKEND_URL_ENV).unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());
        Self::new(base_url)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_URL)
    }
}

/// Client for the highlighted-document endpoints.
pub struct BackendClient {
    http: reqwest::Client,
    config: BackendConfig,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self, PreviewError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| {
                PreviewError::fetch(None, format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self { http, config })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Ask the backend to purge leftover highlighted documents.
    ///
    /// Invoked once at application startup; callers treat a failure as
    /// non-fatal and merely log it.
    #[instrument(skip(self))]
    pub async fn cleanup_artifacts(&self) -> Result<(), PreviewError> {
        let url = self.endpoint("cleanup-pdfs");
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|err| PreviewError::fetch(err.status().map(|s| s.as_u16()), err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PreviewError::fetch(
                Some(status.as_u16()),
                format!("DELETE {url} returned {status}"),
            ));
        }
        debug!("cleaned up server-side render artifacts");
        Ok(())
    }
}

#[async_trait]
impl ResourceFetcher for BackendClient {
    #[instrument(skip(self), fields(document = %document_name, page = page_number))]
    async fn fetch_document(
        &self,
        document_name: &str,
        page_number: u32,
    ) -> Result<Bytes, PreviewError> {
        let url = self.endpoint("highlighted-pdfs");
        let response = self
            .http
            .get(&url)
            .query(&[("page", page_number)])
            .send()
            .await
            .map_err(|err| PreviewError::fetch(err.status().map(|s| s.as_u16()), err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PreviewError::fetch(
                Some(status.as_u16()),
                format!("GET {url}?page={page_number} returned {status} for {document_name:?}"),
            ));
        }

        let data = response
            .bytes()
            .await
            .map_err(|err| PreviewError::fetch(None, err.to_string()))?;
        debug!(bytes = data.len(), "fetched highlighted document");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned HTTP response on an ephemeral port.
    async fn serve_once(status_line: &'static str, body: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request).await;
            let header = format!(
                "{status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).await.unwrap();
            stream.write_all(body).await.unwrap();
        });
        addr
    }

    fn client_for(addr: SocketAddr) -> BackendClient {
        BackendClient::new(BackendConfig::new(format!("http://{addr}/api"))).unwrap()
    }

    #[test]
    fn endpoints_join_without_duplicate_slashes() {
        let client = BackendClient::new(BackendConfig::new("http://localhost:8000/api/")).unwrap();
        assert_eq!(
            client.endpoint("highlighted-pdfs"),
            "http://localhost:8000/api/highlighted-pdfs"
        );
        assert_eq!(
            client.endpoint("cleanup-pdfs"),
            "http://localhost:8000/api/cleanup-pdfs"
        );
    }

    #[tokio::test]
    async fn fetch_returns_the_document_body() {
        let addr = serve_once("HTTP/1.1 200 OK", b"%PDF-1.7 payload").await;
        let client = client_for(addr);

        let data = client.fetch_document("Spec.pdf", 3).await.unwrap();
        assert_eq!(data, Bytes::from_static(b"%PDF-1.7 payload"));
    }

    #[tokio::test]
    async fn non_success_status_is_a_fetch_error() {
        let addr = serve_once("HTTP/1.1 404 Not Found", b"no highlighted pdfs").await;
        let client = client_for(addr);

        let err = client.fetch_document("Spec.pdf", 3).await.unwrap_err();
        match err {
            PreviewError::Fetch { status, .. } => assert_eq!(status, Some(404)),
            other => panic!("expected fetch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cleanup_maps_statuses_the_same_way() {
        let addr = serve_once("HTTP/1.1 200 OK", b"{\"success\":true}").await;
        client_for(addr).cleanup_artifacts().await.unwrap();

        let addr = serve_once("HTTP/1.1 500 Internal Server Error", b"").await;
        let err = client_for(addr).cleanup_artifacts().await.unwrap_err();
        assert!(matches!(err, PreviewError::Fetch { status: Some(500), .. }));
    }
}
