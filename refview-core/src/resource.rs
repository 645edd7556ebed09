use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::PreviewError;

/// Fetches the binary document backing a page reference.
///
/// A failed fetch is surfaced as [`PreviewError::Fetch`]; no retry happens
/// here. Retrying is the caller's decision, at most once per user-initiated
/// navigation (in practice: the user re-activates the reference).
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch_document(
        &self,
        document_name: &str,
        page_number: u32,
    ) -> Result<Bytes, PreviewError>;
}

/// A locally-scoped reference to fetched binary content.
///
/// The handle plays the role of an object URL: it addresses the payload in
/// memory under a `memory://` identity until it is revoked. Revoking drops
/// the payload and is idempotent. Clones share the same revocation state.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    url: String,
    data: Mutex<Option<Bytes>>,
}

impl ResourceHandle {
    fn new(data: Bytes) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                url: format!("memory://{}", Uuid::new_v4()),
                data: Mutex::new(Some(data)),
            }),
        }
    }

    #[must_use]
    pub fn source_url(&self) -> &str {
        &self.inner.url
    }

    /// The referenced payload, or `None` once revoked.
    #[must_use]
    pub fn bytes(&self) -> Option<Bytes> {
        self.inner.data.lock().clone()
    }

    /// Release the underlying payload. Revoking twice is a no-op.
    pub fn revoke(&self) {
        if self.inner.data.lock().take().is_some() {
            debug!(url = %self.inner.url, "resource handle revoked");
        }
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.inner.data.lock().is_none()
    }
}

/// Owns the single live [`ResourceHandle`] of a viewer instance.
///
/// Invariant: at most one non-revoked handle exists at any time. Installing
/// a new payload revokes the previous handle before the replacement becomes
/// visible.
#[derive(Debug, Default)]
pub struct ResourceManager {
    active: Mutex<Option<ResourceHandle>>,
}

impl ResourceManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fetched payload in a fresh handle, revoking any predecessor.
    pub fn install(&self, data: Bytes) -> ResourceHandle {
        let handle = ResourceHandle::new(data);
        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.revoke();
        }
        *active = Some(handle.clone());
        debug!(url = %handle.source_url(), "resource handle installed");
        handle
    }

    /// Revoke and drop the active handle. Safe to call repeatedly.
    pub fn release(&self) {
        if let Some(handle) = self.active.lock().take() {
            handle.revoke();
        }
    }

    /// The current handle, if one exists and has not been revoked.
    #[must_use]
    pub fn active(&self) -> Option<ResourceHandle> {
        self.active.lock().clone().filter(|h| !h.is_revoked())
    }
}
