use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::PreviewError;
use crate::render::{CancelToken, RenderImage};
use crate::resource::ResourceHandle;

/// Natural dimensions of a page at unit scale, in document points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDimensions {
    pub width: f32,
    pub height: f32,
}

/// Tagged result of a single paint attempt.
///
/// The rendering library's own abort signalling is normalized into
/// `Cancelled` here so the coordinator never has to distinguish
/// library-specific exceptions from a cooperative abort.
#[derive(Debug)]
pub enum PaintOutcome {
    Completed(RenderImage),
    Cancelled,
    Failed(String),
}

/// A parsed document, ready to serve page metadata and paints.
#[async_trait]
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> u32;

    /// Dimensions of `page_number` (1-indexed) at unit scale.
    fn page_size(&self, page_number: u32) -> Result<PageDimensions, PreviewError>;

    /// Paint `page_number` at `scale`, honoring `cancel` cooperatively.
    async fn paint_page(&self, page_number: u32, scale: f32, cancel: &CancelToken) -> PaintOutcome;
}

/// The external rendering library, behind its readiness gate.
#[async_trait]
pub trait RenderLibrary: Send + Sync {
    /// Resolves once the library can parse documents. Pends while
    /// initialization is still in progress; returns an error if the library
    /// can never become ready.
    async fn ready(&self) -> Result<(), PreviewError>;

    /// Parse a binary payload into a page source.
    async fn open(&self, data: Bytes) -> Result<Arc<dyn PageSource>, PreviewError>;
}

/// A parsed document bound to the resource handle that produced it.
///
/// Sessions are never reused across handles: installing a new handle
/// requires a fresh [`DocumentLoader::load`] call.
#[derive(Clone)]
pub struct DocumentSession {
    pub source: Arc<dyn PageSource>,
    pub page_count: u32,
    pub handle_url: String,
}

impl fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSession")
            .field("page_count", &self.page_count)
            .field("handle_url", &self.handle_url)
            .finish()
    }
}

/// Opens documents through the rendering library, waiting out its
/// initialization with a bounded timeout.
pub struct DocumentLoader {
    library: Arc<dyn RenderLibrary>,
    ready_timeout: Duration,
}

impl DocumentLoader {
    pub fn new(library: Arc<dyn RenderLibrary>, ready_timeout: Duration) -> Self {
        Self {
            library,
            ready_timeout,
        }
    }

    pub async fn load(&self, handle: &ResourceHandle) -> Result<DocumentSession, PreviewError> {
        let data = handle.bytes().ok_or_else(|| {
            PreviewError::parse(format!(
                "resource handle {} was revoked before the document could be opened",
                handle.source_url()
            ))
        })?;

        match tokio::time::timeout(self.ready_timeout, self.library.ready()).await {
            Ok(ready) => ready?,
            Err(_) => {
                return Err(PreviewError::LibraryNotReady {
                    message: format!(
                        "initialization did not complete within {:?}",
                        self.ready_timeout
                    ),
                })
            }
        }

        let source = self.library.open(data).await?;
        let page_count = source.page_count();
        debug!(url = %handle.source_url(), page_count, "document session opened");

        Ok(DocumentSession {
            source,
            page_count,
            handle_url: handle.source_url().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceManager;

    struct StubSource {
        page_count: u32,
    }

    #[async_trait]
    impl PageSource for StubSource {
        fn page_count(&self) -> u32 {
            self.page_count
        }

        fn page_size(&self, _page_number: u32) -> Result<PageDimensions, PreviewError> {
            Ok(PageDimensions {
                width: 612.0,
                height: 792.0,
            })
        }

        async fn paint_page(
            &self,
            _page_number: u32,
            _scale: f32,
            _cancel: &CancelToken,
        ) -> PaintOutcome {
            PaintOutcome::Completed(RenderImage {
                width: 1,
                height: 1,
                pixels: vec![0; 4],
            })
        }
    }

    struct StubLibrary {
        ready: bool,
    }

    #[async_trait]
    impl RenderLibrary for StubLibrary {
        async fn ready(&self) -> Result<(), PreviewError> {
            if self.ready {
                Ok(())
            } else {
                std::future::pending().await
            }
        }

        async fn open(&self, _data: Bytes) -> Result<Arc<dyn PageSource>, PreviewError> {
            Ok(Arc::new(StubSource { page_count: 10 }))
        }
    }

    #[tokio::test]
    async fn load_captures_page_count_and_handle_identity() {
        let manager = ResourceManager::new();
        let handle = manager.install(Bytes::from_static(b"%PDF-1.7"));
        let loader = DocumentLoader::new(
            Arc::new(StubLibrary { ready: true }),
            Duration::from_secs(5),
        );

        let session = loader.load(&handle).await.unwrap();
        assert_eq!(session.page_count, 10);
        assert_eq!(session.handle_url, handle.source_url());
    }

    #[tokio::test(start_paused = true)]
    async fn load_times_out_when_library_never_initializes() {
        let manager = ResourceManager::new();
        let handle = manager.install(Bytes::from_static(b"%PDF-1.7"));
        let loader = DocumentLoader::new(
            Arc::new(StubLibrary { ready: false }),
            Duration::from_secs(5),
        );

        let err = loader.load(&handle).await.unwrap_err();
        assert!(matches!(err, PreviewError::LibraryNotReady { .. }));
    }

    #[tokio::test]
    async fn load_rejects_revoked_handle() {
        let manager = ResourceManager::new();
        let handle = manager.install(Bytes::from_static(b"%PDF-1.7"));
        handle.revoke();

        let loader = DocumentLoader::new(
            Arc::new(StubLibrary { ready: true }),
            Duration::from_secs(5),
        );
        let err = loader.load(&handle).await.unwrap_err();
        assert!(matches!(err, PreviewError::Parse { .. }));
    }
}
