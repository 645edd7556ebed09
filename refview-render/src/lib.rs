//! Pdfium-backed implementation of the rendering seam.
//!
//! [`PdfiumLibrary`] binds the native Pdfium library lazily on first use;
//! the binding doubles as the readiness signal the document loader awaits.
//! Parsed documents keep their byte payload alive for as long as any page
//! paint may reference it.

use std::convert::TryFrom;
use std::mem;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use refview_core::{
    CancelToken, PageDimensions, PageSource, PaintOutcome, PreviewError, RenderImage,
    RenderLibrary,
};
use tracing::{debug, warn};

/// The native rendering library behind its one-shot readiness gate.
pub struct PdfiumLibrary {
    pdfium: tokio::sync::OnceCell<Arc<Pdfium>>,
}

impl PdfiumLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pdfium: tokio::sync::OnceCell::new(),
        }
    }

    async fn bind(&self) -> Result<&Arc<Pdfium>, PreviewError> {
        self.pdfium
            .get_or_try_init(|| async {
                let pdfium = match bind_pdfium_from_build_hint() {
                    Some(pdfium) => pdfium,
                    None => bind_pdfium_default()?,
                };
                debug!("pdfium bindings initialized");
                Ok(Arc::new(pdfium))
            })
            .await
    }
}

impl Default for PdfiumLibrary {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RenderLibrary for PdfiumLibrary {
    async fn ready(&self) -> Result<(), PreviewError> {
        self.bind().await.map(|_| ())
    }

    async fn open(&self, data: Bytes) -> Result<Arc<dyn PageSource>, PreviewError> {
        let pdfium = Arc::clone(self.bind().await?);
        let source = PdfiumPageSource::open(pdfium, data)?;
        Ok(Arc::new(source))
    }
}

/// One parsed document and the payload it was parsed from.
struct PdfiumPageSource {
    // Declared first: the document borrows both `data` and `pdfium` and must
    // drop before either of them.
    document: Mutex<PdfDocument<'static>>,
    data: Bytes,
    pdfium: Arc<Pdfium>,
    page_count: u32,
}

impl PdfiumPageSource {
    fn open(pdfium: Arc<Pdfium>, data: Bytes) -> Result<Self, PreviewError> {
        let document = pdfium
            .load_pdf_from_byte_slice(&data, None)
            .map_err(|err| PreviewError::parse(err.to_string()))?;
        // SAFETY: the returned PdfDocument borrows the Pdfium bindings in
        // `pdfium` and the byte buffer behind `data`, both of which are
        // owned by the PdfiumPageSource being constructed. `Bytes` never
        // reallocates its buffer, and `document` is the first declared field
        // so it drops before `data` and `pdfium`. The borrow therefore stays
        // valid for the entire lifetime of the cached PdfDocument.
        let document =
            unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };

        let page_count = u32::from(document.pages().len());
        if page_count == 0 {
            return Err(PreviewError::parse("document contains no pages"));
        }

        debug!(page_count, bytes = data.len(), "document parsed");
        Ok(Self {
            document: Mutex::new(document),
            data,
            pdfium,
            page_count,
        })
    }

    fn with_document<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&PdfDocument<'static>) -> R,
    {
        let guard = self.document.lock();
        f(&guard)
    }

    fn page_index(&self, page_number: u32) -> Result<PdfPageIndex, PreviewError> {
        if page_number < 1 || page_number > self.page_count {
            return Err(PreviewError::PageOutOfRange {
                page_number,
                page_count: self.page_count,
            });
        }
        PdfPageIndex::try_from(page_number - 1).map_err(|_| PreviewError::PageOutOfRange {
            page_number,
            page_count: self.page_count,
        })
    }

    fn render_internal(&self, page_number: u32, scale: f32) -> Result<RenderImage, PreviewError> {
        let index = self.page_index(page_number)?;
        self.with_document(|document| {
            let page = document.pages().get(index).map_err(|err| {
                render_error(page_number, format!("failed to load page: {err}"))
            })?;

            let config = PdfRenderConfig::new().scale_page_by_factor(scale.max(0.05));
            let bitmap = page
                .render_with_config(&config)
                .map_err(|err| render_error(page_number, err.to_string()))?;
            let image = bitmap.as_image().to_rgba8();
            let (width, height) = image.dimensions();

            Ok(RenderImage {
                width,
                height,
                pixels: image.into_raw(),
            })
        })
    }
}

fn render_error(page_number: u32, message: String) -> PreviewError {
    PreviewError::Render {
        page_number,
        message,
    }
}

#[async_trait]
impl PageSource for PdfiumPageSource {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_size(&self, page_number: u32) -> Result<PageDimensions, PreviewError> {
        let index = self.page_index(page_number)?;
        self.with_document(|document| {
            let page = document.pages().get(index).map_err(|err| {
                render_error(page_number, format!("failed to load page: {err}"))
            })?;
            Ok(PageDimensions {
                width: page.width().value,
                height: page.height().value,
            })
        })
    }

    async fn paint_page(&self, page_number: u32, scale: f32, cancel: &CancelToken) -> PaintOutcome {
        if cancel.is_cancelled() {
            return PaintOutcome::Cancelled;
        }
        // Rasterization itself is one native call; yielding first gives a
        // superseding request its chance to abort this paint before the
        // expensive part starts.
        tokio::task::yield_now().await;
        if cancel.is_cancelled() {
            return PaintOutcome::Cancelled;
        }

        let result = self.render_internal(page_number, scale);
        if cancel.is_cancelled() {
            return PaintOutcome::Cancelled;
        }
        match result {
            Ok(image) => PaintOutcome::Completed(image),
            Err(err) => PaintOutcome::Failed(err.to_string()),
        }
    }
}

fn bind_pdfium_from_build_hint() -> Option<Pdfium> {
    match option_env!("REFVIEW_PDFIUM_LIBRARY_PATH") {
        Some(path) if !path.is_empty() => match Pdfium::bind_to_library(path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!(
                    "failed to load Pdfium from build-provided path {}: {}",
                    path, err
                );
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium, PreviewError> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(PreviewError::LibraryNotReady {
                message: format!(
                    "failed to bind to a pdfium library; ensure it is installed ({})",
                    errors.join(", ")
                ),
            })
        }
    }
}
