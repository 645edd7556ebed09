//! Page-reference navigation and render coordination for a chat-embedded
//! document preview.
//!
//! An assistant reply carries page references; activating one produces a
//! [`NavigationIntent`] that the [`Viewer`] resolves into either a repaint
//! of the already-loaded document or a full fetch/parse/paint cycle. The
//! fetch, the rendering library and the paint target all sit behind traits
//! so the pipeline is testable without a backend or a native library.

mod error;
mod loader;
mod references;
mod render;
mod resource;
mod viewer;

pub use error::PreviewError;
pub use loader::{
    DocumentLoader, DocumentSession, PageDimensions, PageSource, PaintOutcome, RenderLibrary,
};
pub use references::{DocumentReference, NavigationIntent, PageEntry, ReferenceIndex};
pub use render::{
    CancelToken, RenderCoordinator, RenderImage, RenderOutcome, RenderTaskState, SurfaceSnapshot,
    Viewport, Zoom, DEFAULT_ZOOM, MAX_ZOOM, MIN_ZOOM, ZOOM_STEP,
};
pub use resource::{ResourceFetcher, ResourceHandle, ResourceManager};
pub use viewer::{SelectedTarget, Viewer, ViewerConfig, ViewerEvent, ViewerPhase};
