use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::PreviewError;
use crate::loader::{DocumentLoader, DocumentSession, RenderLibrary};
use crate::references::NavigationIntent;
use crate::render::{RenderCoordinator, RenderOutcome, Viewport};
use crate::resource::{ResourceFetcher, ResourceHandle, ResourceManager};

/// Viewer lifecycle, owned per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewerPhase {
    #[default]
    Idle,
    Loading,
    Ready,
    Error,
}

/// Notifications flowing outward to the host. The selected target is the
/// single source of truth for the current page; the host only ever follows
/// these events, it never writes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    PageChanged { page_number: u32 },
    PhaseChanged { phase: ViewerPhase },
}

/// The single active navigation target. Replaced wholesale on navigation;
/// only the page number mutates when the page changes from within the
/// viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedTarget {
    pub document_name: String,
    pub page_number: u32,
    pub highlights: Vec<String>,
}

impl From<NavigationIntent> for SelectedTarget {
    fn from(intent: NavigationIntent) -> Self {
        Self {
            document_name: intent.document_name,
            page_number: intent.page_number,
            highlights: intent.highlights,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub viewport: Viewport,
    pub device_pixel_ratio: f32,
    /// Bound on the rendering library's initialization wait.
    pub ready_timeout: Duration,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            device_pixel_ratio: 1.0,
            ready_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct ViewerState {
    phase: ViewerPhase,
    target: Option<SelectedTarget>,
    session: Option<DocumentSession>,
}

/// Drives resource acquisition, document loading and page rendering in
/// response to navigation intents.
///
/// Navigation for a document that is already loaded skips the fetch and the
/// parse entirely and goes straight to the coordinator; that short-circuit
/// is the dominant path while the user pages through one document's
/// references. Intents arriving while an earlier navigation is still in
/// flight win implicitly: the superseded navigation abandons itself at its
/// next suspension point without touching the resource slot.
pub struct Viewer {
    fetcher: Arc<dyn ResourceFetcher>,
    loader: DocumentLoader,
    resources: ResourceManager,
    coordinator: RenderCoordinator,
    state: Mutex<ViewerState>,
    events: Mutex<Vec<ViewerEvent>>,
    generation: AtomicU64,
}

impl Viewer {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        library: Arc<dyn RenderLibrary>,
        config: ViewerConfig,
    ) -> Self {
        Self {
            fetcher,
            loader: DocumentLoader::new(library, config.ready_timeout),
            resources: ResourceManager::new(),
            coordinator: RenderCoordinator::new(config.viewport, config.device_pixel_ratio),
            state: Mutex::new(ViewerState::default()),
            events: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn phase(&self) -> ViewerPhase {
        self.state.lock().phase
    }

    #[must_use]
    pub fn target(&self) -> Option<SelectedTarget> {
        self.state.lock().target.clone()
    }

    #[must_use]
    pub fn page_count(&self) -> Option<u32> {
        self.state.lock().session.as_ref().map(|s| s.page_count)
    }

    /// The live resource handle, if a document is loaded.
    #[must_use]
    pub fn active_resource(&self) -> Option<ResourceHandle> {
        self.resources.active()
    }

    #[must_use]
    pub fn coordinator(&self) -> &RenderCoordinator {
        &self.coordinator
    }

    /// Drain the notifications accumulated since the last call.
    #[must_use]
    pub fn take_events(&self) -> Vec<ViewerEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Handle an activated page reference.
    #[instrument(skip(self, intent), fields(document = %intent.document_name, page = intent.page_number))]
    pub async fn navigate(&self, intent: NavigationIntent) -> Result<RenderOutcome, PreviewError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let reusable = {
            let state = self.state.lock();
            state.session.is_some()
                && state.target.as_ref().map(|t| t.document_name.as_str())
                    == Some(intent.document_name.as_str())
                && self.resources.active().is_some()
        };

        if reusable {
            debug!("reusing loaded document");
            return self.render_target(intent).await;
        }

        self.transition(ViewerPhase::Loading, |state| {
            state.target = Some(SelectedTarget::from(intent.clone()));
            state.session = None;
        });

        let data = match self
            .fetcher
            .fetch_document(&intent.document_name, intent.page_number)
            .await
        {
            Ok(data) => data,
            Err(err) => return self.fail_if_current(generation, err),
        };
        if self.superseded(generation) {
            return Ok(RenderOutcome::Superseded);
        }

        let handle = self.resources.install(data);
        let session = match self.loader.load(&handle).await {
            Ok(session) => session,
            Err(err) => return self.fail_if_current(generation, err),
        };
        if self.superseded(generation) {
            return Ok(RenderOutcome::Superseded);
        }

        self.transition(ViewerPhase::Ready, |state| {
            state.session = Some(session);
        });
        self.render_target(intent).await
    }

    /// Step to the next page of the loaded document.
    pub async fn next_page(&self) -> Result<RenderOutcome, PreviewError> {
        self.step_page(1).await
    }

    /// Step to the previous page of the loaded document.
    pub async fn prev_page(&self) -> Result<RenderOutcome, PreviewError> {
        self.step_page(-1).await
    }

    pub async fn zoom_in(&self) -> Result<RenderOutcome, PreviewError> {
        let factor = self.coordinator.zoom_in();
        debug!(factor, "zoom in");
        self.rerender_current().await
    }

    pub async fn zoom_out(&self) -> Result<RenderOutcome, PreviewError> {
        let factor = self.coordinator.zoom_out();
        debug!(factor, "zoom out");
        self.rerender_current().await
    }

    pub async fn zoom_reset(&self) -> Result<RenderOutcome, PreviewError> {
        let factor = self.coordinator.zoom_reset();
        debug!(factor, "zoom reset");
        self.rerender_current().await
    }

    /// Dismiss the viewer: clear the target, revoke the resource, discard
    /// the session and return to idle.
    pub fn close(&self) {
        self.transition(ViewerPhase::Idle, |state| {
            state.target = None;
            state.session = None;
        });
        self.resources.release();
        debug!("viewer closed");
    }

    async fn step_page(&self, delta: i64) -> Result<RenderOutcome, PreviewError> {
        let intent = {
            let state = self.state.lock();
            let (Some(target), Some(session)) = (state.target.as_ref(), state.session.as_ref())
            else {
                return Ok(RenderOutcome::Unchanged);
            };
            let next = (i64::from(target.page_number) + delta)
                .clamp(1, i64::from(session.page_count)) as u32;
            if next == target.page_number {
                return Ok(RenderOutcome::Unchanged);
            }
            // Only the page number changes on an in-viewer step; the rest of
            // the target survives.
            NavigationIntent {
                document_name: target.document_name.clone(),
                page_number: next,
                highlights: target.highlights.clone(),
            }
        };
        self.render_target(intent).await
    }

    async fn rerender_current(&self) -> Result<RenderOutcome, PreviewError> {
        let intent = {
            let state = self.state.lock();
            let (Some(target), Some(_)) = (state.target.as_ref(), state.session.as_ref()) else {
                return Ok(RenderOutcome::Unchanged);
            };
            NavigationIntent {
                document_name: target.document_name.clone(),
                page_number: target.page_number,
                highlights: target.highlights.clone(),
            }
        };
        self.render_target(intent).await
    }

    /// Update the selected target and paint its page from the loaded
    /// session. Emits `PageChanged` outward only when the page actually
    /// changed, so host-originated intents for the current page do not echo
    /// back and forth.
    async fn render_target(&self, intent: NavigationIntent) -> Result<RenderOutcome, PreviewError> {
        let (session, previous_page) = {
            let mut state = self.state.lock();
            let previous = state.target.as_ref().map(|t| t.page_number);
            state.target = Some(SelectedTarget::from(intent.clone()));
            (state.session.clone(), previous)
        };
        let Some(session) = session else {
            return Ok(RenderOutcome::Unchanged);
        };

        let outcome = self
            .coordinator
            .render_page(&session, intent.page_number, self.coordinator.zoom_factor())
            .await;

        if let Ok(RenderOutcome::Painted { page_number, .. }) = &outcome {
            if previous_page != Some(*page_number) {
                self.events.lock().push(ViewerEvent::PageChanged {
                    page_number: *page_number,
                });
            }
        }
        outcome
    }

    fn superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn fail_if_current(
        &self,
        generation: u64,
        err: PreviewError,
    ) -> Result<RenderOutcome, PreviewError> {
        if self.superseded(generation) {
            // A newer navigation owns the viewer now; this failure is moot.
            return Ok(RenderOutcome::Superseded);
        }
        self.resources.release();
        self.transition(ViewerPhase::Error, |_| {});
        warn!(error = %err, "navigation failed");
        Err(err)
    }

    fn transition<F: FnOnce(&mut ViewerState)>(&self, phase: ViewerPhase, apply: F) {
        let mut state = self.state.lock();
        apply(&mut state);
        if state.phase != phase {
            state.phase = phase;
            drop(state);
            self.events.lock().push(ViewerEvent::PhaseChanged { phase });
            debug!(?phase, "viewer phase changed");
        }
    }
}
