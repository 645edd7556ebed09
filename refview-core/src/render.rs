use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::PreviewError;
use crate::loader::{DocumentSession, PaintOutcome};

/// Zoom step applied by a single in/out action.
pub const ZOOM_STEP: f32 = 0.25;
/// Lower zoom bound.
pub const MIN_ZOOM: f32 = 0.25;
/// Upper zoom bound.
pub const MAX_ZOOM: f32 = 3.0;
/// Zoom applied on reset and on a fresh viewer.
pub const DEFAULT_ZOOM: f32 = 0.65;

/// An RGBA8 pixel buffer produced by one paint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Cooperative cancellation flag shared between the coordinator and a paint
/// in flight. All clones observe a cancel; cancelling twice is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Logical dimensions the hosting surface currently offers for the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    #[must_use]
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(800.0, 1000.0)
    }
}

/// User-chosen zoom level, stepped and clamped.
#[derive(Debug, Clone, Copy)]
pub struct Zoom {
    factor: f32,
}

impl Default for Zoom {
    fn default() -> Self {
        Self {
            factor: DEFAULT_ZOOM,
        }
    }
}

impl Zoom {
    #[must_use]
    pub fn new(factor: f32) -> Self {
        Self {
            factor: Self::clamp_factor(factor),
        }
    }

    #[must_use]
    pub fn factor(&self) -> f32 {
        self.factor
    }

    pub fn step_in(&mut self) -> f32 {
        self.factor = Self::clamp_factor(self.factor + ZOOM_STEP);
        self.factor
    }

    pub fn step_out(&mut self) -> f32 {
        self.factor = Self::clamp_factor(self.factor - ZOOM_STEP);
        self.factor
    }

    pub fn reset(&mut self) -> f32 {
        self.factor = DEFAULT_ZOOM;
        self.factor
    }

    /// Clamp to the valid range; non-finite input falls back to the default.
    #[must_use]
    pub fn clamp_factor(factor: f32) -> f32 {
        if factor.is_finite() {
            factor.clamp(MIN_ZOOM, MAX_ZOOM)
        } else {
            DEFAULT_ZOOM
        }
    }
}

/// Terminal states of a render task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTaskState {
    Pending,
    Cancelled,
    Complete,
    Failed,
}

/// One attempt to paint a page. At most one task is pending per coordinator;
/// starting a new task cancels its predecessor before the new task reaches
/// any suspension point.
#[derive(Debug, Clone)]
struct RenderTask {
    id: u64,
    cancel: CancelToken,
    state: Arc<Mutex<RenderTaskState>>,
}

impl RenderTask {
    fn new(id: u64) -> Self {
        Self {
            id,
            cancel: CancelToken::new(),
            state: Arc::new(Mutex::new(RenderTaskState::Pending)),
        }
    }

    /// Move a still-pending task to a terminal state.
    fn finish(&self, next: RenderTaskState) {
        let mut state = self.state.lock();
        if *state == RenderTaskState::Pending {
            *state = next;
        }
    }

    fn abort(&self) {
        self.cancel.cancel();
        self.finish(RenderTaskState::Cancelled);
    }
}

/// The drawable owned by the coordinator: a physical-resolution pixel buffer
/// displayed at logical dimensions.
#[derive(Debug, Default)]
struct Surface {
    image: Option<RenderImage>,
    logical_width: f32,
    logical_height: f32,
}

impl Surface {
    fn clear(&mut self) {
        self.image = None;
        self.logical_width = 0.0;
        self.logical_height = 0.0;
    }

    fn present(&mut self, image: RenderImage, logical_width: f32, logical_height: f32) {
        self.image = Some(image);
        self.logical_width = logical_width;
        self.logical_height = logical_height;
    }
}

/// A copy of the painted surface for the host to display or persist.
#[derive(Debug, Clone)]
pub struct SurfaceSnapshot {
    /// Physical pixels (logical dimensions scaled by the device-pixel ratio).
    pub image: RenderImage,
    pub logical_width: f32,
    pub logical_height: f32,
    pub device_pixel_ratio: f32,
}

/// How a render request concluded. Cancellation and supersession are
/// ordinary outcomes, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Painted { page_number: u32, scale: f32 },
    Cancelled,
    Superseded,
    Unchanged,
}

/// Paints one page at a time onto the shared surface.
///
/// The coordinator is the only writer of the surface. Correctness of
/// overlapping requests rests on cancel-before-start: a new request flags
/// the pending task's token synchronously, so a superseded paint can never
/// publish its pixels.
pub struct RenderCoordinator {
    viewport: Mutex<Viewport>,
    zoom: Mutex<Zoom>,
    surface: Mutex<Surface>,
    pending: Mutex<Option<RenderTask>>,
    next_task_id: AtomicU64,
    device_pixel_ratio: f32,
}

impl RenderCoordinator {
    #[must_use]
    pub fn new(viewport: Viewport, device_pixel_ratio: f32) -> Self {
        let device_pixel_ratio = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
            device_pixel_ratio
        } else {
            1.0
        };
        Self {
            viewport: Mutex::new(viewport),
            zoom: Mutex::new(Zoom::default()),
            surface: Mutex::new(Surface::default()),
            pending: Mutex::new(None),
            next_task_id: AtomicU64::new(1),
            device_pixel_ratio,
        }
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        *self.viewport.lock() = viewport;
    }

    #[must_use]
    pub fn device_pixel_ratio(&self) -> f32 {
        self.device_pixel_ratio
    }

    #[must_use]
    pub fn zoom_factor(&self) -> f32 {
        self.zoom.lock().factor()
    }

    pub fn zoom_in(&self) -> f32 {
        self.zoom.lock().step_in()
    }

    pub fn zoom_out(&self) -> f32 {
        self.zoom.lock().step_out()
    }

    pub fn zoom_reset(&self) -> f32 {
        self.zoom.lock().reset()
    }

    /// Replace the zoom level wholesale (initial host configuration).
    pub fn set_zoom(&self, factor: f32) -> f32 {
        let mut zoom = self.zoom.lock();
        *zoom = Zoom::new(factor);
        zoom.factor()
    }

    /// The last fully painted page, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<SurfaceSnapshot> {
        let surface = self.surface.lock();
        surface.image.clone().map(|image| SurfaceSnapshot {
            image,
            logical_width: surface.logical_width,
            logical_height: surface.logical_height,
            device_pixel_ratio: self.device_pixel_ratio,
        })
    }

    /// Paint `page_number` (1-indexed) from `session` at the current zoom.
    ///
    /// Any pending paint is cancelled first and reports
    /// [`RenderOutcome::Cancelled`]; the surface is cleared before the new
    /// paint starts so no artifacts of the cancelled attempt survive. The
    /// effective scale never drops below the requested zoom, so an oversized
    /// page overflows the viewport instead of shrinking below readability.
    pub async fn render_page(
        &self,
        session: &DocumentSession,
        page_number: u32,
        requested_scale: f32,
    ) -> Result<RenderOutcome, PreviewError> {
        if page_number < 1 || page_number > session.page_count {
            return Err(PreviewError::PageOutOfRange {
                page_number,
                page_count: session.page_count,
            });
        }

        let natural = session.source.page_size(page_number)?;
        let scale = self.effective_scale(natural.width, natural.height, requested_scale);

        let task = self.begin_task(page_number, scale);
        self.surface.lock().clear();

        // Physical resolution follows the device-pixel ratio while the
        // displayed size stays logical.
        let paint_scale = scale * self.device_pixel_ratio;
        let outcome = session
            .source
            .paint_page(page_number, paint_scale, &task.cancel)
            .await;

        let result = match outcome {
            PaintOutcome::Cancelled => {
                task.finish(RenderTaskState::Cancelled);
                debug!(page_number, "paint cancelled");
                Ok(RenderOutcome::Cancelled)
            }
            PaintOutcome::Completed(image) => {
                if task.cancel.is_cancelled() {
                    // Superseded while the library was finishing; the pixels
                    // must not reach the surface.
                    task.finish(RenderTaskState::Cancelled);
                    Ok(RenderOutcome::Cancelled)
                } else {
                    let logical_width = natural.width * scale;
                    let logical_height = natural.height * scale;
                    self.surface.lock().present(image, logical_width, logical_height);
                    task.finish(RenderTaskState::Complete);
                    debug!(page_number, scale, "page painted");
                    Ok(RenderOutcome::Painted { page_number, scale })
                }
            }
            PaintOutcome::Failed(message) => {
                task.finish(RenderTaskState::Failed);
                Err(PreviewError::Render {
                    page_number,
                    message,
                })
            }
        };

        self.retire_task(&task);
        result
    }

    fn effective_scale(&self, natural_width: f32, natural_height: f32, requested: f32) -> f32 {
        let requested = Zoom::clamp_factor(requested);
        if natural_width <= 0.0 || natural_height <= 0.0 {
            return requested;
        }
        let viewport = *self.viewport.lock();
        let fit = (viewport.width / natural_width).min(viewport.height / natural_height);
        if fit.is_finite() && fit > 0.0 {
            fit.max(requested)
        } else {
            requested
        }
    }

    fn begin_task(&self, page_number: u32, scale: f32) -> RenderTask {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let task = RenderTask::new(id);
        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
            debug!(superseded = previous.id, page_number, scale, "pending paint cancelled");
        }
        *pending = Some(task.clone());
        task
    }

    fn retire_task(&self, task: &RenderTask) {
        let mut pending = self.pending.lock();
        if pending.as_ref().map(|t| t.id) == Some(task.id) {
            *pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{PageDimensions, PageSource};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn zoom_steps_from_default() {
        let mut zoom = Zoom::default();
        let expected = [0.9, 1.15, 1.4, 1.65, 1.9];
        for target in expected {
            assert!(close(zoom.step_in(), target));
        }
    }

    #[test]
    fn zoom_clamps_at_both_ends() {
        let mut zoom = Zoom::new(2.9);
        assert!(close(zoom.step_in(), MAX_ZOOM));
        assert!(close(zoom.step_in(), MAX_ZOOM));

        let mut zoom = Zoom::new(0.3);
        assert!(close(zoom.step_out(), MIN_ZOOM));
        assert!(close(zoom.step_out(), MIN_ZOOM));
    }

    #[test]
    fn zoom_reset_restores_default_regardless_of_state() {
        let mut zoom = Zoom::new(3.0);
        assert!(close(zoom.reset(), DEFAULT_ZOOM));

        let mut zoom = Zoom::new(0.25);
        assert!(close(zoom.reset(), DEFAULT_ZOOM));
    }

    #[test]
    fn zoom_rejects_non_finite_factors() {
        assert!(close(Zoom::new(f32::NAN).factor(), DEFAULT_ZOOM));
        assert!(close(Zoom::new(f32::INFINITY).factor(), DEFAULT_ZOOM));
    }

    /// Stub source: paints a page-numbered 1x1-per-page image after a delay
    /// proportional to the page number, so interleavings are deterministic
    /// under paused time.
    struct SlowSource {
        page_count: u32,
    }

    #[async_trait]
    impl PageSource for SlowSource {
        fn page_count(&self) -> u32 {
            self.page_count
        }

        fn page_size(&self, _page_number: u32) -> Result<PageDimensions, PreviewError> {
            Ok(PageDimensions {
                width: 100.0,
                height: 100.0,
            })
        }

        async fn paint_page(
            &self,
            page_number: u32,
            _scale: f32,
            cancel: &CancelToken,
        ) -> PaintOutcome {
            if cancel.is_cancelled() {
                return PaintOutcome::Cancelled;
            }
            tokio::time::sleep(Duration::from_millis(u64::from(page_number) * 10)).await;
            PaintOutcome::Completed(RenderImage {
                width: page_number,
                height: 1,
                pixels: vec![0; (page_number * 4) as usize],
            })
        }
    }

    fn session(page_count: u32) -> DocumentSession {
        DocumentSession {
            source: Arc::new(SlowSource { page_count }),
            page_count,
            handle_url: "memory://test".into(),
        }
    }

    #[tokio::test]
    async fn paints_page_at_fit_scale_when_zoom_is_smaller() {
        let coordinator = RenderCoordinator::new(Viewport::new(200.0, 400.0), 1.0);
        let outcome = coordinator
            .render_page(&session(10), 3, DEFAULT_ZOOM)
            .await
            .unwrap();
        // Fit scale is min(200/100, 400/100) = 2.0, above the requested 0.65.
        assert_eq!(
            outcome,
            RenderOutcome::Painted {
                page_number: 3,
                scale: 2.0
            }
        );

        let snapshot = coordinator.snapshot().unwrap();
        assert!(close(snapshot.logical_width, 200.0));
        assert!(close(snapshot.logical_height, 200.0));
    }

    #[tokio::test]
    async fn requested_zoom_wins_over_a_smaller_fit() {
        let coordinator = RenderCoordinator::new(Viewport::new(50.0, 50.0), 1.0);
        let outcome = coordinator.render_page(&session(10), 1, 1.5).await.unwrap();
        // Fit would be 0.5; the chosen zoom keeps the page readable and the
        // surface overflows the viewport.
        assert_eq!(
            outcome,
            RenderOutcome::Painted {
                page_number: 1,
                scale: 1.5
            }
        );
        let snapshot = coordinator.snapshot().unwrap();
        assert!(close(snapshot.logical_width, 150.0));
    }

    #[tokio::test(start_paused = true)]
    async fn superseding_paint_cancels_the_pending_one() {
        let coordinator = RenderCoordinator::new(Viewport::new(10.0, 10.0), 1.0);
        let session = session(10);

        let (first, second) = tokio::join!(
            coordinator.render_page(&session, 5, DEFAULT_ZOOM),
            coordinator.render_page(&session, 7, DEFAULT_ZOOM),
        );

        assert_eq!(first.unwrap(), RenderOutcome::Cancelled);
        assert!(matches!(
            second.unwrap(),
            RenderOutcome::Painted { page_number: 7, .. }
        ));
        // Only the last-requested page reaches the surface.
        assert_eq!(coordinator.snapshot().unwrap().image.width, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_page_changes_leave_only_the_last_page_painted() {
        let coordinator = RenderCoordinator::new(Viewport::new(10.0, 10.0), 1.0);
        let session = session(10);

        let (a, b, c) = tokio::join!(
            coordinator.render_page(&session, 2, DEFAULT_ZOOM),
            coordinator.render_page(&session, 4, DEFAULT_ZOOM),
            coordinator.render_page(&session, 6, DEFAULT_ZOOM),
        );

        // Earlier attempts end cancelled, never failed.
        assert_eq!(a.unwrap(), RenderOutcome::Cancelled);
        assert_eq!(b.unwrap(), RenderOutcome::Cancelled);
        assert!(matches!(
            c.unwrap(),
            RenderOutcome::Painted { page_number: 6, .. }
        ));
        assert_eq!(coordinator.snapshot().unwrap().image.width, 6);
    }

    #[tokio::test]
    async fn out_of_range_page_leaves_surface_untouched() {
        let coordinator = RenderCoordinator::new(Viewport::new(10.0, 10.0), 1.0);
        let session = session(10);

        coordinator
            .render_page(&session, 3, DEFAULT_ZOOM)
            .await
            .unwrap();
        let before = coordinator.snapshot().unwrap();

        let err = coordinator
            .render_page(&session, 99, DEFAULT_ZOOM)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PreviewError::PageOutOfRange {
                page_number: 99,
                page_count: 10
            }
        ));

        let after = coordinator.snapshot().unwrap();
        assert_eq!(after.image, before.image);
    }

    #[tokio::test]
    async fn device_pixel_ratio_scales_the_paint_but_not_the_display_size() {
        struct ScaleProbe {
            seen: Mutex<Vec<f32>>,
        }

        #[async_trait]
        impl PageSource for ScaleProbe {
            fn page_count(&self) -> u32 {
                1
            }

            fn page_size(&self, _page_number: u32) -> Result<PageDimensions, PreviewError> {
                Ok(PageDimensions {
                    width: 100.0,
                    height: 100.0,
                })
            }

            async fn paint_page(
                &self,
                _page_number: u32,
                scale: f32,
                _cancel: &CancelToken,
            ) -> PaintOutcome {
                self.seen.lock().push(scale);
                PaintOutcome::Completed(RenderImage {
                    width: (100.0 * scale) as u32,
                    height: (100.0 * scale) as u32,
                    pixels: Vec::new(),
                })
            }
        }

        let probe = Arc::new(ScaleProbe {
            seen: Mutex::new(Vec::new()),
        });
        let session = DocumentSession {
            source: probe.clone(),
            page_count: 1,
            handle_url: "memory://test".into(),
        };

        let coordinator = RenderCoordinator::new(Viewport::new(100.0, 100.0), 2.0);
        coordinator.render_page(&session, 1, 1.0).await.unwrap();

        // Effective scale 1.0, painted at 2.0 for the high-density buffer.
        assert!(close(probe.seen.lock()[0], 2.0));
        let snapshot = coordinator.snapshot().unwrap();
        assert_eq!(snapshot.image.width, 200);
        assert!(close(snapshot.logical_width, 100.0));
    }

    #[tokio::test]
    async fn failed_paint_surfaces_the_page_number() {
        struct FailingSource;

        #[async_trait]
        impl PageSource for FailingSource {
            fn page_count(&self) -> u32 {
                5
            }

            fn page_size(&self, _page_number: u32) -> Result<PageDimensions, PreviewError> {
                Ok(PageDimensions {
                    width: 100.0,
                    height: 100.0,
                })
            }

            async fn paint_page(
                &self,
                _page_number: u32,
                _scale: f32,
                _cancel: &CancelToken,
            ) -> PaintOutcome {
                PaintOutcome::Failed("bitmap allocation failed".into())
            }
        }

        let session = DocumentSession {
            source: Arc::new(FailingSource),
            page_count: 5,
            handle_url: "memory://test".into(),
        };
        let coordinator = RenderCoordinator::new(Viewport::default(), 1.0);

        let err = coordinator
            .render_page(&session, 2, DEFAULT_ZOOM)
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::Render { page_number: 2, .. }));
    }
}
