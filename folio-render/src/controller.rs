use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use folio_core::{
    hit_test, overlay_marks, same_scale, Annotation, AnnotationKind, CommitOutcome,
    DocumentHandle, DocumentSource, EventQueue, FitWidthCalculator, OverlayMark, PageNumber,
    Point, PointerContext, PointerDown, RangeSnapshot, Rect, SelectionCommit, SelectionEngine,
    VerticalSpan, ViewerConfig, ViewerError, ViewerEvent, ViewerResult, ZoomMode,
};
use tracing::{debug, info, instrument};

use crate::canvas::PageRenderManager;
use crate::context::{RenderContext, ViewParams};
use crate::retry::Dispatcher;
use crate::state::Layer;
use crate::surface::SurfaceTable;
use crate::text_layer::{TextLayer, TextLayerManager};
use crate::visibility::{plan_visibility, PageLayout, VisibilityPlan};

/// Scroll container geometry reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportMetrics {
    pub scroll_top: f32,
    pub width: f32,
    pub height: f32,
}

/// Orchestrates which pages get rasterized and which get a text layer.
///
/// All methods that dispatch work spawn Tokio tasks and must be called from
/// within a runtime.
pub struct ViewportController {
    ctx: Arc<RenderContext>,
    dispatcher: Arc<Dispatcher>,
    layout: PageLayout,
    config: ViewerConfig,
    events: EventQueue,
    surfaces: SurfaceTable,
    selection: SelectionEngine,
    fit: FitWidthCalculator,
    annotations: Vec<Annotation>,
    metrics: ViewportMetrics,
    current_page: PageNumber,
    zoom_mode: ZoomMode,
    frame_requested: bool,
    reported_page: Option<PageNumber>,
}

impl ViewportController {
    /// Decodes `bytes` and prepares the page layout. A decode failure is the
    /// only document-level error.
    #[instrument(skip_all, fields(bytes = bytes.len()))]
    pub async fn open(
        source: &dyn DocumentSource,
        bytes: Vec<u8>,
        config: ViewerConfig,
        events: EventQueue,
    ) -> ViewerResult<Self> {
        let (document, layout) = load_document(source, bytes, &config).await?;
        let surfaces = SurfaceTable::new();
        let view = ViewParams {
            scale: config.clamp_scale(1.0),
            device_pixel_ratio: 1.0,
            erase_mode: false,
        };
        let ctx = Arc::new(RenderContext::new(
            document,
            config.clone(),
            surfaces.clone(),
            1,
            view,
        ));
        let page_count = layout.page_count();
        info!(page_count, "document opened");
        events.push(ViewerEvent::DocumentLoaded { page_count });

        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(Arc::clone(&ctx))),
            ctx,
            layout,
            selection: SelectionEngine::new(config.selection.clone()),
            fit: FitWidthCalculator::new(&config),
            config,
            events,
            surfaces,
            annotations: Vec::new(),
            metrics: ViewportMetrics::default(),
            current_page: 1,
            zoom_mode: ZoomMode::Manual,
            frame_requested: false,
            reported_page: None,
        })
    }

    /// Swaps in a new document. On failure the current document stays.
    pub async fn replace_document(
        &mut self,
        source: &dyn DocumentSource,
        bytes: Vec<u8>,
    ) -> ViewerResult<()> {
        let (document, layout) = load_document(source, bytes, &self.config).await?;
        let view = self.ctx.view();
        let generation = self.ctx.shutdown() + 1;
        self.ctx.document.destroy();
        self.surfaces.clear_all();
        self.surfaces.retain(layout.page_count());

        self.ctx = Arc::new(RenderContext::new(
            document,
            self.config.clone(),
            self.surfaces.clone(),
            generation,
            view,
        ));
        self.dispatcher = Arc::new(Dispatcher::new(Arc::clone(&self.ctx)));
        self.layout = layout;
        self.annotations.clear();
        self.current_page = 1;
        self.reported_page = None;
        self.metrics.scroll_top = 0.0;
        self.clear_selection();

        let page_count = self.layout.page_count();
        info!(page_count, generation, "document replaced");
        self.events.push(ViewerEvent::DocumentLoaded { page_count });
        self.run_visibility_pass();
        Ok(())
    }

    pub fn events(&self) -> EventQueue {
        self.events.clone()
    }

    pub fn surfaces(&self) -> SurfaceTable {
        self.surfaces.clone()
    }

    pub fn page_count(&self) -> usize {
        self.layout.page_count()
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn generation(&self) -> u64 {
        self.ctx.generation()
    }

    pub fn scale(&self) -> f32 {
        self.ctx.scale()
    }

    pub fn metrics(&self) -> ViewportMetrics {
        self.metrics
    }

    pub fn zoom_mode(&self) -> ZoomMode {
        self.zoom_mode
    }

    pub fn erase_mode(&self) -> bool {
        self.ctx.erase_mode()
    }

    pub fn selection(&self) -> &SelectionEngine {
        &self.selection
    }

    pub fn canvas(&self) -> &PageRenderManager {
        &self.dispatcher.canvas
    }

    pub fn text(&self) -> &TextLayerManager {
        &self.dispatcher.text
    }

    /// The page's text layer, only when it is ready to be trusted.
    pub fn text_layer(&self, page: PageNumber) -> Option<TextLayer> {
        self.ctx.text_layer(page)
    }

    /// Pages that currently hold render state.
    pub fn tracked_pages(&self) -> Vec<PageNumber> {
        self.ctx.tracked_pages()
    }

    /// Page box in container coordinates at the current scale.
    pub fn client_box(&self, page: PageNumber) -> Option<Rect> {
        self.layout
            .page_box(page, self.ctx.scale(), self.metrics.width)
            .map(|rect| rect.translated(0.0, -self.metrics.scroll_top))
    }

    /// Resolves a container point to a page and a page-local point.
    pub fn locate(&self, client: Point) -> Option<(PageNumber, Point)> {
        let y = client.y + self.metrics.scroll_top;
        self.layout
            .boxes(self.ctx.scale(), self.metrics.width)
            .iter()
            .enumerate()
            .find(|(_, rect)| rect.contains(Point::new(client.x, y), 0.0))
            .map(|(index, rect)| (index + 1, Point::new(client.x - rect.left, y - rect.top)))
    }

    pub fn on_scroll(&mut self, scroll_top: f32) {
        self.metrics.scroll_top = scroll_top.max(0.0);
        self.frame_requested = true;
    }

    pub fn on_resize(&mut self, width: f32, height: f32) {
        let width_changed = (self.metrics.width - width).abs() > f32::EPSILON;
        self.metrics.width = width;
        self.metrics.height = height;
        self.frame_requested = true;
        if width_changed && self.zoom_mode == ZoomMode::FitWidth {
            self.publish_fit_width();
        }
    }

    /// Runs at most one visibility pass for all scroll/resize ticks since the
    /// previous frame.
    pub fn on_animation_frame(&mut self) -> Option<VisibilityPlan> {
        if !std::mem::take(&mut self.frame_requested) {
            return None;
        }
        self.run_visibility_pass()
    }

    pub fn set_scale(&mut self, scale: f32) {
        let scale = self.config.clamp_scale(scale);
        if same_scale(scale, self.ctx.scale()) {
            return;
        }
        let generation = self.ctx.set_scale(scale);
        debug!(scale, generation, "scale changed");
        self.clear_selection();
        self.run_visibility_pass();
    }

    pub fn set_device_pixel_ratio(&mut self, ratio: f32) {
        if !(ratio > 0.0) || (ratio - self.ctx.view().device_pixel_ratio).abs() <= f32::EPSILON {
            return;
        }
        self.ctx.set_device_pixel_ratio(ratio);
        self.run_visibility_pass();
    }

    pub fn set_current_page(&mut self, page: PageNumber) {
        let page = page.clamp(1, self.page_count().max(1));
        if page == self.current_page {
            return;
        }
        self.current_page = page;
        self.run_visibility_pass();
    }

    /// Jumps the viewport to the top of `page`.
    pub fn scroll_to_page(&mut self, page: PageNumber) {
        let page = page.clamp(1, self.page_count().max(1));
        if let Some(rect) = self.layout.page_box(page, self.ctx.scale(), self.metrics.width) {
            self.metrics.scroll_top = (rect.top - self.config.page_gap).max(0.0);
        }
        self.current_page = page;
        self.run_visibility_pass();
    }

    pub fn set_zoom_mode(&mut self, mode: ZoomMode) {
        let previous = std::mem::replace(&mut self.zoom_mode, mode);
        if mode == ZoomMode::FitWidth && previous != ZoomMode::FitWidth {
            self.fit.reset();
            self.publish_fit_width();
        }
    }

    pub fn set_erase_mode(&mut self, enabled: bool) {
        if enabled == self.ctx.erase_mode() {
            return;
        }
        self.ctx.set_erase_mode(enabled);
        if enabled {
            self.clear_selection();
        }
        debug!(enabled, "erase mode");
        self.run_visibility_pass();
    }

    pub fn set_annotations(&mut self, annotations: Vec<Annotation>) {
        self.annotations = annotations;
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Annotation geometry to paint over `page` at the current scale.
    pub fn overlay(&self, page: PageNumber) -> Vec<OverlayMark> {
        overlay_marks(&self.annotations, page, self.ctx.scale())
    }

    /// `point` is page-local, in current-scale pixels.
    pub fn hit_test(&self, page: PageNumber, point: Point) -> Option<&Annotation> {
        hit_test(&self.annotations, page, point, self.ctx.scale())
    }

    /// Reports a click on an annotation to the host.
    pub fn click(&mut self, client: Point) -> Option<Annotation> {
        let (page, page_point) = self.locate(client)?;
        let annotation = self.hit_test(page, page_point)?.clone();
        self.events.push(ViewerEvent::AnnotationClicked {
            annotation: annotation.clone(),
            pointer: PointerContext {
                page_point,
                client_point: client,
            },
        });
        Some(annotation)
    }

    pub fn pointer_down(&mut self, client: Point) -> PointerDown {
        if self.ctx.erase_mode() {
            return PointerDown::Ignored;
        }
        let had_selection = self.selection.committed().is_some();
        let page = self.locate(client).map(|(page, _)| page);
        let ready = page.map_or(false, |page| self.ctx.text_layer_ready(page));
        let outcome = self.selection.pointer_down(page, ready);
        if had_selection {
            self.events.push(ViewerEvent::SelectionCleared);
        }
        if let PointerDown::Suppressed { build_page } = outcome {
            debug!(page = build_page, "selection suppressed until text layer is ready");
            self.dispatcher
                .dispatch(build_page, Layer::Text, self.ctx.generation());
        }
        outcome
    }

    pub fn pointer_up(&mut self, now: Instant) {
        self.selection.pointer_up(now);
    }

    pub fn selection_changed(&mut self, now: Instant) {
        if !self.ctx.erase_mode() {
            self.selection.selection_changed(now);
        }
    }

    pub fn selection_due(&self, now: Instant) -> bool {
        self.selection.is_due(now)
    }

    /// Settles a pending selection from the host's current range. A range
    /// spanning two pages is rejected whatever their readiness; otherwise a
    /// page whose text layer is not ready counts as missed.
    pub fn commit_selection(&mut self, range: &RangeSnapshot) -> CommitOutcome {
        let spans_pages = matches!(
            (range.start_page, range.end_page),
            (Some(start), Some(end)) if start != end
        );
        let range = if spans_pages {
            range.clone()
        } else {
            let owner = range
                .start_page
                .or(range.end_page)
                .filter(|page| self.ctx.text_layer_ready(*page));
            RangeSnapshot {
                start_page: owner,
                end_page: owner,
                ..range.clone()
            }
        };
        let page_box = range
            .start_page
            .or(range.end_page)
            .and_then(|page| self.client_box(page))
            .unwrap_or_default();

        let outcome = self.selection.commit(&range, page_box, self.ctx.scale());
        match &outcome {
            CommitOutcome::Committed(commit) => {
                debug!(page = commit.page, rects = commit.rects.len(), "selection committed");
                self.events
                    .push(ViewerEvent::SelectionCommitted(commit.clone()));
            }
            CommitOutcome::Rejected(reason) => {
                debug!(?reason, "selection rejected");
                self.events.push(ViewerEvent::SelectionCleared);
                self.frame_requested = true;
            }
            CommitOutcome::Unchanged | CommitOutcome::Idle => {}
        }
        outcome
    }

    pub fn close_selection(&mut self) {
        self.clear_selection();
        self.frame_requested = true;
    }

    /// Turns the committed selection into a highlight or underline request.
    pub fn annotate_selection(&mut self, kind: AnnotationKind, color: &str) -> Option<SelectionCommit> {
        let commit = self.selection.take_committed()?;
        let event = match kind {
            AnnotationKind::Highlight => ViewerEvent::AddHighlight {
                page: commit.page,
                text: commit.text.clone(),
                color: color.to_owned(),
                rects: commit.rects.clone(),
            },
            AnnotationKind::Underline => ViewerEvent::AddUnderline {
                page: commit.page,
                text: commit.text.clone(),
                color: color.to_owned(),
                rects: commit.rects.clone(),
            },
        };
        self.events.push(event);
        self.events.push(ViewerEvent::SelectionCleared);
        self.frame_requested = true;
        Some(commit)
    }

    /// Decides and dispatches canvas and text-layer work for the current
    /// viewport. Hosts normally reach this through [`Self::on_animation_frame`].
    pub fn run_visibility_pass(&mut self) -> Option<VisibilityPlan> {
        let page_count = self.layout.page_count();
        if page_count == 0 || !(self.metrics.height > 0.0) {
            return None;
        }

        let scale = self.ctx.scale();
        let boxes = self.layout.boxes(scale, self.metrics.width);
        let viewport = VerticalSpan::new(
            self.metrics.scroll_top,
            self.metrics.scroll_top + self.metrics.height,
        );
        let locked = self.selection.is_locked();
        let locked_page = self.selection.locked_page();

        let mut forced: Vec<PageNumber> = locked_page.into_iter().collect();
        if (1..=page_count).contains(&self.current_page) && !forced.contains(&self.current_page) {
            forced.push(self.current_page);
        }
        let plan = plan_visibility(&boxes, viewport, &self.config, &forced);

        if !locked {
            let keep_canvas: HashSet<PageNumber> = plan.canvas_targets.iter().copied().collect();
            let keep_text: HashSet<PageNumber> = plan.text_targets.iter().copied().collect();
            self.ctx.prune(&keep_canvas, &keep_text);
        }

        let generation = self.ctx.generation();
        for &page in &plan.canvas_targets {
            if self.ctx.needs_work(page, Layer::Canvas) {
                self.dispatcher.dispatch(page, Layer::Canvas, generation);
            }
        }
        if !self.ctx.erase_mode() {
            for &page in &plan.text_targets {
                if locked && Some(page) != locked_page {
                    continue;
                }
                if self.ctx.needs_work(page, Layer::Text) {
                    self.dispatcher.dispatch(page, Layer::Text, generation);
                }
            }
        }

        if let Some(page) = PageLayout::page_at(&boxes, viewport.center()) {
            if self.reported_page != Some(page) {
                self.reported_page = Some(page);
                self.events.push(ViewerEvent::PageChanged(page));
            }
        }

        debug!(
            generation,
            canvas = plan.canvas_targets.len(),
            text = plan.text_targets.len(),
            locked,
            "visibility pass"
        );
        Some(plan)
    }

    fn clear_selection(&mut self) {
        if self.selection.is_locked() {
            self.events.push(ViewerEvent::SelectionCleared);
        }
        self.selection.reset();
    }

    fn publish_fit_width(&mut self) {
        let Some(base) = self
            .layout
            .base_size(self.current_page)
            .or_else(|| self.layout.base_size(1))
        else {
            return;
        };
        if let Some(scale) =
            self.fit
                .on_container_width(self.metrics.width, base.width, self.ctx.scale())
        {
            debug!(scale, width = self.metrics.width, "fit-width scale");
            self.events.push(ViewerEvent::FitWidthScaleCalculated(scale));
        }
    }
}

impl Drop for ViewportController {
    fn drop(&mut self) {
        self.ctx.shutdown();
        self.ctx.document.destroy();
    }
}

async fn load_document(
    source: &dyn DocumentSource,
    bytes: Vec<u8>,
    config: &ViewerConfig,
) -> ViewerResult<(Arc<dyn DocumentHandle>, PageLayout)> {
    let document = source
        .open(bytes)
        .await
        .map_err(|err| ViewerError::Decode(format!("{err:#}")))?;

    let mut sizes = Vec::with_capacity(document.page_count());
    for page in 1..=document.page_count() {
        match document.page(page).await {
            Ok(handle) => sizes.push(handle.viewport(1.0)),
            Err(err) => {
                document.destroy();
                return Err(ViewerError::Decode(format!(
                    "failed to read page {page}: {err:#}"
                )));
            }
        }
    }
    Ok((document, PageLayout::new(sizes, config.page_gap)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use folio_core::{NewAnnotation, PageSize, RejectReason};

    use super::*;
    use crate::testing::{settle, FakeSource, Probe};

    const PDF: &[u8] = b"%PDF-1.7\n";

    async fn open_with(source: &FakeSource) -> ViewportController {
        let mut controller = match ViewportController::open(
            source,
            PDF.to_vec(),
            ViewerConfig::default(),
            EventQueue::new(),
        )
        .await
        {
            Ok(controller) => controller,
            Err(err) => panic!("open failed: {err}"),
        };
        controller.surfaces().mount_range(1..=source.pages);
        controller.on_resize(800.0, 600.0);
        controller
    }

    async fn open(pages: usize) -> (ViewportController, Arc<Probe>) {
        let source = FakeSource::new(pages);
        let controller = open_with(&source).await;
        (controller, Arc::clone(&source.probe))
    }

    fn selection_range(controller: &ViewportController, page: PageNumber) -> RangeSnapshot {
        let layer = controller.text_layer(page).expect("text layer ready");
        let origin = controller.client_box(page).expect("page box");
        layer.range(0, 1, Point::new(origin.left, origin.top))
    }

    #[tokio::test(start_paused = true)]
    async fn open_reports_page_count() {
        let (controller, _probe) = open(4).await;
        assert_eq!(controller.page_count(), 4);
        assert_eq!(controller.generation(), 1);
        assert_eq!(
            controller.events().drain(),
            vec![ViewerEvent::DocumentLoaded { page_count: 4 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn decode_failure_is_reported_without_rendering() {
        let source = FakeSource::new(3);
        let result = ViewportController::open(
            &source,
            b"not a pdf".to_vec(),
            ViewerConfig::default(),
            EventQueue::new(),
        )
        .await;
        match result {
            Err(ViewerError::Decode(reason)) => assert!(reason.contains("%PDF")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("garbage bytes must not open"),
        }
        assert!(source.probe.renders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn frames_coalesce_scroll_ticks() {
        let (mut controller, probe) = open(10).await;
        controller.on_scroll(10.0);
        controller.on_scroll(20.0);
        assert!(controller.on_animation_frame().is_some());
        assert!(controller.on_animation_frame().is_none());
        settle().await;
        assert_eq!(probe.render_count(1), 1);
        assert_eq!(controller.canvas().cached_scale(1), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn jump_renders_target_page_first() {
        let (mut controller, probe) = open(50).await;
        controller.scroll_to_page(30);
        settle().await;

        let renders = probe.renders();
        assert_eq!(renders.first(), Some(&30));
        assert_eq!(probe.render_count(1), 0);
        assert!(controller.text_layer(30).is_some());
        assert!(controller
            .events()
            .drain()
            .contains(&ViewerEvent::PageChanged(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn host_current_page_is_realized_without_scrolling() {
        let (mut controller, probe) = open(50).await;
        controller.set_current_page(40);
        settle().await;

        assert_eq!(controller.metrics().scroll_top, 0.0);
        assert_eq!(probe.render_count(40), 1);
        assert_eq!(probe.render_count(1), 1);
        assert!(controller.text_layer(40).is_some());
        assert!(!controller
            .events()
            .drain()
            .contains(&ViewerEvent::PageChanged(40)));
    }

    #[tokio::test(start_paused = true)]
    async fn far_pages_are_pruned_and_evicted() {
        let (mut controller, probe) = open(50).await;
        controller.on_animation_frame();
        settle().await;
        assert_eq!(controller.canvas().cached_scale(1), Some(1.0));

        controller.scroll_to_page(30);
        settle().await;
        let plan = controller.run_visibility_pass().expect("plan");

        let surface = controller.surfaces().get(1).expect("mounted");
        assert!(surface.lock().is_blank());
        assert!(!controller.tracked_pages().contains(&1));
        assert!(controller
            .tracked_pages()
            .iter()
            .all(|page| plan.canvas_targets.contains(page)));
        assert_eq!(probe.render_count(30), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_scale_changes_settle_on_the_last_one() {
        let (mut controller, _probe) = open(10).await;
        controller.on_animation_frame();
        settle().await;

        controller.set_scale(1.5);
        controller.set_scale(2.0);
        settle().await;
        let plan = controller.run_visibility_pass().expect("plan");

        assert_eq!(controller.generation(), 3);
        for page in &plan.canvas_targets {
            assert_eq!(controller.canvas().cached_scale(*page), Some(2.0));
            let surface = controller.surfaces().get(*page).expect("mounted");
            assert_eq!(surface.lock().logical_size(), PageSize::new(1200.0, 1600.0));
        }
        for page in controller.tracked_pages() {
            let scale = controller.canvas().cached_scale(page);
            assert!(scale.is_none() || scale == Some(2.0));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn erase_mode_drops_text_layers_and_blocks_builds() {
        let (mut controller, probe) = open(10).await;
        controller.scroll_to_page(5);
        settle().await;
        assert!(controller.text_layer(5).is_some());
        let builds = probe.text_count(5);
        let all_builds = probe.text_builds().len();

        controller.set_erase_mode(true);
        settle().await;
        assert!(controller.text_layer(5).is_none());
        let client = controller.client_box(5).expect("box");
        assert_eq!(
            controller.pointer_down(Point::new(client.left + 10.0, client.top + 10.0)),
            PointerDown::Ignored
        );
        controller.on_scroll(controller.metrics().scroll_top + 5.0);
        controller.on_animation_frame();
        settle().await;
        assert_eq!(probe.text_count(5), builds);
        assert_eq!(probe.text_builds().len(), all_builds);
        assert!(controller.canvas().cached_scale(5).is_some());

        controller.set_erase_mode(false);
        settle().await;
        assert!(controller.text_layer(5).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_page_backs_off_then_retries_after_eviction() {
        let (mut controller, probe) = open(50).await;
        probe.fail(1);
        controller.on_animation_frame();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(probe.render_count(1), 5);

        controller.on_scroll(4.0);
        controller.on_animation_frame();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(probe.render_count(1), 5);
        assert_eq!(controller.canvas().cached_scale(2), Some(1.0));

        controller.scroll_to_page(30);
        settle().await;
        assert!(!controller.tracked_pages().contains(&1));

        controller.scroll_to_page(1);
        settle().await;
        assert_eq!(probe.render_count(1), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn fit_width_publishes_once_per_change() {
        let mut source = FakeSource::new(3);
        source.size = PageSize::new(612.0, 792.0);
        let mut controller = open_with(&source).await;
        controller.on_resize(1000.0, 600.0);
        controller.events().drain();

        controller.set_zoom_mode(ZoomMode::FitWidth);
        controller.on_resize(1000.4, 600.0);
        controller.on_resize(1000.0, 600.0);

        let published: Vec<f32> = controller
            .events()
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                ViewerEvent::FitWidthScaleCalculated(scale) => Some(scale),
                _ => None,
            })
            .collect();
        assert_eq!(published.len(), 1);
        assert!((published[0] - 920.0 / 612.0).abs() < 1e-4);
    }

    #[tokio::test(start_paused = true)]
    async fn pointer_down_on_unready_layer_builds_it() {
        let (mut controller, probe) = open(3).await;
        let client = controller.client_box(1).expect("box");
        let outcome = controller.pointer_down(Point::new(client.left + 20.0, client.top + 20.0));
        assert_eq!(outcome, PointerDown::Suppressed { build_page: 1 });

        settle().await;
        assert_eq!(probe.text_count(1), 1);
        assert!(controller.text().is_ready(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cross_page_selection_is_rejected() {
        let (mut controller, _probe) = open(5).await;
        controller.on_animation_frame();
        settle().await;
        controller.events().drain();

        let client = controller.client_box(1).expect("box");
        let down = Point::new(client.left + 60.0, client.top + 65.0);
        assert_eq!(controller.pointer_down(down), PointerDown::Started);
        let now = Instant::now();
        controller.pointer_up(now);
        assert!(!controller.selection_due(now));
        assert!(controller.selection_due(now + Duration::from_millis(20)));

        let mut range = selection_range(&controller, 1);
        range.end_page = Some(2);
        assert_eq!(
            controller.commit_selection(&range),
            CommitOutcome::Rejected(RejectReason::CrossPage)
        );
        let events = controller.events().drain();
        assert!(events.contains(&ViewerEvent::SelectionCleared));
        assert!(!events
            .iter()
            .any(|event| matches!(event, ViewerEvent::SelectionCommitted(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn range_into_unready_page_is_rejected() {
        let (mut controller, _probe) = open(50).await;
        controller.on_animation_frame();
        settle().await;
        controller.events().drain();
        assert!(!controller.text().is_ready(40));

        let client = controller.client_box(1).expect("box");
        controller.pointer_down(Point::new(client.left + 60.0, client.top + 65.0));
        controller.pointer_up(Instant::now());

        let mut range = selection_range(&controller, 1);
        range.end_page = Some(40);
        range.rects.push(Rect::new(client.left + 50.0, client.top + 876.0, 60.0, 12.0));
        assert_eq!(
            controller.commit_selection(&range),
            CommitOutcome::Rejected(RejectReason::CrossPage)
        );
        assert!(controller.selection().committed().is_none());
        assert!(!controller
            .events()
            .drain()
            .iter()
            .any(|event| matches!(event, ViewerEvent::SelectionCommitted(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn committed_selection_becomes_highlight_request() {
        let (mut controller, _probe) = open(5).await;
        controller.on_animation_frame();
        settle().await;
        controller.events().drain();

        let client = controller.client_box(1).expect("box");
        controller.pointer_down(Point::new(client.left + 60.0, client.top + 65.0));
        controller.pointer_up(Instant::now());
        let range = selection_range(&controller, 1);

        let CommitOutcome::Committed(commit) = controller.commit_selection(&range) else {
            panic!("selection should commit");
        };
        assert_eq!(commit.page, 1);
        assert_eq!(commit.text, "Lorem ipsum");
        assert_eq!(commit.rects[0], Rect::new(50.0, 60.0, 60.0, 12.0));
        assert_eq!(controller.selection().locked_page(), Some(1));

        controller.selection_changed(Instant::now());
        assert_eq!(controller.commit_selection(&range), CommitOutcome::Unchanged);

        controller.annotate_selection(AnnotationKind::Highlight, "#ffeb3b");
        let events = controller.events().drain();
        assert!(events.contains(&ViewerEvent::SelectionCommitted(commit.clone())));
        assert!(events.contains(&ViewerEvent::AddHighlight {
            page: 1,
            text: "Lorem ipsum".into(),
            color: "#ffeb3b".into(),
            rects: commit.rects.clone(),
        }));
        assert!(!controller.selection().is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn click_reports_annotation_under_pointer() {
        let (mut controller, _probe) = open(3).await;
        let annotation = Annotation::create(NewAnnotation {
            kind: AnnotationKind::Highlight,
            page: 1,
            text: "Lorem".into(),
            color: "#ffeb3b".into(),
            rects: vec![Rect::new(50.0, 60.0, 60.0, 12.0)],
        });
        controller.set_annotations(vec![annotation.clone()]);
        assert_eq!(controller.overlay(1).len(), 1);
        assert!(controller.overlay(2).is_empty());

        let client = controller.client_box(1).expect("box");
        let point = Point::new(client.left + 60.0, client.top + 64.0);
        assert_eq!(controller.click(point), Some(annotation.clone()));
        assert!(controller.events().drain().contains(&ViewerEvent::AnnotationClicked {
            annotation,
            pointer: PointerContext {
                page_point: Point::new(60.0, 64.0),
                client_point: point,
            },
        }));
        assert_eq!(
            controller.click(Point::new(client.left + 400.0, client.top + 400.0)),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reload_during_render_ignores_the_old_completion() {
        let old = FakeSource::new(5);
        let old_gate = old.probe.hold_renders();
        let mut controller = open_with(&old).await;
        controller.on_animation_frame();
        settle().await;
        assert_eq!(old.probe.render_count(1), 1);

        let mut fresh = FakeSource::new(3);
        fresh.size = PageSize::new(300.0, 400.0);
        let fresh_gate = fresh.probe.hold_renders();
        controller
            .replace_document(&fresh, PDF.to_vec())
            .await
            .expect("replacement opens");
        settle().await;
        assert_eq!(fresh.probe.render_count(1), 1);

        old_gate.add_permits(16);
        settle().await;
        let surface = controller.surfaces().get(1).expect("mounted");
        assert!(surface.lock().is_blank());
        assert_eq!(controller.canvas().cached_scale(1), None);

        fresh_gate.add_permits(16);
        settle().await;
        assert_eq!(controller.canvas().cached_scale(1), Some(1.0));
        assert!(!surface.lock().is_blank());
        assert_eq!(surface.lock().logical_size(), PageSize::new(300.0, 400.0));
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_document_destroys_the_old_one() {
        let (mut controller, old_probe) = open(5).await;
        controller.on_animation_frame();
        settle().await;
        let generation = controller.generation();

        let source = FakeSource::new(2);
        controller
            .replace_document(&source, PDF.to_vec())
            .await
            .expect("replacement opens");
        settle().await;

        assert!(old_probe.destroyed.load(Ordering::SeqCst));
        assert!(controller.generation() > generation);
        assert_eq!(controller.page_count(), 2);
        assert!(!controller.surfaces().is_mounted(5));
        assert_eq!(source.probe.render_count(1), 1);
    }
}
