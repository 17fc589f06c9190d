use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use folio_core::{
    AnnotationKind, AnnotationStore, DocumentKey, NewAnnotation, PageNumber, Point, PointerDown,
    RangeSnapshot, Rect, RenderImage, ViewerEvent, ZoomMode,
};
use folio_render::ViewportController;
use folio_tty::compose;
use folio_tty::{CellGeometry, PointerKind, UiEvent};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Quit,
}

/// Colours applied to new annotations.
#[derive(Debug, Clone)]
pub struct Palette {
    pub highlight: String,
    pub underline: String,
}

impl Palette {
    fn color(&self, kind: AnnotationKind) -> &str {
        match kind {
            AnnotationKind::Highlight => &self.highlight,
            AnnotationKind::Underline => &self.underline,
        }
    }
}

/// One end of a mouse selection: a page and a span of its text layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Caret {
    page: PageNumber,
    span: usize,
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    anchor: Option<Caret>,
    focus: Option<Caret>,
    origin: (u16, u16),
    moved: bool,
}

/// Visible state a frame depends on; the terminal is redrawn when it changes.
#[derive(Debug, Clone, PartialEq)]
struct FrameKey {
    scroll_top: f32,
    scale: f32,
    pages: Vec<(PageNumber, (u32, u32))>,
}

pub struct App {
    controller: ViewportController,
    store: Arc<dyn AnnotationStore>,
    document: DocumentKey,
    geometry: CellGeometry,
    palette: Palette,
    drag: Option<Drag>,
    message: Option<String>,
    current_page: PageNumber,
    dirty: bool,
    last_frame: Option<FrameKey>,
}

impl App {
    pub fn new(
        mut controller: ViewportController,
        store: Arc<dyn AnnotationStore>,
        document: DocumentKey,
        geometry: CellGeometry,
        palette: Palette,
    ) -> Result<Self> {
        controller.set_annotations(store.list(document)?);
        controller
            .surfaces()
            .mount_range(1..=controller.page_count());
        let (width, height) = geometry.viewport();
        controller.on_resize(width, height);
        Ok(Self {
            controller,
            store,
            document,
            geometry,
            palette,
            drag: None,
            message: None,
            current_page: 1,
            dirty: true,
            last_frame: None,
        })
    }

    pub fn geometry(&self) -> CellGeometry {
        self.geometry
    }

    pub fn goto_page(&mut self, page: PageNumber) {
        let page = page.clamp(1, self.controller.page_count().max(1));
        self.controller.scroll_to_page(page);
        self.dirty = true;
    }

    pub fn handle(&mut self, event: UiEvent) -> Result<LoopAction> {
        match event {
            UiEvent::ScrollLines { lines } => {
                self.scroll_by(lines as f32 * self.geometry.line_height());
            }
            UiEvent::ScrollPages { pages } => {
                let (_, height) = self.geometry.viewport();
                self.scroll_by(pages as f32 * height * 0.9);
            }
            UiEvent::GotoPage { page } => self.goto_page(page),
            UiEvent::ScaleBy { factor } => {
                self.controller.set_zoom_mode(ZoomMode::Manual);
                let scale = self.controller.scale() * factor;
                self.rescale(scale);
            }
            UiEvent::ResetScale => {
                self.controller.set_zoom_mode(ZoomMode::Manual);
                self.rescale(1.0);
            }
            UiEvent::ToggleFitWidth => {
                let mode = match self.controller.zoom_mode() {
                    ZoomMode::FitWidth => ZoomMode::Manual,
                    ZoomMode::Manual => ZoomMode::FitWidth,
                };
                self.controller.set_zoom_mode(mode);
                self.dirty = true;
            }
            UiEvent::ToggleEraseMode => {
                let enabled = !self.controller.erase_mode();
                self.controller.set_erase_mode(enabled);
                self.drag = None;
                self.message = Some(if enabled {
                    "erase mode: click an annotation to delete it".to_owned()
                } else {
                    "erase mode off".to_owned()
                });
                self.dirty = true;
            }
            UiEvent::Pointer { kind, column, row } => self.pointer(kind, column, row)?,
            UiEvent::Annotate(kind) => {
                let color = self.palette.color(kind).to_owned();
                if self.controller.annotate_selection(kind, &color).is_none() {
                    self.message = Some("select some text first".to_owned());
                }
                self.dirty = true;
            }
            UiEvent::Dismiss => {
                self.controller.close_selection();
                self.drag = None;
                self.message = None;
                self.dirty = true;
            }
            UiEvent::Resize { .. } => {
                // Pixel sizes come from a fresh window query in the main loop.
                self.dirty = true;
            }
            UiEvent::Quit => return Ok(LoopAction::Quit),
            UiEvent::None => {}
        }
        Ok(LoopAction::Continue)
    }

    pub fn resize(&mut self, geometry: CellGeometry) {
        if geometry == self.geometry {
            return;
        }
        self.geometry = geometry;
        let (width, height) = geometry.viewport();
        self.controller.on_resize(width, height);
        self.clamp_scroll();
        self.dirty = true;
    }

    /// Per-frame housekeeping: visibility pass, pending selection commit and
    /// event handling.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        self.controller.on_animation_frame();
        if self.controller.selection_due(now) {
            let range = self.selection_range();
            self.controller.commit_selection(&range);
            self.drag = None;
        }
        for event in self.controller.events().drain() {
            self.apply(event)?;
        }
        Ok(())
    }

    /// Whether the screen is stale, either from input or from renders that
    /// completed since the last draw.
    pub fn needs_redraw(&self) -> bool {
        self.dirty || self.last_frame.as_ref() != Some(&self.frame_key())
    }

    pub fn render(&mut self) -> RenderImage {
        let (width, height) = self.geometry.viewport();
        let mut image = compose::frame(width as u32, height as u32);
        let scale = self.controller.scale();

        for (page, rect) in self.visible_boxes() {
            if let Some(surface) = self.controller.surfaces().get(page) {
                let surface = surface.lock();
                if !surface.is_blank() {
                    compose::blit(
                        &mut image,
                        surface.image(),
                        rect.left.round() as i64,
                        rect.top.round() as i64,
                    );
                }
            }
            compose::paint_marks(&mut image, &self.controller.overlay(page), (rect.left, rect.top));
        }

        let selection: Vec<Rect> = match self.controller.selection().committed() {
            Some(commit) => self
                .controller
                .client_box(commit.page)
                .map(|page_box| {
                    commit
                        .rects
                        .iter()
                        .map(|rect| rect.scaled(scale).translated(page_box.left, page_box.top))
                        .collect()
                })
                .unwrap_or_default(),
            None => self.live_selection().rects,
        };
        compose::paint_selection(&mut image, &selection);

        self.last_frame = Some(self.frame_key());
        self.dirty = false;
        image
    }

    pub fn status(&self) -> String {
        let mut parts = vec![
            format!("{}/{}", self.current_page, self.controller.page_count()),
            format!("{:.0}%", self.controller.scale() * 100.0),
        ];
        if self.controller.zoom_mode() == ZoomMode::FitWidth {
            parts.push("fit".to_owned());
        }
        if self.controller.erase_mode() {
            parts.push("ERASE".to_owned());
        }
        if self.controller.selection().committed().is_some() {
            parts.push("h highlight, u underline, esc cancel".to_owned());
        }
        if let Some(message) = &self.message {
            parts.push(message.clone());
        }
        parts.join(" | ")
    }

    fn apply(&mut self, event: ViewerEvent) -> Result<()> {
        match event {
            ViewerEvent::DocumentLoaded { page_count } => {
                info!(page_count, "document loaded");
            }
            ViewerEvent::PageChanged(page) => {
                self.current_page = page;
                self.controller.set_current_page(page);
                self.dirty = true;
            }
            ViewerEvent::AddHighlight {
                page,
                text,
                color,
                rects,
            } => self.save(AnnotationKind::Highlight, page, text, color, rects)?,
            ViewerEvent::AddUnderline {
                page,
                text,
                color,
                rects,
            } => self.save(AnnotationKind::Underline, page, text, color, rects)?,
            ViewerEvent::AnnotationClicked { annotation, .. } => {
                let mut message = format!("\u{201c}{}\u{201d}", annotation.selected_text);
                if let Some(comment) = &annotation.comment {
                    message.push_str(": ");
                    message.push_str(comment);
                }
                self.message = Some(message);
                self.dirty = true;
            }
            ViewerEvent::FitWidthScaleCalculated(scale) => {
                self.controller.set_scale(scale);
                self.clamp_scroll();
                self.dirty = true;
            }
            ViewerEvent::SelectionCommitted(_) | ViewerEvent::SelectionCleared => {
                self.dirty = true;
            }
        }
        Ok(())
    }

    fn save(
        &mut self,
        kind: AnnotationKind,
        page: PageNumber,
        text: String,
        color: String,
        rects: Vec<Rect>,
    ) -> Result<()> {
        let annotation = self.store.create(
            self.document,
            NewAnnotation {
                kind,
                page,
                text,
                color,
                rects,
            },
        )?;
        info!(id = %annotation.id, page, ?kind, "annotation saved");
        self.reload_annotations()?;
        self.message = Some(format!("saved on page {page}"));
        Ok(())
    }

    fn reload_annotations(&mut self) -> Result<()> {
        self.controller
            .set_annotations(self.store.list(self.document)?);
        self.dirty = true;
        Ok(())
    }

    fn pointer(&mut self, kind: PointerKind, column: u16, row: u16) -> Result<()> {
        let point = self.geometry.to_pixels(column, row);
        match kind {
            PointerKind::Down if self.controller.erase_mode() => {
                let hit = self
                    .controller
                    .locate(point)
                    .and_then(|(page, local)| self.controller.hit_test(page, local).cloned());
                if let Some(annotation) = hit {
                    self.store.delete(self.document, annotation.id)?;
                    info!(id = %annotation.id, "annotation deleted");
                    self.message = Some("annotation deleted".to_owned());
                    self.reload_annotations()?;
                }
            }
            PointerKind::Down => {
                self.message = None;
                match self.controller.pointer_down(point) {
                    PointerDown::Started => {
                        let caret = self.caret_at(point);
                        self.drag = Some(Drag {
                            anchor: caret,
                            focus: caret,
                            origin: (column, row),
                            moved: false,
                        });
                    }
                    PointerDown::Suppressed { build_page } => {
                        debug!(page = build_page, "text layer not ready");
                        self.drag = None;
                        self.message = Some(format!("preparing text on page {build_page}"));
                    }
                    PointerDown::Ignored => self.drag = None,
                }
                self.dirty = true;
            }
            PointerKind::Drag => {
                let caret = self.caret_at(point);
                if let Some(drag) = self.drag.as_mut() {
                    drag.moved |= drag.origin != (column, row);
                    if caret.is_some() {
                        drag.focus = caret;
                    }
                    self.dirty = true;
                }
            }
            PointerKind::Up => {
                let clicked = self.drag.map_or(true, |drag| !drag.moved);
                self.controller.pointer_up(Instant::now());
                if clicked {
                    self.controller.click(point);
                }
            }
        }
        Ok(())
    }

    fn caret_at(&self, point: Point) -> Option<Caret> {
        let (page, local) = self.controller.locate(point)?;
        let layer = self.controller.text_layer(page)?;
        let span = layer.span_at(local).or_else(|| layer.nearest_span(local))?;
        Some(Caret { page, span })
    }

    /// What the current drag covers, in the shape the selection engine
    /// expects. A drag that crosses pages reports both ends.
    fn selection_range(&self) -> RangeSnapshot {
        let Some(drag) = self.drag.filter(|drag| drag.moved) else {
            return RangeSnapshot::default();
        };
        match (drag.anchor, drag.focus) {
            (Some(anchor), Some(focus)) if anchor.page != focus.page => RangeSnapshot {
                start_page: Some(anchor.page.min(focus.page)),
                end_page: Some(anchor.page.max(focus.page)),
                ..RangeSnapshot::default()
            },
            (Some(_), Some(_)) => self.live_selection(),
            _ => RangeSnapshot::default(),
        }
    }

    fn live_selection(&self) -> RangeSnapshot {
        let Some(Drag {
            anchor: Some(anchor),
            focus: Some(focus),
            moved: true,
            ..
        }) = self.drag
        else {
            return RangeSnapshot::default();
        };
        if anchor.page != focus.page {
            return RangeSnapshot::default();
        }
        match (
            self.controller.text_layer(anchor.page),
            self.controller.client_box(anchor.page),
        ) {
            (Some(layer), Some(page_box)) => {
                layer.range(anchor.span, focus.span, Point::new(page_box.left, page_box.top))
            }
            _ => RangeSnapshot::default(),
        }
    }

    fn scroll_by(&mut self, delta: f32) {
        let metrics = self.controller.metrics();
        let target = clamp_scroll(
            metrics.scroll_top + delta,
            self.content_height(),
            metrics.height,
        );
        self.controller.on_scroll(target);
        self.dirty = true;
    }

    fn clamp_scroll(&mut self) {
        let metrics = self.controller.metrics();
        let clamped = clamp_scroll(metrics.scroll_top, self.content_height(), metrics.height);
        if (clamped - metrics.scroll_top).abs() > f32::EPSILON {
            self.controller.on_scroll(clamped);
        }
    }

    fn rescale(&mut self, scale: f32) {
        self.controller.set_scale(scale);
        self.clamp_scroll();
        self.dirty = true;
    }

    fn content_height(&self) -> f32 {
        self.controller
            .layout()
            .content_height(self.controller.scale())
    }

    /// Page boxes in frame coordinates that intersect the page area.
    fn visible_boxes(&self) -> Vec<(PageNumber, Rect)> {
        let metrics = self.controller.metrics();
        self.controller
            .layout()
            .boxes(self.controller.scale(), metrics.width)
            .into_iter()
            .enumerate()
            .map(|(index, rect)| (index + 1, rect.translated(0.0, -metrics.scroll_top)))
            .filter(|(_, rect)| rect.bottom() > 0.0 && rect.top < metrics.height)
            .collect()
    }

    fn frame_key(&self) -> FrameKey {
        let pages = self
            .visible_boxes()
            .into_iter()
            .map(|(page, _)| {
                let size = self
                    .controller
                    .surfaces()
                    .get(page)
                    .map(|surface| surface.lock().physical_size())
                    .unwrap_or_default();
                (page, size)
            })
            .collect();
        FrameKey {
            scroll_top: self.controller.metrics().scroll_top,
            scale: self.controller.scale(),
            pages,
        }
    }
}

fn clamp_scroll(target: f32, content_height: f32, viewport_height: f32) -> f32 {
    target.clamp(0.0, (content_height - viewport_height).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use folio_core::{
        document_key_for_path, DocumentHandle, DocumentSource, EventQueue, MemoryAnnotationStore,
        PageHandle, PageSize, RasterRequest, TextItem, ViewerConfig,
    };
    use std::path::Path;
    use std::time::Duration;

    struct BlankSource {
        pages: usize,
    }

    struct BlankDocument {
        pages: usize,
    }

    struct BlankPage {
        number: PageNumber,
    }

    #[async_trait]
    impl DocumentSource for BlankSource {
        async fn open(&self, _bytes: Vec<u8>) -> anyhow::Result<Arc<dyn DocumentHandle>> {
            Ok(Arc::new(BlankDocument { pages: self.pages }))
        }
    }

    #[async_trait]
    impl DocumentHandle for BlankDocument {
        fn page_count(&self) -> usize {
            self.pages
        }

        async fn page(&self, page: PageNumber) -> anyhow::Result<Arc<dyn PageHandle>> {
            Ok(Arc::new(BlankPage { number: page }))
        }

        fn destroy(&self) {}
    }

    #[async_trait]
    impl PageHandle for BlankPage {
        fn page_number(&self) -> PageNumber {
            self.number
        }

        fn viewport(&self, scale: f32) -> PageSize {
            PageSize::new(600.0 * scale, 800.0 * scale)
        }

        async fn render(&self, request: RasterRequest) -> anyhow::Result<RenderImage> {
            Ok(RenderImage::blank(request.width, request.height))
        }

        async fn text_content(&self) -> anyhow::Result<Vec<TextItem>> {
            Ok(Vec::new())
        }
    }

    async fn app(pages: usize) -> App {
        let controller = ViewportController::open(
            &BlankSource { pages },
            b"%PDF-1.7".to_vec(),
            ViewerConfig::default(),
            EventQueue::new(),
        )
        .await
        .expect("blank document opens");
        let geometry = CellGeometry {
            columns: 100,
            rows: 41,
            cell_width: 8.0,
            cell_height: 16.0,
        };
        App::new(
            controller,
            Arc::new(MemoryAnnotationStore::new()),
            document_key_for_path(Path::new("blank.pdf")),
            geometry,
            Palette {
                highlight: "#ffeb3b".into(),
                underline: "#e53935".into(),
            },
        )
        .expect("app builds")
    }

    async fn settle() {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn scrolling_releases_the_previous_page() {
        let mut app = app(50).await;
        app.tick(Instant::now()).unwrap();
        settle().await;
        assert!(app.controller.tracked_pages().contains(&1));

        let top = app.controller.client_box(30).expect("page box").top;
        let lines = (top / app.geometry.line_height()).round() as i32;
        app.handle(UiEvent::ScrollLines { lines }).unwrap();
        app.tick(Instant::now()).unwrap();
        settle().await;

        assert_eq!(app.current_page, 30);
        assert!(!app.controller.tracked_pages().contains(&1));
        assert!(app.controller.tracked_pages().contains(&30));
    }

    #[test]
    fn scroll_is_clamped_to_content() {
        assert_eq!(clamp_scroll(-20.0, 5000.0, 600.0), 0.0);
        assert_eq!(clamp_scroll(300.0, 5000.0, 600.0), 300.0);
        assert_eq!(clamp_scroll(9000.0, 5000.0, 600.0), 4400.0);
        assert_eq!(clamp_scroll(50.0, 400.0, 600.0), 0.0);
    }

    #[test]
    fn palette_picks_colour_by_kind() {
        let palette = Palette {
            highlight: "#ffeb3b".into(),
            underline: "#e53935".into(),
        };
        assert_eq!(palette.color(AnnotationKind::Highlight), "#ffeb3b");
        assert_eq!(palette.color(AnnotationKind::Underline), "#e53935");
    }
}
