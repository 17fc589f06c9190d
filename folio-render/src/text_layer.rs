use std::sync::Arc;

use folio_core::{
    PageNumber, PageSize, Point, RangeSnapshot, Rect, TextItem, ViewerError, ViewerResult,
};
use tracing::{debug, warn};

use crate::context::RenderContext;
use crate::state::{join, Claim, Layer, Ticket};

/// A positioned run of selectable text, in current-scale page pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub rect: Rect,
}

/// The invisible text layer laid over a page's canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLayer {
    pub page: PageNumber,
    pub scale: f32,
    pub size: PageSize,
    pub spans: Vec<TextSpan>,
}

impl TextLayer {
    pub fn build(page: PageNumber, scale: f32, size: PageSize, items: &[TextItem]) -> Self {
        let spans = items
            .iter()
            .filter(|item| !item.text.is_empty() && !item.rect.is_empty())
            .map(|item| TextSpan {
                text: item.text.clone(),
                rect: item.rect.scaled(scale),
            })
            .collect();
        Self {
            page,
            scale,
            size,
            spans,
        }
    }

    /// Index of the span under `point` (page-local pixels).
    pub fn span_at(&self, point: Point) -> Option<usize> {
        self.spans
            .iter()
            .position(|span| span.rect.contains(point, 0.0))
    }

    /// Index of the span closest to `point`, for drags that leave the glyphs.
    pub fn nearest_span(&self, point: Point) -> Option<usize> {
        self.spans
            .iter()
            .enumerate()
            .map(|(index, span)| {
                let dx = (span.rect.left - point.x).max(point.x - span.rect.right()).max(0.0);
                let dy = (span.rect.top - point.y).max(point.y - span.rect.bottom()).max(0.0);
                (index, dx * dx + dy * dy)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(index, _)| index)
    }

    /// Snapshot of the spans between `anchor` and `focus` (inclusive, either
    /// order), with rects moved to container coordinates by `origin`.
    pub fn range(&self, anchor: usize, focus: usize, origin: Point) -> RangeSnapshot {
        if self.spans.is_empty() {
            return RangeSnapshot::default();
        }
        let last = self.spans.len() - 1;
        let (start, end) = if anchor <= focus {
            (anchor.min(last), focus.min(last))
        } else {
            (focus.min(last), anchor.min(last))
        };
        let selected = &self.spans[start..=end];
        let text = selected
            .iter()
            .map(|span| span.text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        RangeSnapshot {
            start_page: Some(self.page),
            end_page: Some(self.page),
            text,
            rects: selected
                .iter()
                .map(|span| span.rect.translated(origin.x, origin.y))
                .collect(),
        }
    }
}

pub struct TextLayerManager {
    ctx: Arc<RenderContext>,
}

impl TextLayerManager {
    pub(crate) fn new(ctx: Arc<RenderContext>) -> Self {
        Self { ctx }
    }

    /// Builds the text layer for `page` at the current scale unless it is
    /// already there or being built. Never builds in erase mode.
    pub async fn ensure_text_layer(&self, page: PageNumber, generation: u64) -> ViewerResult<()> {
        match self.ctx.claim(page, Layer::Text, generation) {
            Claim::Cached => Ok(()),
            Claim::Stale => Err(ViewerError::RenderCancelled),
            Claim::Join(done) => join(done).await,
            Claim::Owner(ticket) => {
                let outcome = self.build(&ticket).await;
                match &outcome {
                    Ok(()) => debug!(page, scale = ticket.scale, "text layer ready"),
                    Err(err) if err.is_retryable() => {
                        warn!(page, error = %err, "text layer build failed")
                    }
                    Err(_) => {}
                }
                self.ctx.finish(ticket, outcome.clone());
                outcome
            }
        }
    }

    pub fn is_ready(&self, page: PageNumber) -> bool {
        self.ctx.text_layer_ready(page)
    }

    async fn build(&self, ticket: &Ticket) -> ViewerResult<()> {
        let page = ticket.page;
        self.ctx.wait_for_surface(page, ticket.generation).await?;
        let handle = self
            .ctx
            .document
            .page(page)
            .await
            .map_err(|err| ViewerError::render_failed(page, &err))?;
        self.ctx.check(ticket)?;

        let size = handle.viewport(ticket.scale);
        let job = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.text_content().await })
        };
        if !self.ctx.attach_abort(ticket, job.abort_handle()) {
            return Err(ViewerError::RenderCancelled);
        }
        let items = match job.await {
            Ok(Ok(items)) => items,
            Ok(Err(err)) => return Err(ViewerError::render_failed(page, &err)),
            Err(err) if err.is_cancelled() => return Err(ViewerError::RenderCancelled),
            Err(err) => {
                return Err(ViewerError::RenderFailed {
                    page,
                    reason: err.to_string(),
                })
            }
        };

        let layer = TextLayer::build(page, ticket.scale, size, &items);
        self.ctx.present_text(ticket, layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, FakeSource};

    fn layer() -> TextLayer {
        TextLayer::build(
            1,
            2.0,
            PageSize::new(1200.0, 1600.0),
            &[
                TextItem::new("Hello", Rect::new(10.0, 10.0, 40.0, 10.0)),
                TextItem::new("", Rect::new(60.0, 10.0, 5.0, 10.0)),
                TextItem::new("world", Rect::new(55.0, 10.0, 40.0, 10.0)),
                TextItem::new("again ", Rect::new(10.0, 30.0, 50.0, 10.0)),
            ],
        )
    }

    #[test]
    fn build_scales_spans_and_skips_empty_text() {
        let layer = layer();
        assert_eq!(layer.spans.len(), 3);
        assert_eq!(layer.spans[1].rect, Rect::new(110.0, 20.0, 80.0, 20.0));
    }

    #[test]
    fn span_lookup_by_point() {
        let layer = layer();
        assert_eq!(layer.span_at(Point::new(30.0, 25.0)), Some(0));
        assert_eq!(layer.span_at(Point::new(500.0, 500.0)), None);
        assert_eq!(layer.nearest_span(Point::new(150.0, 45.0)), Some(1));
    }

    #[test]
    fn range_joins_text_and_offsets_rects() {
        let layer = layer();
        let range = layer.range(2, 0, Point::new(100.0, 1000.0));
        assert_eq!(range.text, "Hello world again");
        assert_eq!(range.start_page, Some(1));
        assert_eq!(range.rects.len(), 3);
        assert_eq!(range.rects[0], Rect::new(120.0, 1020.0, 80.0, 20.0));
    }

    #[tokio::test]
    async fn manager_builds_once_and_respects_erase_mode() {
        let source = FakeSource::new(2);
        let ctx = context(&source).await;
        let manager = TextLayerManager::new(Arc::clone(&ctx));

        manager.ensure_text_layer(1, 1).await.expect("builds");
        manager.ensure_text_layer(1, 1).await.expect("cached");
        assert_eq!(source.probe.text_count(1), 1);
        assert!(manager.is_ready(1));
        assert_eq!(ctx.text_layer(1).map(|layer| layer.spans.len()), Some(3));

        ctx.set_erase_mode(true);
        assert!(!manager.is_ready(1));
        assert_eq!(
            manager.ensure_text_layer(2, 1).await,
            Err(ViewerError::RenderCancelled)
        );
        assert_eq!(source.probe.text_count(2), 0);
    }

    #[tokio::test]
    async fn unmounted_page_times_out() {
        let source = FakeSource::new(2);
        let ctx = context(&source).await;
        ctx.surfaces.unmount(2);
        let manager = TextLayerManager::new(Arc::clone(&ctx));

        tokio::time::pause();
        let err = manager.ensure_text_layer(2, 1).await.unwrap_err();
        assert!(matches!(err, ViewerError::AttachmentTimeout { page: 2, .. }));
        assert!(err.is_retryable());
    }
}
