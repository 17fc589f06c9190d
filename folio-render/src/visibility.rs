use std::cmp::Ordering;

use folio_core::{PageNumber, PageSize, Rect, VerticalSpan, ViewerConfig};

/// Pages stacked top to bottom, centred horizontally in the container.
#[derive(Debug, Clone)]
pub struct PageLayout {
    base_sizes: Vec<PageSize>,
    gap: f32,
}

impl PageLayout {
    pub fn new(base_sizes: Vec<PageSize>, gap: f32) -> Self {
        Self {
            base_sizes,
            gap: gap.max(0.0),
        }
    }

    pub fn page_count(&self) -> usize {
        self.base_sizes.len()
    }

    pub fn base_size(&self, page: PageNumber) -> Option<PageSize> {
        page.checked_sub(1)
            .and_then(|index| self.base_sizes.get(index))
            .copied()
    }

    /// Page boxes in content coordinates; index 0 is page 1.
    pub fn boxes(&self, scale: f32, container_width: f32) -> Vec<Rect> {
        let mut top = self.gap;
        self.base_sizes
            .iter()
            .map(|size| {
                let size = size.scaled(scale);
                let left = ((container_width - size.width) / 2.0).max(0.0);
                let rect = Rect::new(left, top, size.width, size.height);
                top += size.height + self.gap;
                rect
            })
            .collect()
    }

    pub fn page_box(&self, page: PageNumber, scale: f32, container_width: f32) -> Option<Rect> {
        page.checked_sub(1)
            .and_then(|index| self.boxes(scale, container_width).get(index).copied())
    }

    pub fn content_height(&self, scale: f32) -> f32 {
        self.base_sizes
            .iter()
            .map(|size| size.height * scale + self.gap)
            .sum::<f32>()
            + self.gap
    }

    /// The page containing content offset `y`, or the nearest one.
    pub fn page_at(boxes: &[Rect], y: f32) -> Option<PageNumber> {
        boxes
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                VerticalSpan::distance_to(y, a).total_cmp(&VerticalSpan::distance_to(y, b))
            })
            .map(|(index, _)| index + 1)
    }
}

/// What one visibility pass decided.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityPlan {
    pub canvas_window: VerticalSpan,
    pub text_window: VerticalSpan,
    /// Nearest to the viewport centre first.
    pub canvas_targets: Vec<PageNumber>,
    pub text_targets: Vec<PageNumber>,
}

/// Picks canvas and text-layer targets for a viewport over `boxes`.
/// `forced` pages are always included in both sets.
pub fn plan_visibility(
    boxes: &[Rect],
    viewport: VerticalSpan,
    config: &ViewerConfig,
    forced: &[PageNumber],
) -> VisibilityPlan {
    let canvas_window = viewport.buffered(config.canvas_buffer_viewports);
    let text_window = viewport.buffered(config.text_buffer_viewports);
    let center = viewport.center();

    let collect = |window: &VerticalSpan| {
        let mut targets: Vec<(f32, PageNumber)> = boxes
            .iter()
            .enumerate()
            .filter_map(|(index, rect)| {
                let page = index + 1;
                (window.intersects(rect) || forced.contains(&page))
                    .then(|| (VerticalSpan::distance_to(center, rect), page))
            })
            .collect();
        targets.sort_by(|a, b| match a.0.total_cmp(&b.0) {
            Ordering::Equal => a.1.cmp(&b.1),
            other => other,
        });
        targets.into_iter().map(|(_, page)| page).collect::<Vec<_>>()
    };

    VisibilityPlan {
        canvas_targets: collect(&canvas_window),
        text_targets: collect(&text_window),
        canvas_window,
        text_window,
    }
}
