//! Text selection state machine.
//!
//! The engine never reads pointer coordinates itself. Hosts report gesture
//! boundaries, then hand over a [`RangeSnapshot`] describing whatever their
//! text-selection primitive currently covers, and the engine turns that into
//! page-local annotation geometry.

use std::time::{Duration, Instant};

use crate::config::SelectionConfig;
use crate::geometry::{Point, Rect};
use crate::PageNumber;

/// What the host's selection range covers right now.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeSnapshot {
    /// Page whose text layer holds the range start, if any.
    pub start_page: Option<PageNumber>,
    /// Page whose text layer holds the range end, if any.
    pub end_page: Option<PageNumber>,
    pub text: String,
    /// Sub-rectangles of the range in container coordinates.
    pub rects: Vec<Rect>,
}

/// A settled selection, ready to become an annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionCommit {
    pub page: PageNumber,
    pub text: String,
    /// Page-local rects in scale-1 units.
    pub rects: Vec<Rect>,
    /// Popup anchor in container coordinates: horizontal center and top edge
    /// of the last accepted rect.
    pub anchor: Point,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionState {
    Idle,
    Selecting {
        page: PageNumber,
    },
    PendingCommit {
        page: Option<PageNumber>,
        due: Instant,
    },
    Committed(SelectionCommit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerDown {
    /// A selection gesture began on a ready text layer.
    Started,
    /// The layer under the pointer is not ready. The host must cancel its
    /// default selection behaviour; the page's text layer should be built.
    Suppressed { build_page: PageNumber },
    /// Pointer landed outside any text layer.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Collapsed,
    CrossPage,
    NoSurvivingRects,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(SelectionCommit),
    /// Same selection as the last commit; nothing new to publish.
    Unchanged,
    Rejected(RejectReason),
    /// No commit was pending.
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Signature {
    page: PageNumber,
    text: String,
    rect_count: usize,
    origin: (i64, i64),
}

pub struct SelectionEngine {
    config: SelectionConfig,
    state: SelectionState,
    last: Option<(Signature, SelectionCommit)>,
}

impl SelectionEngine {
    pub fn new(config: SelectionConfig) -> Self {
        Self {
            config,
            state: SelectionState::Idle,
            last: None,
        }
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn committed(&self) -> Option<&SelectionCommit> {
        match &self.state {
            SelectionState::Committed(commit) => Some(commit),
            _ => None,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.config.debounce
    }

    /// Page protected from pruning while a selection is live.
    pub fn locked_page(&self) -> Option<PageNumber> {
        match &self.state {
            SelectionState::Idle => None,
            SelectionState::Selecting { page } => Some(*page),
            SelectionState::PendingCommit { page, .. } => *page,
            SelectionState::Committed(commit) => Some(commit.page),
        }
    }

    pub fn is_locked(&self) -> bool {
        !matches!(self.state, SelectionState::Idle)
    }

    pub fn pointer_down(&mut self, page: Option<PageNumber>, layer_ready: bool) -> PointerDown {
        self.last = None;
        match page {
            None => {
                self.state = SelectionState::Idle;
                PointerDown::Ignored
            }
            Some(page) if !layer_ready => {
                self.state = SelectionState::Idle;
                PointerDown::Suppressed { build_page: page }
            }
            Some(page) => {
                self.state = SelectionState::Selecting { page };
                PointerDown::Started
            }
        }
    }

    pub fn pointer_up(&mut self, now: Instant) {
        if let SelectionState::Selecting { page } = self.state {
            self.state = SelectionState::PendingCommit {
                page: Some(page),
                due: now + self.config.debounce,
            };
        }
    }

    /// Selection-change or keyboard selection event. Ignored mid-drag; the
    /// pointer-up that ends the drag schedules the commit instead.
    pub fn selection_changed(&mut self, now: Instant) {
        let page = match &self.state {
            SelectionState::Selecting { .. } => return,
            SelectionState::Idle => None,
            SelectionState::PendingCommit { page, .. } => *page,
            SelectionState::Committed(commit) => Some(commit.page),
        };
        self.state = SelectionState::PendingCommit {
            page,
            due: now + self.config.debounce,
        };
    }

    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self.state, SelectionState::PendingCommit { due, .. } if now >= due)
    }

    /// Computes the committed geometry from the host's range.
    ///
    /// `page_box` is the owning page's box in the same coordinate space as the
    /// range rects, at `scale`.
    pub fn commit(&mut self, range: &RangeSnapshot, page_box: Rect, scale: f32) -> CommitOutcome {
        if !matches!(self.state, SelectionState::PendingCommit { .. }) {
            return CommitOutcome::Idle;
        }

        let page = match (range.start_page, range.end_page) {
            (Some(start), Some(end)) if start != end => {
                return self.reject(RejectReason::CrossPage);
            }
            (Some(start), _) | (None, Some(start)) => start,
            (None, None) => return self.reject(RejectReason::Collapsed),
        };
        if range.text.trim().is_empty() {
            return self.reject(RejectReason::Collapsed);
        }

        let accepted = filter_selection_rects(&range.rects, &page_box, &self.config);
        let Some(last_rect) = accepted.last().copied() else {
            return self.reject(RejectReason::NoSurvivingRects);
        };

        let local: Vec<Rect> = accepted
            .iter()
            .map(|rect| rect.translated(-page_box.left, -page_box.top))
            .collect();
        let first = local[0];
        let signature = Signature {
            page,
            text: range.text.clone(),
            rect_count: local.len(),
            origin: (first.left.round() as i64, first.top.round() as i64),
        };

        if let Some((previous, commit)) = &self.last {
            if *previous == signature {
                self.state = SelectionState::Committed(commit.clone());
                return CommitOutcome::Unchanged;
            }
        }

        let commit = SelectionCommit {
            page,
            text: range.text.clone(),
            rects: local.iter().map(|rect| rect.normalized(scale)).collect(),
            anchor: Point::new(last_rect.center_x(), last_rect.top),
        };
        self.last = Some((signature, commit.clone()));
        self.state = SelectionState::Committed(commit.clone());
        CommitOutcome::Committed(commit)
    }

    /// Hands the committed selection over (e.g. to become an annotation) and
    /// returns to idle.
    pub fn take_committed(&mut self) -> Option<SelectionCommit> {
        match std::mem::replace(&mut self.state, SelectionState::Idle) {
            SelectionState::Committed(commit) => {
                self.last = None;
                Some(commit)
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Explicit close, document or scale change, erase mode.
    pub fn reset(&mut self) {
        self.state = SelectionState::Idle;
        self.last = None;
    }

    fn reject(&mut self, reason: RejectReason) -> CommitOutcome {
        self.state = SelectionState::Idle;
        CommitOutcome::Rejected(reason)
    }
}

/// Drops the spurious rects unstable range updates produce: empty ones and
/// ones that effectively cover the whole page.
pub fn filter_selection_rects(rects: &[Rect], page_box: &Rect, config: &SelectionConfig) -> Vec<Rect> {
    let page_area = page_box.area();
    rects
        .iter()
        .filter(|rect| {
            if rect.is_empty() {
                return false;
            }
            if page_area > 0.0 && rect.area() >= page_area * config.max_area_ratio {
                return false;
            }
            let spans_width = rect.width > page_box.width * config.max_extent_ratio;
            let spans_height = rect.height > page_box.height * config.max_extent_ratio;
            !(spans_width && spans_height)
        })
        .copied()
        .collect()
}
