use std::sync::Arc;

use parking_lot::Mutex;

use crate::annotation::Annotation;
use crate::geometry::{Point, Rect};
use crate::selection::SelectionCommit;
use crate::PageNumber;

/// Where a click landed, for hosts that open a popup next to the annotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerContext {
    /// Page-local position in current-scale pixels.
    pub page_point: Point,
    /// Position in container coordinates.
    pub client_point: Point,
}

/// Notifications the viewport engine emits for its host.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    DocumentLoaded {
        page_count: usize,
    },
    PageChanged(PageNumber),
    AddHighlight {
        page: PageNumber,
        text: String,
        color: String,
        rects: Vec<Rect>,
    },
    AddUnderline {
        page: PageNumber,
        text: String,
        color: String,
        rects: Vec<Rect>,
    },
    AnnotationClicked {
        annotation: Annotation,
        pointer: PointerContext,
    },
    FitWidthScaleCalculated(f32),
    SelectionCommitted(SelectionCommit),
    SelectionCleared,
}

/// Shared queue the host drains between frames.
#[derive(Clone, Default)]
pub struct EventQueue {
    inner: Arc<Mutex<Vec<ViewerEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: ViewerEvent) {
        self.inner.lock().push(event);
    }

    pub fn drain(&self) -> Vec<ViewerEvent> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
