pub mod annotation;
pub mod config;
pub mod error;
pub mod events;
pub mod fit;
pub mod geometry;
pub mod selection;
pub mod source;
pub mod store;

pub use annotation::{
    hit_test, overlay_marks, underline_thickness, Annotation, AnnotationId, AnnotationKind,
    NewAnnotation, OverlayMark,
};
pub use config::{FitWidthConfig, RetryConfig, SelectionConfig, SurfaceWaitConfig, ViewerConfig};
pub use error::{ViewerError, ViewerResult};
pub use events::{EventQueue, PointerContext, ViewerEvent};
pub use fit::{FitWidthCalculator, ZoomMode};
pub use geometry::{PageSize, Point, Rect, VerticalSpan};
pub use selection::{
    CommitOutcome, PointerDown, RangeSnapshot, RejectReason, SelectionCommit, SelectionEngine,
    SelectionState,
};
pub use source::{DocumentHandle, DocumentSource, PageHandle, RasterRequest, TextItem};
pub use store::{
    document_key_for_path, AnnotationStore, DocumentKey, FileAnnotationStore,
    MemoryAnnotationStore,
};

/// 1-based page number.
pub type PageNumber = usize;

/// RGBA8 bitmap.
#[derive(Debug, Clone, Default)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RenderImage {
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Scales are compared at milli precision so float noise from layout math
/// never counts as a rescale.
pub fn quantize_scale(scale: f32) -> u32 {
    let scaled = (scale * 1000.0).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        1
    } else if scaled > u32::MAX as f32 {
        u32::MAX
    } else {
        scaled as u32
    }
}

pub fn same_scale(a: f32, b: f32) -> bool {
    quantize_scale(a) == quantize_scale(b)
}
