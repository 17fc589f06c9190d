//! Viewport engine: decides which pages get a raster and a text layer,
//! schedules that work on Tokio, and keeps stale results out of the view.

mod canvas;
mod context;
mod controller;
mod retry;
mod state;
mod surface;
mod text_layer;
mod visibility;

#[cfg(feature = "pdf")]
pub mod pdfium;
#[cfg(test)]
mod testing;

pub use canvas::PageRenderManager;
pub use controller::{ViewportController, ViewportMetrics};
pub use state::Layer;
pub use surface::{SharedSurface, Surface, SurfaceTable};
pub use text_layer::{TextLayer, TextLayerManager, TextSpan};
pub use visibility::{plan_visibility, PageLayout, VisibilityPlan};

#[cfg(feature = "pdf")]
pub use pdfium::PdfiumSource;
