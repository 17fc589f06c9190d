use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::geometry::{PageSize, Rect};
use crate::{PageNumber, RenderImage};

/// Parameters for one raster job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterRequest {
    pub page: PageNumber,
    /// Effective scale, already multiplied by the device pixel ratio.
    pub scale: f32,
    /// Physical bitmap size the caller will copy into its surface.
    pub width: u32,
    pub height: u32,
}

/// One positioned run of glyphs, in scale-1 page units with a top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TextItem {
    pub text: String,
    pub rect: Rect,
}

impl TextItem {
    pub fn new(text: impl Into<String>, rect: Rect) -> Self {
        Self {
            text: text.into(),
            rect,
        }
    }
}

/// Decodes raw document bytes.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn open(&self, bytes: Vec<u8>) -> Result<Arc<dyn DocumentHandle>>;
}

#[async_trait]
pub trait DocumentHandle: Send + Sync {
    fn page_count(&self) -> usize;

    /// Fetches a page handle; `page` is 1-based.
    async fn page(&self, page: PageNumber) -> Result<Arc<dyn PageHandle>>;

    /// Releases decoder resources. Called once when the owning controller
    /// lets go of the document.
    fn destroy(&self);
}

#[async_trait]
pub trait PageHandle: Send + Sync {
    fn page_number(&self) -> PageNumber;

    fn viewport(&self, scale: f32) -> PageSize;

    /// Rasterizes the page. Dropping the future (e.g. by aborting the task
    /// that polls it) must be safe and is how callers cancel.
    async fn render(&self, request: RasterRequest) -> Result<RenderImage>;

    async fn text_content(&self) -> Result<Vec<TextItem>>;
}
