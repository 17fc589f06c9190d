use std::convert::TryFrom;
use std::mem;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use folio_core::{
    DocumentHandle, DocumentSource, PageHandle, PageNumber, PageSize, RasterRequest, Rect,
    RenderImage, TextItem,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

/// Environment variable naming an explicit Pdfium shared library.
pub const PDFIUM_LIBRARY_ENV: &str = "FOLIO_PDFIUM_LIBRARY_PATH";

/// Decodes PDF bytes with Pdfium.
pub struct PdfiumSource {
    pdfium: Arc<Pdfium>,
}

impl PdfiumSource {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentSource for PdfiumSource {
    #[instrument(skip_all, fields(bytes = bytes.len()))]
    async fn open(&self, bytes: Vec<u8>) -> Result<Arc<dyn DocumentHandle>> {
        let inner = DocumentInner::load(Arc::clone(&self.pdfium), bytes)?;
        debug!(pages = inner.sizes.len(), "pdf decoded");
        Ok(Arc::new(PdfiumDocument {
            inner: Arc::new(inner),
        }))
    }
}

struct DocumentInner {
    document: Mutex<Option<PdfDocument<'static>>>,
    sizes: Vec<PageSize>,
    pdfium: Arc<Pdfium>,
}

impl DocumentInner {
    fn load(pdfium: Arc<Pdfium>, bytes: Vec<u8>) -> Result<Self> {
        let document = pdfium
            .load_pdf_from_byte_vec(bytes, None)
            .context("failed to parse PDF")?;
        // SAFETY: the document borrows the bindings owned by `pdfium`. It is
        // stored in `self.document`, which is declared before `pdfium` and so
        // dropped first, and `destroy` only ever drops it early.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        let sizes = document
            .pages()
            .iter()
            .map(|page| PageSize::new(page.width().value, page.height().value))
            .collect();
        Ok(Self {
            document: Mutex::new(Some(document)),
            sizes,
            pdfium,
        })
    }

    fn with_page<R, F>(&self, number: PageNumber, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        let guard = self.document.lock();
        let document = guard
            .as_ref()
            .ok_or_else(|| anyhow!("document has been destroyed"))?;
        let index: PdfPageIndex = number
            .checked_sub(1)
            .and_then(|index| PdfPageIndex::try_from(index).ok())
            .ok_or_else(|| anyhow!("page {} is out of supported range", number))?;
        let page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", number))?;
        f(&page)
    }

    fn render(&self, request: &RasterRequest) -> Result<RenderImage> {
        self.with_page(request.page, |page| {
            let width = i32::try_from(request.width).unwrap_or(i32::MAX);
            let height = i32::try_from(request.height).unwrap_or(i32::MAX);
            let config = PdfRenderConfig::new().set_target_size(width, height);
            let bitmap = page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", request.page))?;
            let image = bitmap.as_image().to_rgba8();
            Ok(RenderImage {
                width: image.width(),
                height: image.height(),
                pixels: image.into_raw(),
            })
        })
    }

    fn text_items(&self, number: PageNumber) -> Result<Vec<TextItem>> {
        self.with_page(number, |page| {
            let page_height = page.height().value;
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", number))?;
            let items = text
                .segments()
                .iter()
                .filter_map(|segment| {
                    let bounds = segment.bounds();
                    let rect = top_left_rect(
                        bounds.left().value,
                        bounds.top().value,
                        bounds.right().value,
                        bounds.bottom().value,
                        page_height,
                    );
                    let text = segment.text();
                    (!text.trim().is_empty() && !rect.is_empty()).then(|| TextItem::new(text, rect))
                })
                .collect();
            Ok(items)
        })
    }
}

/// Converts PDF user-space bounds (origin bottom-left) to a page-local rect
/// with a top-left origin.
fn top_left_rect(left: f32, top: f32, right: f32, bottom: f32, page_height: f32) -> Rect {
    let (top, bottom) = if top >= bottom { (top, bottom) } else { (bottom, top) };
    Rect::new(
        left.min(right),
        page_height - top,
        (right - left).abs(),
        top - bottom,
    )
}

struct PdfiumDocument {
    inner: Arc<DocumentInner>,
}

#[async_trait]
impl DocumentHandle for PdfiumDocument {
    fn page_count(&self) -> usize {
        self.inner.sizes.len()
    }

    async fn page(&self, page: PageNumber) -> Result<Arc<dyn PageHandle>> {
        let size = page
            .checked_sub(1)
            .and_then(|index| self.inner.sizes.get(index))
            .copied()
            .ok_or_else(|| anyhow!("page {} out of range", page))?;
        Ok(Arc::new(PdfiumPage {
            inner: Arc::clone(&self.inner),
            number: page,
            size,
        }))
    }

    fn destroy(&self) {
        if self.inner.document.lock().take().is_some() {
            debug!("pdf document released");
        }
    }
}

struct PdfiumPage {
    inner: Arc<DocumentInner>,
    number: PageNumber,
    size: PageSize,
}

#[async_trait]
impl PageHandle for PdfiumPage {
    fn page_number(&self) -> PageNumber {
        self.number
    }

    fn viewport(&self, scale: f32) -> PageSize {
        self.size.scaled(scale)
    }

    async fn render(&self, request: RasterRequest) -> Result<RenderImage> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.render(&request)).await?
    }

    async fn text_content(&self) -> Result<Vec<TextItem>> {
        let inner = Arc::clone(&self.inner);
        let number = self.number;
        tokio::task::spawn_blocking(move || inner.text_items(number)).await?
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    match std::env::var(PDFIUM_LIBRARY_ENV) {
        Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!("failed to load Pdfium from {}: {}", path, err);
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}
