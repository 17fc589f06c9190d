//! In-memory document backend for engine tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use folio_core::{
    DocumentHandle, DocumentSource, PageHandle, PageNumber, PageSize, RasterRequest, Rect,
    RenderImage, TextItem, ViewerConfig,
};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::context::{RenderContext, ViewParams};
use crate::surface::SurfaceTable;

/// Records what the engine asked the backend to do.
#[derive(Default)]
pub(crate) struct Probe {
    renders: Mutex<Vec<PageNumber>>,
    text_builds: Mutex<Vec<PageNumber>>,
    failing: Mutex<HashSet<PageNumber>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    pub destroyed: AtomicBool,
}

impl Probe {
    pub fn renders(&self) -> Vec<PageNumber> {
        self.renders.lock().clone()
    }

    pub fn render_count(&self, page: PageNumber) -> usize {
        self.renders.lock().iter().filter(|p| **p == page).count()
    }

    pub fn text_builds(&self) -> Vec<PageNumber> {
        self.text_builds.lock().clone()
    }

    pub fn text_count(&self, page: PageNumber) -> usize {
        self.text_builds.lock().iter().filter(|p| **p == page).count()
    }

    pub fn fail(&self, page: PageNumber) {
        self.failing.lock().insert(page);
    }

    /// Makes every render wait for a permit on the returned semaphore.
    pub fn hold_renders(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }
}

pub(crate) struct FakeSource {
    pub pages: usize,
    pub size: PageSize,
    pub probe: Arc<Probe>,
}

impl FakeSource {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            size: PageSize::new(600.0, 800.0),
            probe: Arc::new(Probe::default()),
        }
    }
}

#[async_trait]
impl DocumentSource for FakeSource {
    async fn open(&self, bytes: Vec<u8>) -> Result<Arc<dyn DocumentHandle>> {
        if !bytes.starts_with(b"%PDF") {
            bail!("missing %PDF header");
        }
        Ok(Arc::new(FakeDocument {
            pages: self.pages,
            size: self.size,
            probe: Arc::clone(&self.probe),
        }))
    }
}

struct FakeDocument {
    pages: usize,
    size: PageSize,
    probe: Arc<Probe>,
}

#[async_trait]
impl DocumentHandle for FakeDocument {
    fn page_count(&self) -> usize {
        self.pages
    }

    async fn page(&self, page: PageNumber) -> Result<Arc<dyn PageHandle>> {
        if page == 0 || page > self.pages {
            return Err(anyhow!("page {} out of range", page));
        }
        Ok(Arc::new(FakePage {
            number: page,
            size: self.size,
            probe: Arc::clone(&self.probe),
        }))
    }

    fn destroy(&self) {
        self.probe.destroyed.store(true, Ordering::SeqCst);
    }
}

struct FakePage {
    number: PageNumber,
    size: PageSize,
    probe: Arc<Probe>,
}

#[async_trait]
impl PageHandle for FakePage {
    fn page_number(&self) -> PageNumber {
        self.number
    }

    fn viewport(&self, scale: f32) -> PageSize {
        self.size.scaled(scale)
    }

    async fn render(&self, request: RasterRequest) -> Result<RenderImage> {
        self.probe.renders.lock().push(self.number);
        let gate = self.probe.gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire().await?.forget();
        }
        if self.probe.failing.lock().contains(&self.number) {
            bail!("corrupt content stream");
        }
        Ok(RenderImage::blank(request.width, request.height))
    }

    async fn text_content(&self) -> Result<Vec<TextItem>> {
        self.probe.text_builds.lock().push(self.number);
        Ok(vec![
            TextItem::new("Lorem", Rect::new(50.0, 60.0, 60.0, 12.0)),
            TextItem::new("ipsum", Rect::new(115.0, 60.0, 55.0, 12.0)),
            TextItem::new("dolor", Rect::new(50.0, 80.0, 50.0, 12.0)),
        ])
    }
}

/// Lets spawned tasks run until they block on something other than the
/// scheduler. Under a paused clock the trailing sleep only completes once the
/// runtime is idle.
pub(crate) async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// A render context over `source` at scale 1 with every page mounted.
pub(crate) async fn context(source: &FakeSource) -> Arc<RenderContext> {
    let document = match source.open(b"%PDF-1.7".to_vec()).await {
        Ok(document) => document,
        Err(err) => panic!("fake open failed: {err:#}"),
    };
    let surfaces = SurfaceTable::new();
    surfaces.mount_range(1..=source.pages);
    let view = ViewParams {
        scale: 1.0,
        device_pixel_ratio: 1.0,
        erase_mode: false,
    };
    Arc::new(RenderContext::new(
        document,
        ViewerConfig::default(),
        surfaces,
        1,
        view,
    ))
}
