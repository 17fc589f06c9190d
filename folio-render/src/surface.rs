use std::collections::HashMap;
use std::sync::Arc;

use folio_core::{PageNumber, PageSize, RenderImage};
use parking_lot::Mutex;

/// Drawing target for one page slot.
///
/// The logical size is what the page occupies on screen; the bitmap is
/// `floor(logical * device_pixel_ratio)` physical pixels.
#[derive(Debug, Default)]
pub struct Surface {
    logical: PageSize,
    image: RenderImage,
}

impl Surface {
    pub fn logical_size(&self) -> PageSize {
        self.logical
    }

    pub fn physical_size(&self) -> (u32, u32) {
        (self.image.width, self.image.height)
    }

    pub fn image(&self) -> &RenderImage {
        &self.image
    }

    pub fn is_blank(&self) -> bool {
        self.image.is_empty()
    }

    pub(crate) fn present(&mut self, logical: PageSize, image: RenderImage) {
        self.logical = logical;
        self.image = image;
    }

    /// Zeroes the bitmap so the host falls back to its placeholder.
    pub(crate) fn clear(&mut self) {
        self.image = RenderImage::default();
    }
}

pub type SharedSurface = Arc<Mutex<Surface>>;

/// Page slots the host has attached to its view tree.
#[derive(Clone, Default)]
pub struct SurfaceTable {
    inner: Arc<Mutex<HashMap<PageNumber, SharedSurface>>>,
}

impl SurfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a slot for `page`, returning the existing one if present.
    pub fn mount(&self, page: PageNumber) -> SharedSurface {
        Arc::clone(
            self.inner
                .lock()
                .entry(page)
                .or_insert_with(|| Arc::new(Mutex::new(Surface::default()))),
        )
    }

    pub fn mount_range(&self, pages: impl IntoIterator<Item = PageNumber>) {
        let mut inner = self.inner.lock();
        for page in pages {
            inner
                .entry(page)
                .or_insert_with(|| Arc::new(Mutex::new(Surface::default())));
        }
    }

    pub fn unmount(&self, page: PageNumber) -> Option<SharedSurface> {
        self.inner.lock().remove(&page)
    }

    pub fn get(&self, page: PageNumber) -> Option<SharedSurface> {
        self.inner.lock().get(&page).cloned()
    }

    pub fn is_mounted(&self, page: PageNumber) -> bool {
        self.inner.lock().contains_key(&page)
    }

    pub(crate) fn clear_all(&self) {
        for surface in self.inner.lock().values() {
            surface.lock().clear();
        }
    }

    pub(crate) fn retain(&self, page_count: usize) {
        self.inner
            .lock()
            .retain(|page, _| *page >= 1 && *page <= page_count);
    }
}
