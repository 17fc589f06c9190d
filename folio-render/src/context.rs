use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use folio_core::{
    quantize_scale, same_scale, DocumentHandle, PageNumber, PageSize, RenderImage, ViewerConfig,
    ViewerError, ViewerResult,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::state::{
    Claim, InFlight, Layer, Outcome, PageRenderState, RetryDecision, RetryState, Ticket,
};
use crate::surface::{SharedSurface, SurfaceTable};
use crate::text_layer::TextLayer;

/// Per-document mutable state. Everything that async completions check and
/// mutate lives behind one lock so the generation check and the mutation
/// happen together.
pub(crate) struct RenderTables {
    pub generation: u64,
    pub scale: f32,
    pub device_pixel_ratio: f32,
    pub erase_mode: bool,
    pub pages: HashMap<PageNumber, PageRenderState>,
    pub text_layers: HashMap<PageNumber, TextLayer>,
}

/// Host-controlled view inputs that every render depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ViewParams {
    pub scale: f32,
    pub device_pixel_ratio: f32,
    pub erase_mode: bool,
}

pub(crate) struct RenderContext {
    pub document: Arc<dyn DocumentHandle>,
    pub config: ViewerConfig,
    pub surfaces: SurfaceTable,
    pub tables: Mutex<RenderTables>,
    next_ticket: AtomicU64,
}

impl RenderContext {
    pub fn new(
        document: Arc<dyn DocumentHandle>,
        config: ViewerConfig,
        surfaces: SurfaceTable,
        generation: u64,
        view: ViewParams,
    ) -> Self {
        Self {
            document,
            config,
            surfaces,
            tables: Mutex::new(RenderTables {
                generation,
                scale: view.scale,
                device_pixel_ratio: view.device_pixel_ratio,
                erase_mode: view.erase_mode,
                pages: HashMap::new(),
                text_layers: HashMap::new(),
            }),
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn generation(&self) -> u64 {
        self.tables.lock().generation
    }

    pub fn scale(&self) -> f32 {
        self.tables.lock().scale
    }

    pub fn erase_mode(&self) -> bool {
        self.tables.lock().erase_mode
    }

    pub fn view(&self) -> ViewParams {
        let tables = self.tables.lock();
        ViewParams {
            scale: tables.scale,
            device_pixel_ratio: tables.device_pixel_ratio,
            erase_mode: tables.erase_mode,
        }
    }

    /// Switches the target scale and invalidates outstanding work.
    pub fn set_scale(&self, scale: f32) -> u64 {
        let mut tables = self.tables.lock();
        tables.scale = scale;
        Self::bump(&mut tables)
    }

    /// Physical sizes change with the ratio, so every cached canvas is stale.
    pub fn set_device_pixel_ratio(&self, ratio: f32) -> u64 {
        let mut tables = self.tables.lock();
        tables.device_pixel_ratio = ratio;
        for entry in tables.pages.values_mut() {
            entry.canvas_scale = None;
        }
        Self::bump(&mut tables)
    }

    fn bump(tables: &mut RenderTables) -> u64 {
        tables.generation += 1;
        for entry in tables.pages.values_mut() {
            for layer in [Layer::Canvas, Layer::Text] {
                if let Some(lock) = entry.lock_mut(layer) {
                    lock.cancel();
                }
            }
        }
        tables.generation
    }

    /// Entering erase mode destroys every text layer and aborts pending
    /// builds; leaving it only re-allows builds.
    pub fn set_erase_mode(&self, enabled: bool) {
        let mut tables = self.tables.lock();
        tables.erase_mode = enabled;
        if !enabled {
            return;
        }
        tables.text_layers.clear();
        for entry in tables.pages.values_mut() {
            if let Some(mut lock) = entry.text_lock.take() {
                lock.cancel();
            }
            entry.text_scale = None;
        }
    }

    pub fn claim(&self, page: PageNumber, layer: Layer, generation: u64) -> Claim {
        let mut guard = self.tables.lock();
        let tables = &mut *guard;
        if tables.generation != generation {
            return Claim::Stale;
        }
        if layer == Layer::Text && tables.erase_mode {
            return Claim::Stale;
        }

        let scale = tables.scale;
        let device_pixel_ratio = tables.device_pixel_ratio;
        let scale_key = quantize_scale(scale);
        let has_layer = tables.text_layers.contains_key(&page);
        let entry = tables.pages.entry(page).or_default();

        let slot = entry.lock_mut(layer);
        if let Some(lock) = slot.as_mut() {
            if lock.generation == generation && lock.scale_key == scale_key && !lock.is_orphaned()
            {
                return Claim::Join(lock.done.clone());
            }
            lock.cancel();
            *slot = None;
        }

        let cached = entry
            .scale(layer)
            .map_or(false, |cached| same_scale(cached, scale));
        if cached && (layer == Layer::Canvas || has_layer) {
            return Claim::Cached;
        }

        let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (done, receiver) = watch::channel(None);
        *entry.lock_mut(layer) = Some(InFlight {
            id,
            generation,
            scale_key,
            done: receiver,
            abort: None,
        });
        Claim::Owner(Ticket {
            page,
            layer,
            id,
            generation,
            scale,
            device_pixel_ratio,
            done,
        })
    }

    /// Errors with `RenderCancelled` when the ticket has been superseded.
    pub fn check(&self, ticket: &Ticket) -> ViewerResult<()> {
        let tables = self.tables.lock();
        if Self::owns(&tables, ticket) {
            Ok(())
        } else {
            Err(ViewerError::RenderCancelled)
        }
    }

    fn owns(tables: &RenderTables, ticket: &Ticket) -> bool {
        tables.generation == ticket.generation
            && tables
                .pages
                .get(&ticket.page)
                .and_then(|entry| entry.lock(ticket.layer))
                .map_or(false, |lock| lock.id == ticket.id)
    }

    /// Registers the job's abort handle. If the ticket was superseded in the
    /// meantime the job is aborted right away.
    pub fn attach_abort(&self, ticket: &Ticket, abort: AbortHandle) -> bool {
        let mut tables = self.tables.lock();
        if !Self::owns(&tables, ticket) {
            abort.abort();
            return false;
        }
        if let Some(lock) = tables
            .pages
            .get_mut(&ticket.page)
            .and_then(|entry| entry.lock_mut(ticket.layer).as_mut())
        {
            lock.abort = Some(abort);
        }
        true
    }

    pub async fn wait_for_surface(
        &self,
        page: PageNumber,
        generation: u64,
    ) -> ViewerResult<SharedSurface> {
        let wait = &self.config.surface_wait;
        for attempt in 0..=wait.max_polls {
            if self.generation() != generation {
                return Err(ViewerError::RenderCancelled);
            }
            if let Some(surface) = self.surfaces.get(page) {
                return Ok(surface);
            }
            if attempt < wait.max_polls {
                tokio::time::sleep(wait.poll_interval).await;
            }
        }
        Err(ViewerError::AttachmentTimeout {
            page,
            waited: wait.budget(),
        })
    }

    /// Writes a finished raster into the page surface and records the scale.
    pub fn present_canvas(
        &self,
        ticket: &Ticket,
        logical: PageSize,
        image: RenderImage,
    ) -> ViewerResult<()> {
        let mut tables = self.tables.lock();
        if !Self::owns(&tables, ticket) {
            return Err(ViewerError::RenderCancelled);
        }
        let Some(surface) = self.surfaces.get(ticket.page) else {
            return Err(ViewerError::RenderCancelled);
        };
        surface.lock().present(logical, image);
        if let Some(entry) = tables.pages.get_mut(&ticket.page) {
            entry.canvas_scale = Some(ticket.scale);
        }
        Ok(())
    }

    pub fn present_text(&self, ticket: &Ticket, layer: TextLayer) -> ViewerResult<()> {
        let mut guard = self.tables.lock();
        let tables = &mut *guard;
        if !Self::owns(tables, ticket) || tables.erase_mode {
            return Err(ViewerError::RenderCancelled);
        }
        if !self.surfaces.is_mounted(ticket.page) {
            return Err(ViewerError::RenderCancelled);
        }
        tables.text_layers.insert(ticket.page, layer);
        if let Some(entry) = tables.pages.get_mut(&ticket.page) {
            entry.text_scale = Some(ticket.scale);
        }
        Ok(())
    }

    /// Releases the in-flight marker (if still ours) and wakes joiners.
    pub fn finish(&self, ticket: Ticket, outcome: Outcome) {
        {
            let mut tables = self.tables.lock();
            if let Some(entry) = tables.pages.get_mut(&ticket.page) {
                let slot = entry.lock_mut(ticket.layer);
                if slot.as_ref().map_or(false, |lock| lock.id == ticket.id) {
                    *slot = None;
                }
            }
        }
        let _ = ticket.done.send(Some(outcome));
    }

    pub fn text_layer_ready(&self, page: PageNumber) -> bool {
        let tables = self.tables.lock();
        let Some(entry) = tables.pages.get(&page) else {
            return false;
        };
        tables.text_layers.contains_key(&page)
            && entry.text_lock.is_none()
            && entry
                .text_scale
                .map_or(false, |scale| same_scale(scale, tables.scale))
            && self.surfaces.is_mounted(page)
    }

    pub fn text_layer(&self, page: PageNumber) -> Option<TextLayer> {
        if !self.text_layer_ready(page) {
            return None;
        }
        self.tables.lock().text_layers.get(&page).cloned()
    }

    /// Whether a dispatch for `page` would do anything.
    pub fn needs_work(&self, page: PageNumber, layer: Layer) -> bool {
        let tables = self.tables.lock();
        if layer == Layer::Text && tables.erase_mode {
            return false;
        }
        let Some(entry) = tables.pages.get(&page) else {
            return true;
        };
        if let Some(lock) = entry.lock(layer) {
            if lock.generation == tables.generation && !lock.is_orphaned() {
                return false;
            }
        }
        let retry = entry.retry(layer);
        if retry.generation == tables.generation
            && (retry.pending || retry.failures >= self.config.retry.max_attempts)
        {
            return false;
        }
        let cached = entry
            .scale(layer)
            .map_or(false, |scale| same_scale(scale, tables.scale));
        match layer {
            Layer::Canvas => !cached,
            Layer::Text => !(cached && tables.text_layers.contains_key(&page)),
        }
    }

    /// Clears canvases and text layers outside the keep sets, then evicts
    /// page states that hold nothing and are no longer wanted.
    pub fn prune(&self, keep_canvas: &HashSet<PageNumber>, keep_text: &HashSet<PageNumber>) {
        let mut guard = self.tables.lock();
        let tables = &mut *guard;
        for (page, entry) in tables.pages.iter_mut() {
            if !keep_canvas.contains(page)
                && entry.canvas_scale.is_some()
                && entry.canvas_lock.is_none()
            {
                if let Some(surface) = self.surfaces.get(*page) {
                    surface.lock().clear();
                }
                entry.canvas_scale = None;
                debug!(page = *page, "pruned canvas");
            }
            if !keep_text.contains(page)
                && entry.text_scale.is_some()
                && entry.text_lock.is_none()
            {
                tables.text_layers.remove(page);
                entry.text_scale = None;
                debug!(page = *page, "destroyed text layer");
            }
        }
        tables
            .pages
            .retain(|page, entry| keep_canvas.contains(page) || !entry.is_idle());
        let pages = &tables.pages;
        tables.text_layers.retain(|page, _| pages.contains_key(page));
    }

    pub fn record_success(&self, page: PageNumber, layer: Layer) {
        if let Some(entry) = self.tables.lock().pages.get_mut(&page) {
            *entry.retry_mut(layer) = RetryState::default();
        }
    }

    pub fn record_failure(&self, page: PageNumber, layer: Layer, generation: u64) -> RetryDecision {
        let mut tables = self.tables.lock();
        let max_attempts = self.config.retry.max_attempts;
        let entry = tables.pages.entry(page).or_default();
        let retry = entry.retry_mut(layer);
        if retry.generation != generation {
            *retry = RetryState {
                generation,
                ..RetryState::default()
            };
        }
        if retry.pending {
            return RetryDecision::AlreadyScheduled;
        }
        retry.failures += 1;
        if retry.failures >= max_attempts {
            return RetryDecision::Exhausted {
                failures: retry.failures,
            };
        }
        retry.pending = true;
        RetryDecision::RetryAfter(self.config.retry.delay_for(retry.failures))
    }

    /// Consumes a scheduled retry. False when the page was evicted or the
    /// generation moved on while the retry slept.
    pub fn take_retry(&self, page: PageNumber, layer: Layer, generation: u64) -> bool {
        let mut tables = self.tables.lock();
        if tables.generation != generation {
            return false;
        }
        let Some(entry) = tables.pages.get_mut(&page) else {
            return false;
        };
        let retry = entry.retry_mut(layer);
        if retry.generation != generation || !retry.pending {
            return false;
        }
        retry.pending = false;
        true
    }

    pub fn cached_scale(&self, page: PageNumber, layer: Layer) -> Option<f32> {
        self.tables
            .lock()
            .pages
            .get(&page)
            .and_then(|entry| entry.scale(layer))
    }

    pub fn tracked_pages(&self) -> Vec<PageNumber> {
        let mut pages: Vec<_> = self.tables.lock().pages.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    /// Aborts all outstanding work and drops every cache entry.
    pub fn shutdown(&self) -> u64 {
        let mut tables = self.tables.lock();
        let generation = Self::bump(&mut tables);
        tables.pages.clear();
        tables.text_layers.clear();
        generation
    }
}
