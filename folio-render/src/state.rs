use folio_core::{ViewerError, ViewerResult};
use tokio::sync::watch;
use tokio::task::AbortHandle;

pub(crate) type Outcome = ViewerResult<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Canvas,
    Text,
}

/// Marker for a render or text build in progress.
pub(crate) struct InFlight {
    pub id: u64,
    pub generation: u64,
    pub scale_key: u32,
    pub done: watch::Receiver<Option<Outcome>>,
    pub abort: Option<AbortHandle>,
}

impl InFlight {
    /// The owner went away without reporting, e.g. its task was dropped.
    pub fn is_orphaned(&self) -> bool {
        self.done.has_changed().is_err()
    }

    pub fn cancel(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RetryState {
    pub generation: u64,
    pub failures: u32,
    pub pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum RetryDecision {
    RetryAfter(std::time::Duration),
    AlreadyScheduled,
    Exhausted { failures: u32 },
}

#[derive(Default)]
pub(crate) struct PageRenderState {
    pub canvas_scale: Option<f32>,
    pub text_scale: Option<f32>,
    pub canvas_lock: Option<InFlight>,
    pub text_lock: Option<InFlight>,
    pub canvas_retry: RetryState,
    pub text_retry: RetryState,
}

impl PageRenderState {
    pub fn scale(&self, layer: Layer) -> Option<f32> {
        match layer {
            Layer::Canvas => self.canvas_scale,
            Layer::Text => self.text_scale,
        }
    }

    pub fn lock(&self, layer: Layer) -> Option<&InFlight> {
        match layer {
            Layer::Canvas => self.canvas_lock.as_ref(),
            Layer::Text => self.text_lock.as_ref(),
        }
    }

    pub fn lock_mut(&mut self, layer: Layer) -> &mut Option<InFlight> {
        match layer {
            Layer::Canvas => &mut self.canvas_lock,
            Layer::Text => &mut self.text_lock,
        }
    }

    pub fn retry_mut(&mut self, layer: Layer) -> &mut RetryState {
        match layer {
            Layer::Canvas => &mut self.canvas_retry,
            Layer::Text => &mut self.text_retry,
        }
    }

    pub fn retry(&self, layer: Layer) -> RetryState {
        match layer {
            Layer::Canvas => self.canvas_retry,
            Layer::Text => self.text_retry,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.canvas_scale.is_none()
            && self.text_scale.is_none()
            && self.canvas_lock.is_none()
            && self.text_lock.is_none()
    }
}

/// Exclusive right to run one render or build. Hand it back through
/// `RenderContext::finish` once the work settles.
pub(crate) struct Ticket {
    pub page: usize,
    pub layer: Layer,
    pub id: u64,
    pub generation: u64,
    pub scale: f32,
    pub device_pixel_ratio: f32,
    pub done: watch::Sender<Option<Outcome>>,
}

pub(crate) enum Claim {
    Cached,
    Stale,
    Join(watch::Receiver<Option<Outcome>>),
    Owner(Ticket),
}

/// Waits for another caller's render of the same page and generation.
pub(crate) async fn join(mut done: watch::Receiver<Option<Outcome>>) -> Outcome {
    match done.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone().unwrap_or(Err(ViewerError::RenderCancelled)),
        Err(_) => Err(ViewerError::RenderCancelled),
    }
}
