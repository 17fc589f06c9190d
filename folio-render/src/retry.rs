use std::sync::Arc;

use folio_core::PageNumber;
use tracing::{debug, warn};

use crate::canvas::PageRenderManager;
use crate::context::RenderContext;
use crate::state::{Layer, RetryDecision};
use crate::text_layer::TextLayerManager;

/// Runs render and text-layer work on the Tokio runtime and applies the
/// backoff policy to failures.
pub(crate) struct Dispatcher {
    ctx: Arc<RenderContext>,
    pub canvas: PageRenderManager,
    pub text: TextLayerManager,
}

impl Dispatcher {
    pub fn new(ctx: Arc<RenderContext>) -> Self {
        Self {
            canvas: PageRenderManager::new(Arc::clone(&ctx)),
            text: TextLayerManager::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    pub fn dispatch(self: &Arc<Self>, page: PageNumber, layer: Layer, generation: u64) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(page, layer, generation).await;
        });
    }

    async fn run(&self, page: PageNumber, layer: Layer, generation: u64) {
        loop {
            let outcome = match layer {
                Layer::Canvas => self.canvas.ensure_canvas(page, generation).await,
                Layer::Text => self.text.ensure_text_layer(page, generation).await,
            };
            let err = match outcome {
                Ok(()) => {
                    self.ctx.record_success(page, layer);
                    return;
                }
                Err(err) if !err.is_retryable() => return,
                Err(err) => err,
            };

            match self.ctx.record_failure(page, layer, generation) {
                RetryDecision::RetryAfter(delay) => {
                    debug!(page, ?layer, ?delay, error = %err, "scheduling retry");
                    tokio::time::sleep(delay).await;
                    if !self.ctx.take_retry(page, layer, generation) {
                        return;
                    }
                }
                RetryDecision::AlreadyScheduled => return,
                RetryDecision::Exhausted { failures } => {
                    warn!(
                        page,
                        ?layer,
                        failures,
                        "giving up until the page becomes visible again"
                    );
                    return;
                }
            }
        }
    }
}
