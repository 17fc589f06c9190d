use std::sync::Arc;

use folio_core::{PageNumber, RasterRequest, ViewerError, ViewerResult};
use tracing::{debug, warn};

use crate::context::RenderContext;
use crate::state::{join, Claim, Layer, Ticket};

/// Rasterizes pages into their surfaces at the current scale.
pub struct PageRenderManager {
    ctx: Arc<RenderContext>,
}

impl PageRenderManager {
    pub(crate) fn new(ctx: Arc<RenderContext>) -> Self {
        Self { ctx }
    }

    /// Idempotent: a page already cached at the current scale is left alone,
    /// and a render already running for this page and generation is awaited
    /// instead of started again.
    pub async fn ensure_canvas(&self, page: PageNumber, generation: u64) -> ViewerResult<()> {
        match self.ctx.claim(page, Layer::Canvas, generation) {
            Claim::Cached => Ok(()),
            Claim::Stale => Err(ViewerError::RenderCancelled),
            Claim::Join(done) => join(done).await,
            Claim::Owner(ticket) => {
                let outcome = self.render(&ticket).await;
                match &outcome {
                    Ok(()) => debug!(page, scale = ticket.scale, "canvas rendered"),
                    Err(err) if err.is_retryable() => {
                        warn!(page, error = %err, "canvas render failed")
                    }
                    Err(_) => debug!(page, "canvas render cancelled"),
                }
                self.ctx.finish(ticket, outcome.clone());
                outcome
            }
        }
    }

    pub fn cached_scale(&self, page: PageNumber) -> Option<f32> {
        self.ctx.cached_scale(page, Layer::Canvas)
    }

    async fn render(&self, ticket: &Ticket) -> ViewerResult<()> {
        let page = ticket.page;
        self.ctx.wait_for_surface(page, ticket.generation).await?;
        let handle = self
            .ctx
            .document
            .page(page)
            .await
            .map_err(|err| ViewerError::render_failed(page, &err))?;
        self.ctx.check(ticket)?;

        let logical = handle.viewport(ticket.scale);
        let ratio = ticket.device_pixel_ratio.max(0.1);
        let request = RasterRequest {
            page,
            scale: ticket.scale * ratio,
            width: (logical.width * ratio).floor().max(1.0) as u32,
            height: (logical.height * ratio).floor().max(1.0) as u32,
        };

        let job = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.render(request).await })
        };
        if !self.ctx.attach_abort(ticket, job.abort_handle()) {
            return Err(ViewerError::RenderCancelled);
        }
        let image = match job.await {
            Ok(Ok(image)) => image,
            Ok(Err(err)) => return Err(ViewerError::render_failed(page, &err)),
            Err(err) if err.is_cancelled() => return Err(ViewerError::RenderCancelled),
            Err(err) => {
                return Err(ViewerError::RenderFailed {
                    page,
                    reason: err.to_string(),
                })
            }
        };

        self.ctx.present_canvas(ticket, logical, image)
    }
}
