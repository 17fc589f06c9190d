use std::time::Duration;

use thiserror::Error;

use crate::PageNumber;

/// Failures surfaced by the viewport engine.
///
/// Only [`ViewerError::Decode`] is document-level. Everything else is scoped
/// to a single page and never affects its siblings.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ViewerError {
    #[error("failed to decode document: {0}")]
    Decode(String),
    /// Work was superseded by a reload, rescale, prune or erase mode.
    #[error("render cancelled")]
    RenderCancelled,
    #[error("failed to render page {page}: {reason}")]
    RenderFailed { page: PageNumber, reason: String },
    #[error("surface for page {page} was not attached within {waited:?}")]
    AttachmentTimeout { page: PageNumber, waited: Duration },
}

impl ViewerError {
    pub fn render_failed(page: PageNumber, err: &anyhow::Error) -> Self {
        Self::RenderFailed {
            page,
            reason: format!("{err:#}"),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::RenderCancelled)
    }

    /// Whether the retry policy should pick this failure up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RenderFailed { .. } | Self::AttachmentTimeout { .. }
        )
    }
}

pub type ViewerResult<T> = std::result::Result<T, ViewerError>;
