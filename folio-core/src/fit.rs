use serde::{Deserialize, Serialize};

use crate::config::{clamp_scale, ViewerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoomMode {
    /// Scale is whatever the host sets.
    #[default]
    Manual,
    FitWidth,
}

/// Derives the fit-width scale and decides whether it is worth publishing.
pub struct FitWidthCalculator {
    padding: f32,
    epsilon: f32,
    min_scale: f32,
    max_scale: f32,
    last_published: Option<f32>,
}

impl FitWidthCalculator {
    pub fn new(config: &ViewerConfig) -> Self {
        Self {
            padding: config.fit_width.padding,
            epsilon: config.fit_width.epsilon,
            min_scale: config.min_scale,
            max_scale: config.max_scale,
            last_published: None,
        }
    }

    pub fn compute(&self, container_width: f32, page_base_width: f32) -> Option<f32> {
        if !(page_base_width > 0.0) || !container_width.is_finite() {
            return None;
        }
        let raw = (container_width - self.padding) / page_base_width;
        Some(clamp_scale(raw, self.min_scale, self.max_scale))
    }

    /// Returns the scale to publish, or `None` when the change is within
    /// resize noise of the current scale or of what was last published.
    pub fn on_container_width(
        &mut self,
        container_width: f32,
        page_base_width: f32,
        current_scale: f32,
    ) -> Option<f32> {
        let scale = self.compute(container_width, page_base_width)?;
        if (scale - current_scale).abs() <= self.epsilon {
            return None;
        }
        if let Some(previous) = self.last_published {
            if (scale - previous).abs() <= self.epsilon {
                return None;
            }
        }
        self.last_published = Some(scale);
        Some(scale)
    }

    /// Forget the last published value, e.g. when fit-width mode is re-entered.
    pub fn reset(&mut self) {
        self.last_published = None;
    }
}
