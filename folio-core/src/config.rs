use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

/// Tunables for the viewport engine.
///
/// The defaults were tuned by hand against real documents; none of them are
/// load-bearing for correctness, so they can be overridden from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Canvas pre-render window, in viewport heights above and below.
    pub canvas_buffer_viewports: f32,
    /// Text-layer window, in viewport heights above and below.
    pub text_buffer_viewports: f32,
    /// Vertical gap between stacked pages, in pixels at the current scale.
    pub page_gap: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub retry: RetryConfig,
    pub surface_wait: SurfaceWaitConfig,
    pub selection: SelectionConfig,
    pub fit_width: FitWidthConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            canvas_buffer_viewports: 2.5,
            text_buffer_viewports: 0.9,
            page_gap: 16.0,
            min_scale: 0.25,
            max_scale: 4.0,
            retry: RetryConfig::default(),
            surface_wait: SurfaceWaitConfig::default(),
            selection: SelectionConfig::default(),
            fit_width: FitWidthConfig::default(),
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("failed to parse viewer configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engine cannot work with, such as inverted scale
    /// bounds or a zero poll interval.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            positive(self.min_scale) && positive(self.max_scale),
            "min_scale and max_scale must be finite and positive"
        );
        ensure!(
            self.min_scale <= self.max_scale,
            "min_scale ({}) exceeds max_scale ({})",
            self.min_scale,
            self.max_scale
        );
        ensure!(
            non_negative(self.canvas_buffer_viewports) && non_negative(self.text_buffer_viewports),
            "buffer windows must be finite and non-negative"
        );
        ensure!(non_negative(self.page_gap), "page_gap must be finite and non-negative");

        ensure!(!self.retry.base_delay.is_zero(), "retry.base_delay_ms must be positive");
        ensure!(
            self.retry.max_delay >= self.retry.base_delay,
            "retry.max_delay_ms must not be below retry.base_delay_ms"
        );
        ensure!(self.retry.max_attempts > 0, "retry.max_attempts must be positive");
        ensure!(
            !self.surface_wait.poll_interval.is_zero(),
            "surface_wait.poll_interval_ms must be positive"
        );
        ensure!(self.surface_wait.max_polls > 0, "surface_wait.max_polls must be positive");

        ensure!(
            unit_ratio(self.selection.max_area_ratio) && unit_ratio(self.selection.max_extent_ratio),
            "selection ratios must lie in (0, 1]"
        );
        ensure!(
            non_negative(self.fit_width.padding) && non_negative(self.fit_width.epsilon),
            "fit_width padding and epsilon must be finite and non-negative"
        );
        Ok(())
    }

    /// Loads a config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config file {:?}", path))
    }

    /// Never panics, even on bounds that skipped [`Self::validate`]. NaN maps
    /// to `min_scale`.
    pub fn clamp_scale(&self, scale: f32) -> f32 {
        clamp_scale(scale, self.min_scale, self.max_scale)
    }
}

pub(crate) fn clamp_scale(scale: f32, min: f32, max: f32) -> f32 {
    if scale.is_nan() {
        return min;
    }
    scale.min(max).max(min)
}

fn positive(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

fn non_negative(value: f32) -> bool {
    value.is_finite() && value >= 0.0
}

fn unit_ratio(value: f32) -> bool {
    value.is_finite() && value > 0.0 && value <= 1.0
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "base_delay_ms")]
    pub base_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Failed attempts allowed before automatic retries stop.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(90),
            max_delay: Duration::from_millis(720),
            max_attempts: 5,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry that follows failure number `failures` (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceWaitConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_interval_ms")]
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for SurfaceWaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(16),
            max_polls: 60,
        }
    }
}

impl SurfaceWaitConfig {
    pub fn budget(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_polls)
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "debounce_ms")]
    pub debounce: Duration,
    /// Rects covering at least this share of the page area are dropped.
    pub max_area_ratio: f32,
    /// Rects exceeding this share of both page width and height are dropped.
    pub max_extent_ratio: f32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(20),
            max_area_ratio: 0.9,
            max_extent_ratio: 0.98,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitWidthConfig {
    /// Horizontal space reserved around the page, in container pixels.
    pub padding: f32,
    pub epsilon: f32,
}

impl Default for FitWidthConfig {
    fn default() -> Self {
        Self {
            padding: 80.0,
            epsilon: 0.01,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let retry = RetryConfig::default();
        let delays: Vec<u64> = (1..=6)
            .map(|n| retry.delay_for(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![90, 180, 360, 720, 720, 720]);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config = ViewerConfig::from_toml_str(
            r#"
            canvas_buffer_viewports = 3.0

            [retry]
            max_attempts = 2
            base_delay_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.canvas_buffer_viewports, 3.0);
        assert_eq!(config.text_buffer_viewports, 0.9);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay, Duration::from_millis(50));
        assert_eq!(config.retry.max_delay, Duration::from_millis(720));
        assert_eq!(config.selection.debounce, Duration::from_millis(20));
    }

    fn rejects(raw: &str, needle: &str) {
        match ViewerConfig::from_toml_str(raw) {
            Ok(config) => panic!("accepted invalid config: {config:?}"),
            Err(err) => assert!(
                format!("{err:#}").contains(needle),
                "unexpected error for {raw:?}: {err:#}"
            ),
        }
    }

    #[test]
    fn defaults_are_valid() {
        ViewerConfig::default().validate().unwrap();
    }

    #[test]
    fn inverted_scale_bounds_are_rejected() {
        rejects("min_scale = 5.0\nmax_scale = 1.0", "exceeds max_scale");
    }

    #[test]
    fn non_finite_and_non_positive_scales_are_rejected() {
        rejects("min_scale = nan", "finite and positive");
        rejects("max_scale = inf", "finite and positive");
        rejects("min_scale = 0.0", "finite and positive");
        rejects("max_scale = -2.0", "finite and positive");
    }

    #[test]
    fn zero_retry_and_poll_settings_are_rejected() {
        rejects("[retry]\nbase_delay_ms = 0", "base_delay_ms");
        rejects("[retry]\nmax_attempts = 0", "max_attempts");
        rejects("[retry]\nbase_delay_ms = 900\nmax_delay_ms = 100", "max_delay_ms");
        rejects("[surface_wait]\npoll_interval_ms = 0", "poll_interval_ms");
        rejects("[surface_wait]\nmax_polls = 0", "max_polls");
    }

    #[test]
    fn selection_ratios_must_be_fractions() {
        rejects("[selection]\nmax_area_ratio = 0.0", "(0, 1]");
        rejects("[selection]\nmax_extent_ratio = 1.5", "(0, 1]");
    }

    #[test]
    fn negative_windows_and_padding_are_rejected() {
        rejects("canvas_buffer_viewports = -1.0", "buffer windows");
        rejects("page_gap = -4.0", "page_gap");
        rejects("[fit_width]\npadding = -10.0", "fit_width");
    }

    #[test]
    fn invalid_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "min_scale = 5.0\nmax_scale = 1.0\n").unwrap();
        let err = ViewerConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("exceeds max_scale"));
    }

    #[test]
    fn clamp_scale_tolerates_unvalidated_bounds() {
        let config = ViewerConfig {
            min_scale: 5.0,
            max_scale: 1.0,
            ..ViewerConfig::default()
        };
        assert_eq!(config.clamp_scale(3.0), 5.0);
        assert_eq!(ViewerConfig::default().clamp_scale(f32::NAN), 0.25);
        assert_eq!(ViewerConfig::default().clamp_scale(0.1), 0.25);
        assert_eq!(ViewerConfig::default().clamp_scale(10.0), 4.0);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ViewerConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ViewerConfig::default());
    }

    #[test]
    fn surface_wait_budget_is_about_one_second() {
        assert_eq!(
            SurfaceWaitConfig::default().budget(),
            Duration::from_millis(960)
        );
    }
}
