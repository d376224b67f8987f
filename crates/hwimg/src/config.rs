//! Top-level configuration for the facade.

use std::time::Duration;

use hwimg_core::clamp::ClampPolicy;
use hwimg_pipeline::config::{PipelineConfig, PipelineTimeouts};

/// Default number of texture requests that may wait for the worker.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Everything the facade needs: pipeline timeouts and tunables, the clamp
/// policy and the texture queue depth.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use hwimg::config::HwimgConfig;
///
/// let config = HwimgConfig::builder()
///     .uniform_timeout(Duration::from_millis(500))
///     .encode_quality(90)
///     .queue_depth(8)
///     .build();
/// assert_eq!(config.pipeline.encode_quality, 90);
/// assert_eq!(config.queue_depth, 8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HwimgConfig {
    pub pipeline: PipelineConfig,
    pub clamp: ClampPolicy,
    /// Pending texture requests; 0 means unbounded.
    pub queue_depth: usize,
}

impl Default for HwimgConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            clamp: ClampPolicy::default(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl HwimgConfig {
    pub fn builder() -> HwimgConfigBuilder {
        HwimgConfigBuilder::default()
    }

    /// Defaults overridden by `HWIMG_*` environment variables.
    ///
    /// Recognised: `HWIMG_TIMEOUT_MS` (every wait), `HWIMG_SETTINGS_TIMEOUT_MS`,
    /// `HWIMG_ENCODE_QUALITY`, `HWIMG_QUEUE_DEPTH`, `HWIMG_IMAGE_RES`,
    /// `HWIMG_FANART_RES`, `HWIMG_DISPLAY_WIDTH`, `HWIMG_DISPLAY_HEIGHT`.
    /// Unparsable or out of range values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`HwimgConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(key, value = %raw, error = %err, "ignoring invalid setting");
                    None
                }
            }
        };
        let bounded = |key: &str| -> Option<u32> {
            let value = number(key)?;
            match u32::try_from(value) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(key, value, "ignoring out of range setting");
                    None
                }
            }
        };

        let mut builder = Self::builder();
        if let Some(ms) = number("HWIMG_TIMEOUT_MS") {
            builder = builder.uniform_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = number("HWIMG_SETTINGS_TIMEOUT_MS") {
            builder.config.pipeline.timeouts.settings_changed = Duration::from_millis(ms);
        }
        if let Some(q) = number("HWIMG_ENCODE_QUALITY") {
            builder = builder.encode_quality(q.clamp(1, 100) as u8);
        }
        if let Some(depth) = bounded("HWIMG_QUEUE_DEPTH") {
            builder = builder.queue_depth(depth as usize);
        }
        if let Some(res) = bounded("HWIMG_IMAGE_RES") {
            builder.config.clamp.image_res = res;
        }
        if let Some(res) = bounded("HWIMG_FANART_RES") {
            builder.config.clamp.fanart_res = res;
        }
        if let Some(w) = bounded("HWIMG_DISPLAY_WIDTH") {
            builder.config.clamp.display_width = w;
        }
        if let Some(h) = bounded("HWIMG_DISPLAY_HEIGHT") {
            builder.config.clamp.display_height = h;
        }
        builder.build()
    }
}

/// Builder for [`HwimgConfig`].
#[derive(Debug, Clone, Default)]
pub struct HwimgConfigBuilder {
    config: HwimgConfig,
}

impl HwimgConfigBuilder {
    pub fn timeouts(mut self, timeouts: PipelineTimeouts) -> Self {
        self.config.pipeline.timeouts = timeouts;
        self
    }

    /// Use one timeout for every hardware wait.
    pub fn uniform_timeout(self, timeout: Duration) -> Self {
        self.timeouts(PipelineTimeouts::uniform(timeout))
    }

    pub fn encode_quality(mut self, quality: u8) -> Self {
        self.config.pipeline.encode_quality = quality;
        self
    }

    pub fn readback_chunk(mut self, bytes: usize) -> Self {
        self.config.pipeline.readback_chunk = bytes;
        self
    }

    pub fn clamp(mut self, policy: ClampPolicy) -> Self {
        self.config.clamp = policy;
        self
    }

    /// Display size used to cap default thumbnail bounds.
    pub fn display(mut self, width: u32, height: u32) -> Self {
        self.config.clamp.display_width = width;
        self.config.clamp.display_height = height;
        self
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.config.queue_depth = depth;
        self
    }

    pub fn build(self) -> HwimgConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("HWIMG_TIMEOUT_MS", "300"),
            ("HWIMG_SETTINGS_TIMEOUT_MS", "900"),
            ("HWIMG_ENCODE_QUALITY", "250"),
            ("HWIMG_QUEUE_DEPTH", "4"),
            ("HWIMG_DISPLAY_WIDTH", "1920"),
            ("HWIMG_IMAGE_RES", "not a number"),
        ]
        .into_iter()
        .collect();
        let config = HwimgConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        let timeouts = config.pipeline.timeouts;
        assert_eq!(timeouts.port_command, Duration::from_millis(300));
        assert_eq!(timeouts.settings_changed, Duration::from_millis(900));
        assert_eq!(config.pipeline.encode_quality, 100);
        assert_eq!(config.queue_depth, 4);
        assert_eq!(config.clamp.display_width, 1920);
        assert_eq!(config.clamp.image_res, ClampPolicy::default().image_res);
    }

    #[test]
    fn out_of_range_values_are_ignored() {
        let vars: HashMap<&str, &str> = [
            ("HWIMG_FANART_RES", "4294967296"),
            ("HWIMG_DISPLAY_HEIGHT", "99999999999"),
            ("HWIMG_IMAGE_RES", "300000000"),
        ]
        .into_iter()
        .collect();
        let config = HwimgConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        let defaults = ClampPolicy::default();
        assert_eq!(config.clamp.fanart_res, defaults.fanart_res);
        assert_eq!(config.clamp.display_height, defaults.display_height);
        assert_eq!(config.clamp.image_res, 300_000_000);
        assert_eq!(config.clamp.bounds_for(0, 0, 4000, 3000, false), (2048, 2048));
    }

    #[test]
    fn empty_lookup_is_default() {
        assert_eq!(HwimgConfig::from_lookup(|_| None), HwimgConfig::default());
    }
}
