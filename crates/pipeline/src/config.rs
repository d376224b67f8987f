//! Timeouts and tunables shared by every pipeline.

use std::time::Duration;

/// Port enable/disable acknowledgement.
pub const DEFAULT_PORT_COMMAND: Duration = Duration::from_millis(1000);
/// Component state transition acknowledgement.
pub const DEFAULT_STATE_CHANGE: Duration = Duration::from_millis(1000);
/// Wait for the decoder to report the stream geometry after the last input
/// buffer was queued.
pub const DEFAULT_SETTINGS_CHANGED: Duration = Duration::from_millis(2000);
/// Wait for a free input buffer.
pub const DEFAULT_INPUT_BUFFER: Duration = Duration::from_millis(1000);
/// Wait for one output buffer to be filled.
pub const DEFAULT_OUTPUT_BUFFER: Duration = Duration::from_millis(2000);
/// Slice used while waiting for output so repeated settings changes are seen.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// JPEG quality used when the caller does not pick one.
pub const DEFAULT_ENCODE_QUALITY: u8 = 80;
/// Largest CPU-side output buffer requested from the resize stage.
pub const DEFAULT_READBACK_CHUNK: usize = 1 << 20;

/// Every bounded wait a pipeline performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineTimeouts {
    pub port_command: Duration,
    pub state_change: Duration,
    pub settings_changed: Duration,
    pub input_buffer: Duration,
    pub output_buffer: Duration,
    pub poll_interval: Duration,
}

impl Default for PipelineTimeouts {
    fn default() -> Self {
        Self {
            port_command: DEFAULT_PORT_COMMAND,
            state_change: DEFAULT_STATE_CHANGE,
            settings_changed: DEFAULT_SETTINGS_CHANGED,
            input_buffer: DEFAULT_INPUT_BUFFER,
            output_buffer: DEFAULT_OUTPUT_BUFFER,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PipelineTimeouts {
    /// The same timeout for every wait; the poll interval is capped by it.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            port_command: timeout,
            state_change: timeout,
            settings_changed: timeout,
            input_buffer: timeout,
            output_buffer: timeout,
            poll_interval: DEFAULT_POLL_INTERVAL.min(timeout),
        }
    }
}

/// Pipeline construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    pub timeouts: PipelineTimeouts,
    /// JPEG quality (1..=100) for encode and re-encode.
    pub encode_quality: u8,
    /// Upper bound for each CPU readback buffer.
    pub readback_chunk: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeouts: PipelineTimeouts::default(),
            encode_quality: DEFAULT_ENCODE_QUALITY,
            readback_chunk: DEFAULT_READBACK_CHUNK,
        }
    }
}

impl PipelineConfig {
    pub fn with_timeouts(mut self, timeouts: PipelineTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_encode_quality(mut self, quality: u8) -> Self {
        self.encode_quality = quality;
        self
    }

    pub fn with_readback_chunk(mut self, bytes: usize) -> Self {
        self.readback_chunk = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_caps_poll_interval() {
        let t = PipelineTimeouts::uniform(Duration::from_millis(5));
        assert_eq!(t.settings_changed, Duration::from_millis(5));
        assert_eq!(t.poll_interval, Duration::from_millis(5));
        let t = PipelineTimeouts::uniform(Duration::from_secs(3));
        assert_eq!(t.poll_interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn builder_overrides_defaults() {
        let cfg = PipelineConfig::default()
            .with_encode_quality(95)
            .with_readback_chunk(4096);
        assert_eq!(cfg.encode_quality, 95);
        assert_eq!(cfg.readback_chunk, 4096);
        assert_eq!(cfg.timeouts, PipelineTimeouts::default());
    }
}
