use std::{sync::Arc, time::Instant};

use hwimg_component::component::HardwareBackend;
use hwimg_core::{
    format::{CodingType, FrameGeometry},
    metrics::StageMetrics,
};
use parking_lot::Mutex;

use crate::{
    config::PipelineConfig,
    error::PipelineError,
    readback::CpuReadback,
    renegotiate::DecodeFront,
    source::ImageFile,
};

struct DecoderState {
    front: DecodeFront,
    readback: CpuReadback,
    decoded: Option<FrameGeometry>,
}

/// Hardware decode -> resize into CPU memory.
///
/// Calls on one instance are serialized; separate instances run in parallel.
/// The component chain is built for each call and torn down before it
/// returns, whether the call succeeded or not.
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use hwimg_pipeline::prelude::*;
///
/// let decoder = ImageDecoder::new(backend, PipelineConfig::default());
/// let mut pixels = vec![0u8; 640 * 120];
/// decoder.decode(&jpeg, 160, 120, 640, &mut pixels)?;
/// assert_eq!(decoder.decoded_height(), 120);
/// ```
pub struct ImageDecoder {
    state: Mutex<DecoderState>,
    metrics: StageMetrics,
}

impl ImageDecoder {
    pub fn new(backend: Arc<dyn HardwareBackend>, config: PipelineConfig) -> Self {
        Self {
            state: Mutex::new(DecoderState {
                front: DecodeFront::new(backend, config),
                readback: CpuReadback::default(),
                decoded: None,
            }),
            metrics: StageMetrics::default(),
        }
    }

    /// Decode `data` and scale it to `width`x`height`, writing
    /// `height * stride` bytes of RGBA into the front of `out`.
    ///
    /// The target size should already be clamped to the hardware limits.
    /// Nothing is written on failure.
    pub fn decode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        out: &mut [u8],
    ) -> Result<(), PipelineError> {
        self.decode_coded(CodingType::AutoDetect, data, width, height, stride, out)
    }

    /// Decode a loaded source image.
    pub fn decode_file(
        &self,
        file: &ImageFile,
        width: u32,
        height: u32,
        stride: usize,
        out: &mut [u8],
    ) -> Result<(), PipelineError> {
        self.decode_coded(
            file.coding_type(),
            file.image_buffer(),
            width,
            height,
            stride,
            out,
        )
    }

    fn decode_coded(
        &self,
        coding: CodingType,
        data: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        out: &mut [u8],
    ) -> Result<(), PipelineError> {
        let target = validate(coding, data, width, height, stride, out.len())?;
        let started = Instant::now();
        let mut state = self.state.lock();
        let DecoderState {
            front,
            readback,
            decoded,
        } = &mut *state;

        // Decode into scratch so a failure never leaves partial output.
        let mut scratch = vec![0u8; target.len()];
        let result = (|| -> Result<(), PipelineError> {
            front.build(coding, data.len(), target)?;
            front.feed(data, readback)?;
            front.await_settings(readback)?;
            readback.drain(front, &mut scratch, target.len())
        })();
        front.teardown(readback);

        match result {
            Ok(()) => {
                out[..target.len()].copy_from_slice(&scratch);
                *decoded = Some(target);
                self.metrics.record(started.elapsed());
                tracing::debug!(
                    width,
                    height,
                    stride,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "image decoded"
                );
                Ok(())
            }
            Err(err) => {
                self.metrics.record_failure();
                tracing::warn!(error = %err, code = err.code(), "image decode failed");
                Err(err)
            }
        }
    }

    /// Width of the last successful decode, 0 before the first one.
    pub fn decoded_width(&self) -> u32 {
        self.state.lock().decoded.map_or(0, |g| g.width())
    }

    pub fn decoded_height(&self) -> u32 {
        self.state.lock().decoded.map_or(0, |g| g.height())
    }

    pub fn decoded_stride(&self) -> usize {
        self.state.lock().decoded.map_or(0, |g| g.stride())
    }

    /// Release hardware resources. Waits for a call in progress.
    pub fn close(&self) {
        let mut state = self.state.lock();
        let DecoderState {
            front, readback, ..
        } = &mut *state;
        front.teardown(readback);
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }
}

impl Drop for ImageDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reject bad requests before touching hardware.
pub(crate) fn validate(
    coding: CodingType,
    data: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    out_len: usize,
) -> Result<FrameGeometry, PipelineError> {
    if data.is_empty() {
        return Err(PipelineError::InvalidInput("no compressed data".into()));
    }
    if !coding.hardware_decodable() {
        return Err(PipelineError::Unsupported(format!(
            "hardware cannot decode {}",
            coding.name()
        )));
    }
    let target = FrameGeometry::new(width, height, stride).ok_or_else(|| {
        PipelineError::InvalidInput(format!(
            "invalid target {width}x{height} stride {stride}"
        ))
    })?;
    if out_len < target.len() {
        return Err(PipelineError::InvalidInput(format!(
            "output holds {out_len} bytes, {} needed",
            target.len()
        )));
    }
    Ok(target)
}
