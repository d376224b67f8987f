use std::{path::Path, sync::Arc, time::Instant};

use hwimg_component::{
    component::{Component, HardwareBackend},
    port::{BufferHeader, ComponentRole},
};
use hwimg_core::{
    clamp::HARDWARE_MAX_EDGE,
    format::{CodingType, FourCc, FrameGeometry},
    metrics::StageMetrics,
};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::{
    config::{PipelineConfig, PipelineTimeouts},
    error::PipelineError,
    sink::ImageWriter,
    stage::{self, Chain},
};

struct EncoderState {
    chain: Chain,
    output: Vec<u8>,
}

/// Single-stage hardware JPEG encoder for RGBA surfaces.
pub struct ImageEncoder {
    backend: Arc<dyn HardwareBackend>,
    config: PipelineConfig,
    state: Mutex<EncoderState>,
    metrics: StageMetrics,
}

impl ImageEncoder {
    pub fn new(backend: Arc<dyn HardwareBackend>, config: PipelineConfig) -> Self {
        Self {
            backend,
            config,
            state: Mutex::new(EncoderState {
                chain: Chain::default(),
                output: Vec::new(),
            }),
            metrics: StageMetrics::default(),
        }
    }

    /// Encode a `width`x`height` RGBA surface whose rows are `pitch` bytes
    /// apart. `quality` overrides the configured JPEG quality.
    ///
    /// The returned bytes live in the encoder and stay locked until the guard
    /// is dropped.
    pub fn encode(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
        quality: Option<u8>,
    ) -> Result<MappedMutexGuard<'_, [u8]>, PipelineError> {
        let geometry = surface_geometry(pixels.len(), width, height, pitch)?;
        let quality = quality.unwrap_or(self.config.encode_quality);
        if !(1..=100).contains(&quality) {
            return Err(PipelineError::InvalidInput(format!(
                "jpeg quality {quality} out of range"
            )));
        }
        let started = Instant::now();
        let mut state = self.state.lock();
        let EncoderState { chain, output } = &mut *state;
        output.clear();
        let timeouts = self.config.timeouts;
        let result = (|| -> Result<(), PipelineError> {
            let encoder = build_encoder(self.backend.as_ref(), chain, &geometry, quality, &self.config)?;
            encoder.allocate_buffers(ComponentRole::ImageEncode.input_port())?;
            encoder.allocate_buffers(ComponentRole::ImageEncode.output_port())?;
            stage::enable_ports(&encoder, &timeouts)?;
            stage::start(&encoder, &timeouts)?;
            feed_raw(&encoder, &pixels[..geometry.len()], &timeouts)?;
            drain_encoded(&encoder, &timeouts, output, |c| {
                Ok(c.wait_filled(timeouts.output_buffer)?)
            })
        })();
        chain.teardown(&timeouts);

        match result {
            Ok(()) => {
                self.metrics.record(started.elapsed());
                tracing::debug!(width, height, quality, bytes = output.len(), "surface encoded");
                Ok(MutexGuard::map(state, |s| s.output.as_mut_slice()))
            }
            Err(err) => {
                output.clear();
                self.metrics.record_failure();
                tracing::warn!(error = %err, code = err.code(), "surface encode failed");
                Err(err)
            }
        }
    }

    /// Encode a surface and store it at `dest` through `writer`. Only RGBA
    /// surfaces are accepted. Returns the number of bytes written.
    #[allow(clippy::too_many_arguments)]
    pub fn create_thumbnail_from_surface(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        format: FourCc,
        pitch: usize,
        dest: &Path,
        writer: &dyn ImageWriter,
    ) -> Result<usize, PipelineError> {
        if format != FourCc::RGBA {
            return Err(PipelineError::Unsupported(format!(
                "surface format {format}"
            )));
        }
        let encoded = self.encode(pixels, width, height, pitch, None)?;
        writer.write(dest, &encoded)?;
        Ok(encoded.len())
    }

    /// Drop the last output and any hardware resources.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.chain.teardown(&self.config.timeouts);
        state.output = Vec::new();
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }
}

fn surface_geometry(
    len: usize,
    width: u32,
    height: u32,
    pitch: usize,
) -> Result<FrameGeometry, PipelineError> {
    let geometry = FrameGeometry::new(width, height, pitch).ok_or_else(|| {
        PipelineError::InvalidInput(format!("invalid surface {width}x{height} pitch {pitch}"))
    })?;
    if width > HARDWARE_MAX_EDGE || height > HARDWARE_MAX_EDGE {
        return Err(PipelineError::InvalidInput(format!(
            "surface {width}x{height} exceeds the {HARDWARE_MAX_EDGE} pixel encoder limit"
        )));
    }
    if len < geometry.len() {
        return Err(PipelineError::InvalidInput(format!(
            "surface holds {len} bytes, {} needed",
            geometry.len()
        )));
    }
    Ok(geometry)
}

/// Create an encoder whose input carries `geometry` and whose output is JPEG.
pub(crate) fn build_encoder(
    backend: &dyn HardwareBackend,
    chain: &mut Chain,
    geometry: &FrameGeometry,
    quality: u8,
    config: &PipelineConfig,
) -> Result<Arc<dyn Component>, PipelineError> {
    let encoder = chain.create(backend, ComponentRole::ImageEncode)?;
    let input = ComponentRole::ImageEncode.input_port();
    let output = ComponentRole::ImageEncode.output_port();

    let mut def = encoder.port_definition(input)?;
    def.set_rgba_frame(geometry);
    def.buffer_size = geometry.len().min(config.readback_chunk).max(1);
    encoder.set_port_definition(&def)?;

    let mut def = encoder.port_definition(output)?;
    def.width = geometry.width();
    def.height = geometry.height();
    def.coding = CodingType::Jpeg;
    encoder.set_port_definition(&def)?;
    encoder.set_quality(output, quality)?;
    Ok(encoder)
}

fn feed_raw(
    encoder: &Arc<dyn Component>,
    pixels: &[u8],
    timeouts: &PipelineTimeouts,
) -> Result<(), PipelineError> {
    let mut offset = 0;
    while offset < pixels.len() {
        let mut buffer = encoder.acquire_input(timeouts.input_buffer)?;
        offset += buffer.fill_from(&pixels[offset..]);
        let last = offset == pixels.len();
        buffer.flags.end_of_stream = last;
        buffer.flags.end_of_frame = last;
        encoder.empty_buffer(buffer)?;
    }
    Ok(())
}

/// Collect compressed output until the end-of-stream buffer. `wait` blocks
/// for the next filled buffer.
pub(crate) fn drain_encoded(
    encoder: &Arc<dyn Component>,
    timeouts: &PipelineTimeouts,
    dest: &mut Vec<u8>,
    mut wait: impl FnMut(&Arc<dyn Component>) -> Result<BufferHeader, PipelineError>,
) -> Result<(), PipelineError> {
    dest.clear();
    loop {
        let buffer = encoder.acquire_output(timeouts.output_buffer)?;
        encoder.fill_buffer(buffer)?;
        let filled = wait(encoder)?;
        dest.extend_from_slice(filled.payload());
        let end = filled.flags.end_of_stream;
        encoder.release_buffer(filled)?;
        if end {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decoder::ImageDecoder,
        sink::FsWriter,
        test_support::{fast_config, scratch_path},
    };
    use hwimg_component::sim::{SimBackend, SimFaults};

    fn padded_surface(width: u32, height: u32, pitch: usize, rgba: [u8; 4]) -> Vec<u8> {
        let mut pixels = vec![0xEE; pitch * height as usize];
        for row in pixels.chunks_mut(pitch) {
            for px in row[..width as usize * 4].chunks_exact_mut(4) {
                px.copy_from_slice(&rgba);
            }
        }
        pixels
    }

    #[test]
    fn encode_then_decode_reproduces_pixels() {
        let backend = SimBackend::new();
        let config = fast_config().with_encode_quality(95);
        let encoder = ImageEncoder::new(Arc::new(backend.clone()), config);
        let (w, h, pitch) = (48, 32, 48 * 4 + 64);
        let surface = padded_surface(w, h, pitch, [30, 160, 220, 255]);
        let jpeg = encoder.encode(&surface, w, h, pitch, None).unwrap().to_vec();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(backend.live_components(), 0);

        let decoder = ImageDecoder::new(Arc::new(backend.clone()), config);
        let mut out = vec![0u8; pitch * h as usize];
        decoder.decode(&jpeg, w, h, pitch, &mut out).unwrap();
        assert_eq!(decoder.decoded_stride(), pitch);
        for row in out.chunks(pitch) {
            for px in row[..w as usize * 4].chunks_exact(4) {
                assert!(px[0].abs_diff(30) <= 8, "{px:?}");
                assert!(px[1].abs_diff(160) <= 8, "{px:?}");
                assert!(px[2].abs_diff(220) <= 8, "{px:?}");
            }
        }
    }

    #[test]
    fn output_spanning_several_buffers_is_collected() {
        let backend = SimBackend::new();
        let encoder = ImageEncoder::new(Arc::new(backend), fast_config().with_encode_quality(100));
        let mut surface = vec![0u8; 256 * 256 * 4];
        for (i, byte) in surface.iter_mut().enumerate() {
            *byte = (i.wrapping_mul(2654435761) >> 7) as u8;
        }
        let jpeg = encoder.encode(&surface, 256, 256, 1024, None).unwrap();
        assert!(jpeg.len() > 16 * 1024);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn rejects_bad_surfaces() {
        let backend = SimBackend::new();
        let encoder = ImageEncoder::new(Arc::new(backend.clone()), fast_config());
        assert!(encoder.encode(&[0; 15], 2, 2, 8, None).is_err());
        assert!(encoder.encode(&[0; 16], 2, 2, 7, None).is_err());
        assert!(encoder.encode(&[0; 16], 2, 2, 8, Some(0)).is_err());
        let err = encoder
            .create_thumbnail_from_surface(
                &[0; 16],
                2,
                2,
                FourCc::I420,
                8,
                Path::new("unused.jpg"),
                &FsWriter,
            )
            .unwrap_err();
        assert_eq!(err.code(), "unsupported");
        assert_eq!(backend.components_created(), 0);
    }

    #[test]
    fn thumbnail_from_surface_is_written() {
        let backend = SimBackend::new();
        let encoder = ImageEncoder::new(Arc::new(backend), fast_config());
        let surface = padded_surface(16, 16, 64, [255, 0, 0, 255]);
        let dest = scratch_path("surface-thumb.jpg");
        let written = encoder
            .create_thumbnail_from_surface(&surface, 16, 16, FourCc::RGBA, 64, &dest, &FsWriter)
            .unwrap();
        let on_disk = std::fs::read(&dest).unwrap();
        assert_eq!(on_disk.len(), written);
        assert_eq!(&on_disk[..2], &[0xFF, 0xD8]);
        std::fs::remove_file(&dest).ok();
    }

    #[test]
    fn unavailable_encoder_is_reported() {
        let backend = SimBackend::with_faults(SimFaults {
            unavailable: Some(ComponentRole::ImageEncode),
            ..SimFaults::default()
        });
        let encoder = ImageEncoder::new(Arc::new(backend), fast_config());
        let surface = padded_surface(4, 4, 16, [0, 0, 0, 255]);
        let err = encoder.encode(&surface, 4, 4, 16, None).unwrap_err();
        assert_eq!(err.code(), "resource_unavailable");
        assert_eq!(encoder.metrics().failures(), 1);
    }
}
