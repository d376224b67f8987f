use std::{sync::Arc, time::Instant};

use hwimg_component::{
    component::{Component, HardwareBackend},
    port::ComponentRole,
};
use hwimg_core::{
    clamp::HARDWARE_MAX_EDGE,
    format::{BYTES_PER_PIXEL, FrameGeometry},
    metrics::StageMetrics,
};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::{
    config::{PipelineConfig, PipelineTimeouts},
    decoder::validate,
    encoder::{build_encoder, drain_encoded},
    error::PipelineError,
    renegotiate::{DecodeFront, Downstream},
    source::ImageFile,
    stage::{self, Chain},
};

/// Downstream that tunnels the resize output into a JPEG encoder.
struct EncodeStage {
    quality: u8,
    encoder: Option<Arc<dyn Component>>,
}

impl Downstream for EncodeStage {
    fn attach(
        &mut self,
        backend: &dyn HardwareBackend,
        resize: &Arc<dyn Component>,
        chain: &mut Chain,
        config: &PipelineConfig,
    ) -> Result<(), PipelineError> {
        let geometry = resize
            .port_definition(ComponentRole::Resize.output_port())?
            .geometry()
            .ok_or_else(|| PipelineError::Protocol("resize output has no geometry".into()))?;
        let encoder = build_encoder(backend, chain, &geometry, self.quality, config)?;
        encoder.allocate_buffers(ComponentRole::ImageEncode.output_port())?;
        chain.connect(backend, resize, &encoder, &config.timeouts)?;
        stage::enable_ports(&encoder, &config.timeouts)?;
        self.encoder = Some(encoder);
        Ok(())
    }

    fn start(&mut self, timeouts: &PipelineTimeouts) -> Result<(), PipelineError> {
        match &self.encoder {
            Some(encoder) => stage::start(encoder, timeouts),
            None => Err(PipelineError::Protocol("encoder is not attached".into())),
        }
    }

    fn detach(&mut self) {
        self.encoder = None;
    }
}

struct ReencoderState {
    front: DecodeFront,
    stage: EncodeStage,
    dest: Vec<u8>,
}

/// Hardware decode -> resize -> JPEG encode of a source image.
///
/// The result is kept in a buffer owned by the re-encoder; it is replaced by
/// the next call and released by [`ImageReencoder::close`].
pub struct ImageReencoder {
    state: Mutex<ReencoderState>,
    metrics: StageMetrics,
}

impl ImageReencoder {
    pub fn new(backend: Arc<dyn HardwareBackend>, config: PipelineConfig) -> Self {
        Self {
            state: Mutex::new(ReencoderState {
                stage: EncodeStage {
                    quality: config.encode_quality,
                    encoder: None,
                },
                front: DecodeFront::new(backend, config),
                dest: Vec::new(),
            }),
            metrics: StageMetrics::default(),
        }
    }

    /// Re-encode `source` at `width`x`height`, which should already be
    /// clamped.
    pub fn reencode(
        &self,
        source: &ImageFile,
        width: u32,
        height: u32,
    ) -> Result<MappedMutexGuard<'_, [u8]>, PipelineError> {
        if width > HARDWARE_MAX_EDGE || height > HARDWARE_MAX_EDGE {
            return Err(PipelineError::InvalidInput(format!(
                "target {width}x{height} exceeds the {HARDWARE_MAX_EDGE} pixel encoder limit"
            )));
        }
        let data = source.image_buffer();
        let stride = width as usize * BYTES_PER_PIXEL;
        let target: FrameGeometry =
            validate(source.coding_type(), data, width, height, stride, usize::MAX)?;

        let started = Instant::now();
        let mut state = self.state.lock();
        let ReencoderState { front, stage, dest } = &mut *state;
        *dest = Vec::new();
        let result = (|| -> Result<(), PipelineError> {
            front.build(source.coding_type(), data.len(), target)?;
            front.feed(data, stage)?;
            front.await_settings(stage)?;
            let encoder = stage
                .encoder
                .clone()
                .ok_or_else(|| PipelineError::Protocol("encoder is not attached".into()))?;
            let timeouts = front.config().timeouts;
            drain_encoded(&encoder, &timeouts, dest, |c| {
                front.wait_filled(c, &mut *stage)
            })
        })();
        front.teardown(stage);

        match result {
            Ok(()) => {
                self.metrics.record(started.elapsed());
                tracing::debug!(
                    file = %source.filename().display(),
                    width,
                    height,
                    bytes = dest.len(),
                    "image re-encoded"
                );
                Ok(MutexGuard::map(state, |s| s.dest.as_mut_slice()))
            }
            Err(err) => {
                *dest = Vec::new();
                self.metrics.record_failure();
                tracing::warn!(
                    file = %source.filename().display(),
                    error = %err,
                    code = err.code(),
                    "image re-encode failed"
                );
                Err(err)
            }
        }
    }

    /// Free the destination buffer and any hardware resources.
    pub fn close(&self) {
        let mut state = self.state.lock();
        let ReencoderState { front, stage, dest } = &mut *state;
        front.teardown(stage);
        *dest = Vec::new();
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }
}

impl Drop for ImageReencoder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        source::{FsSource, ImageInfo},
        test_support::{fast_config, gradient_jpeg},
    };
    use hwimg_component::sim::{SimBackend, SimFaults};
    use hwimg_core::format::{CodingType, Orientation};

    fn image_file(bytes: Vec<u8>) -> ImageFile {
        let info = FsSource::probe(&bytes).unwrap_or(ImageInfo {
            width: 1,
            height: 1,
            orientation: Orientation::Normal,
            coding_type: CodingType::Jpeg,
        });
        ImageFile::from_parts("memory.jpg", bytes, info).unwrap()
    }

    #[test]
    fn reencodes_at_target_size() {
        let backend = SimBackend::new();
        let reencoder = ImageReencoder::new(Arc::new(backend.clone()), fast_config());
        let source = image_file(gradient_jpeg(400, 300));
        let jpeg = reencoder.reencode(&source, 160, 120).unwrap().to_vec();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (160, 120));
        assert_eq!(backend.live_components(), 0);
        assert_eq!(backend.components_created(), 3);
    }

    #[test]
    fn repeated_settings_change_still_encodes() {
        let backend = SimBackend::with_faults(SimFaults {
            repeat_settings_changed: true,
            ..SimFaults::default()
        });
        let reencoder = ImageReencoder::new(Arc::new(backend.clone()), fast_config());
        let source = image_file(gradient_jpeg(64, 64));
        let jpeg = reencoder.reencode(&source, 32, 32).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn failure_leaves_no_output_and_no_components() {
        let backend = SimBackend::with_faults(SimFaults {
            unavailable: Some(ComponentRole::ImageEncode),
            ..SimFaults::default()
        });
        let reencoder = ImageReencoder::new(Arc::new(backend.clone()), fast_config());
        let source = image_file(gradient_jpeg(64, 64));
        let err = reencoder.reencode(&source, 32, 32).unwrap_err();
        assert_eq!(err.code(), "resource_unavailable");
        assert_eq!(backend.live_components(), 0);

        backend.update_faults(|f| f.unavailable = None);
        assert!(!reencoder.reencode(&source, 32, 32).unwrap().is_empty());
        reencoder.close();
        assert_eq!(reencoder.metrics().failures(), 1);
        assert_eq!(reencoder.metrics().total_samples(), 1);
    }

    #[test]
    fn oversize_targets_are_rejected() {
        let backend = SimBackend::new();
        let reencoder = ImageReencoder::new(Arc::new(backend.clone()), fast_config());
        let source = image_file(gradient_jpeg(16, 16));
        let err = reencoder.reencode(&source, 4096, 16).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert_eq!(backend.components_created(), 0);
    }
}
