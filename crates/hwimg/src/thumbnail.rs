//! File-level entry points: decode an image to memory, re-encode it as a
//! thumbnail, or encode a rendered surface.

use std::{path::Path, sync::Arc};

use hwimg_component::component::HardwareBackend;
use hwimg_core::format::{BYTES_PER_PIXEL, FourCc};
use hwimg_pipeline::{
    decoder::ImageDecoder,
    encoder::ImageEncoder,
    error::PipelineError,
    reencoder::ImageReencoder,
    sink::{FsWriter, ImageWriter},
    source::{FsSource, ImageFile, SourceReader},
};

use crate::config::HwimgConfig;

/// Packed RGBA pixels produced by [`Thumbnailer::decode_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub pixels: Vec<u8>,
}

/// Outcome of a thumbnail write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailInfo {
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
}

/// Owns one pipeline of each kind and routes file operations through them.
///
/// Each pipeline serializes its own callers, so a `Thumbnailer` can be shared
/// between threads; a decode and a thumbnail can run at the same time.
pub struct Thumbnailer {
    config: HwimgConfig,
    reader: Arc<dyn SourceReader>,
    writer: Arc<dyn ImageWriter>,
    decoder: ImageDecoder,
    encoder: ImageEncoder,
    reencoder: ImageReencoder,
}

impl Thumbnailer {
    /// Thumbnailer reading and writing the local filesystem.
    pub fn new(backend: Arc<dyn HardwareBackend>, config: HwimgConfig) -> Self {
        Self::with_io(backend, config, Arc::new(FsSource), Arc::new(FsWriter))
    }

    pub fn with_io(
        backend: Arc<dyn HardwareBackend>,
        config: HwimgConfig,
        reader: Arc<dyn SourceReader>,
        writer: Arc<dyn ImageWriter>,
    ) -> Self {
        Self {
            decoder: ImageDecoder::new(backend.clone(), config.pipeline),
            encoder: ImageEncoder::new(backend.clone(), config.pipeline),
            reencoder: ImageReencoder::new(backend, config.pipeline),
            config,
            reader,
            writer,
        }
    }

    pub fn config(&self) -> &HwimgConfig {
        &self.config
    }

    /// Read and probe `path`.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<ImageFile, PipelineError> {
        ImageFile::load(path, self.reader.as_ref())
    }

    /// Size `file` would be scaled to when asked for `width`x`height`.
    /// A zero bound picks the configured default.
    pub fn target_size(&self, file: &ImageFile, width: u32, height: u32) -> (u32, u32) {
        let (w, h, _) = self.config.clamp.fit(
            file.width(),
            file.height(),
            width,
            height,
            file.orientation().is_transposed(),
        );
        (w.max(1), h.max(1))
    }

    /// Decode `file` to packed RGBA no larger than `width`x`height`.
    pub fn decode_image(
        &self,
        file: &ImageFile,
        width: u32,
        height: u32,
    ) -> Result<DecodedImage, PipelineError> {
        let (width, height) = self.target_size(file, width, height);
        let stride = width as usize * BYTES_PER_PIXEL;
        let mut pixels = vec![0u8; stride * height as usize];
        self.decoder
            .decode_file(file, width, height, stride, &mut pixels)?;
        Ok(DecodedImage {
            width,
            height,
            stride,
            pixels,
        })
    }

    /// Scale the image at `source` to fit `width`x`height`, JPEG-encode it and
    /// write it to `dest`.
    pub fn create_thumb(
        &self,
        source: impl AsRef<Path>,
        width: u32,
        height: u32,
        dest: impl AsRef<Path>,
    ) -> Result<ThumbnailInfo, PipelineError> {
        let file = self.load(source)?;
        self.create_thumb_from(&file, width, height, dest.as_ref())
    }

    /// [`Thumbnailer::create_thumb`] for an image already in memory.
    pub fn create_thumb_from(
        &self,
        file: &ImageFile,
        width: u32,
        height: u32,
        dest: &Path,
    ) -> Result<ThumbnailInfo, PipelineError> {
        let (width, height) = self.target_size(file, width, height);
        let encoded = self.reencoder.reencode(file, width, height)?;
        self.writer.write(dest, &encoded)?;
        tracing::info!(
            source = %file.filename().display(),
            dest = %dest.display(),
            width,
            height,
            bytes = encoded.len(),
            "thumbnail created"
        );
        Ok(ThumbnailInfo {
            width,
            height,
            bytes: encoded.len(),
        })
    }

    /// Encode a rendered RGBA surface straight to a thumbnail file.
    #[allow(clippy::too_many_arguments)]
    pub fn create_thumbnail_from_surface(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        format: FourCc,
        pitch: usize,
        dest: impl AsRef<Path>,
    ) -> Result<usize, PipelineError> {
        self.encoder.create_thumbnail_from_surface(
            pixels,
            width,
            height,
            format,
            pitch,
            dest.as_ref(),
            self.writer.as_ref(),
        )
    }

    /// Release every pipeline's hardware resources.
    pub fn close(&self) {
        self.decoder.close();
        self.encoder.close();
        self.reencoder.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{jpeg_file, scratch_dir, solid_jpeg};
    use hwimg_component::sim::SimBackend;
    use hwimg_core::clamp::ClampPolicy;
    use std::time::Duration;

    fn thumbnailer(backend: &SimBackend) -> Thumbnailer {
        let config = HwimgConfig::builder()
            .uniform_timeout(Duration::from_millis(500))
            .build();
        Thumbnailer::new(Arc::new(backend.clone()), config)
    }

    #[test]
    fn thumb_fits_requested_box() {
        let backend = SimBackend::new();
        let thumbs = thumbnailer(&backend);
        let dir = scratch_dir("thumb_fits");
        let source = dir.join("source.jpg");
        std::fs::write(&source, solid_jpeg(400, 300, [40, 160, 220])).unwrap();
        let dest = dir.join("out/thumb.jpg");

        let info = thumbs.create_thumb(&source, 100, 100, &dest).unwrap();
        assert_eq!((info.width, info.height), (100, 75));
        let written = std::fs::read(&dest).unwrap();
        assert_eq!(written.len(), info.bytes);
        let decoded = image::load_from_memory(&written).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 75));
        assert_eq!(backend.live_components(), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn zero_bounds_use_display_limits() {
        let backend = SimBackend::new();
        let config = HwimgConfig::builder()
            .clamp(ClampPolicy {
                image_res: 720,
                ..ClampPolicy::default()
            })
            .display(64, 48)
            .build();
        let thumbs = Thumbnailer::new(Arc::new(backend), config);
        let file = jpeg_file(solid_jpeg(320, 240, [0, 0, 0]));
        assert_eq!(thumbs.target_size(&file, 0, 0), (64, 48));
    }

    #[test]
    fn decode_image_returns_packed_rgba() {
        let backend = SimBackend::new();
        let thumbs = thumbnailer(&backend);
        let file = jpeg_file(solid_jpeg(64, 64, [255, 0, 0]));
        let decoded = thumbs.decode_image(&file, 32, 32).unwrap();
        assert_eq!((decoded.width, decoded.height), (32, 32));
        assert_eq!(decoded.stride, 32 * 4);
        assert_eq!(decoded.pixels.len(), 32 * 32 * 4);
        assert!(decoded.pixels.chunks(4).all(|px| px[0] > 230 && px[3] == 255));
    }

    #[test]
    fn missing_source_is_an_io_error() {
        let backend = SimBackend::new();
        let thumbs = thumbnailer(&backend);
        let dir = scratch_dir("missing_source");
        let err = thumbs
            .create_thumb(dir.join("nope.jpg"), 10, 10, dir.join("out.jpg"))
            .unwrap_err();
        assert_eq!(err.code(), "io_error");
        assert_eq!(backend.components_created(), 0);
    }

    #[test]
    fn surface_thumbnail_is_written() {
        let backend = SimBackend::new();
        let thumbs = thumbnailer(&backend);
        let dir = scratch_dir("surface");
        let dest = dir.join("surface.jpg");
        let pixels = [90u8, 90, 90, 255].repeat(16 * 8);
        let bytes = thumbs
            .create_thumbnail_from_surface(&pixels, 16, 8, FourCc::RGBA, 64, &dest)
            .unwrap();
        assert_eq!(std::fs::metadata(&dest).unwrap().len() as usize, bytes);
        std::fs::remove_dir_all(&dir).ok();
    }
}
