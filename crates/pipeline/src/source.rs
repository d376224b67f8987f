//! Compressed source images and the capability that reads them.

use std::{
    fmt,
    io::Cursor,
    path::{Path, PathBuf},
    sync::Arc,
};

use exif::{In, Reader, Tag};
use hwimg_core::format::{CodingType, Orientation};
use image::{ImageFormat, ImageReader};

use crate::error::PipelineError;

/// Metadata read alongside the compressed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
    pub coding_type: CodingType,
}

/// Reads a compressed image and its metadata from a path.
pub trait SourceReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<(Vec<u8>, ImageInfo), PipelineError>;
}

/// A successfully read source image.
///
/// There is no "failed" handle: a read that fails yields an error and no
/// `ImageFile`. The bytes are shared, so clones are cheap.
#[derive(Clone)]
pub struct ImageFile {
    filename: PathBuf,
    data: Arc<[u8]>,
    info: ImageInfo,
}

impl ImageFile {
    /// Wrap bytes already in memory.
    pub fn from_parts(
        filename: impl Into<PathBuf>,
        data: Vec<u8>,
        info: ImageInfo,
    ) -> Result<Self, PipelineError> {
        let filename = filename.into();
        if data.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "{} is empty",
                filename.display()
            )));
        }
        if info.width == 0 || info.height == 0 {
            return Err(PipelineError::InvalidInput(format!(
                "{} has no dimensions",
                filename.display()
            )));
        }
        Ok(Self {
            filename,
            data: data.into(),
            info,
        })
    }

    pub fn load(path: impl AsRef<Path>, reader: &dyn SourceReader) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let (data, info) = reader.read(path)?;
        let file = Self::from_parts(path, data, info)?;
        tracing::debug!(
            file = %path.display(),
            width = info.width,
            height = info.height,
            coding = info.coding_type.name(),
            "loaded source image"
        );
        Ok(file)
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn orientation(&self) -> Orientation {
        self.info.orientation
    }

    pub fn coding_type(&self) -> CodingType {
        self.info.coding_type
    }

    pub fn info(&self) -> ImageInfo {
        self.info
    }

    pub fn image_size(&self) -> usize {
        self.data.len()
    }

    pub fn image_buffer(&self) -> &[u8] {
        &self.data
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }
}

impl fmt::Debug for ImageFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageFile")
            .field("filename", &self.filename)
            .field("bytes", &self.data.len())
            .field("info", &self.info)
            .finish()
    }
}

/// Reads files from the local filesystem and probes them with the `image`
/// crate; orientation comes from EXIF when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

impl FsSource {
    /// Probe bytes already in memory.
    pub fn probe(data: &[u8]) -> Result<ImageInfo, PipelineError> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        let coding_type = match reader.format() {
            Some(ImageFormat::Jpeg) => CodingType::Jpeg,
            Some(ImageFormat::Png) => CodingType::Png,
            Some(ImageFormat::Gif) => CodingType::Gif,
            Some(ImageFormat::Bmp) => CodingType::Bmp,
            Some(ImageFormat::WebP) => CodingType::Webp,
            Some(other) => {
                return Err(PipelineError::Unsupported(format!(
                    "image format {other:?}"
                )));
            }
            None => {
                return Err(PipelineError::InvalidInput(
                    "unrecognised image format".into(),
                ));
            }
        };
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        Ok(ImageInfo {
            width,
            height,
            orientation: exif_orientation(data),
            coding_type,
        })
    }
}

impl SourceReader for FsSource {
    fn read(&self, path: &Path) -> Result<(Vec<u8>, ImageInfo), PipelineError> {
        let data = std::fs::read(path).map_err(|e| PipelineError::io(path, e))?;
        let info = Self::probe(&data)?;
        Ok((data, info))
    }
}

fn exif_orientation(data: &[u8]) -> Orientation {
    let Ok(exif) = Reader::new().read_from_container(&mut Cursor::new(data)) else {
        return Orientation::Normal;
    };
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .map(Orientation::from_exif)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{scratch_path, solid_jpeg};

    fn info(width: u32, height: u32) -> ImageInfo {
        ImageInfo {
            width,
            height,
            orientation: Orientation::Normal,
            coding_type: CodingType::Jpeg,
        }
    }

    #[test]
    fn empty_buffers_never_become_handles() {
        let err = ImageFile::from_parts("empty.jpg", Vec::new(), info(4, 4)).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert!(ImageFile::from_parts("flat.jpg", vec![1], info(0, 4)).is_err());
    }

    #[test]
    fn probe_reads_format_and_size() {
        let jpeg = solid_jpeg(64, 48, [90, 90, 90]);
        let info = FsSource::probe(&jpeg).unwrap();
        assert_eq!((info.width, info.height), (64, 48));
        assert_eq!(info.coding_type, CodingType::Jpeg);
        assert_eq!(info.orientation, Orientation::Normal);
        assert!(FsSource::probe(b"plain text").is_err());
    }

    #[test]
    fn load_from_disk() {
        let path = scratch_path("source-load.jpg");
        std::fs::write(&path, solid_jpeg(20, 10, [1, 2, 3])).unwrap();
        let file = ImageFile::load(&path, &FsSource).unwrap();
        assert_eq!(file.width(), 20);
        assert_eq!(file.height(), 10);
        assert_eq!(file.filename(), path.as_path());
        assert_eq!(file.image_size(), file.image_buffer().len());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ImageFile::load(scratch_path("does-not-exist.jpg"), &FsSource).unwrap_err();
        assert_eq!(err.code(), "io_error");
    }
}
