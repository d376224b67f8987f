#![doc = include_str!("../README.md")]

pub mod config;
pub mod request;
pub mod subsystem;
pub mod thumbnail;

pub mod prelude {
    pub use crate::{
        config::{DEFAULT_QUEUE_DEPTH, HwimgConfig, HwimgConfigBuilder},
        request::{TextureHandle, TextureInfo},
        subsystem::{ImageSubsystem, SubsystemError},
        thumbnail::{DecodedImage, ThumbnailInfo, Thumbnailer},
    };
    pub use hwimg_component::prelude::*;
    pub use hwimg_core::prelude::*;
    pub use hwimg_pipeline::prelude::*;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{
        io::Cursor,
        path::PathBuf,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use hwimg_core::format::{CodingType, Orientation};
    use hwimg_pipeline::source::{ImageFile, ImageInfo};
    use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder};

    pub fn solid_jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, 95)
            .encode_image(&RgbImage::from_pixel(width, height, Rgb(rgb)))
            .unwrap();
        out.into_inner()
    }

    /// In-memory source image; dimensions come from the JPEG header.
    pub fn jpeg_file(data: Vec<u8>) -> ImageFile {
        let (width, height) = image::ImageReader::new(Cursor::new(&data))
            .with_guessed_format()
            .unwrap()
            .into_dimensions()
            .unwrap();
        let info = ImageInfo {
            width,
            height,
            orientation: Orientation::Normal,
            coding_type: CodingType::Jpeg,
        };
        ImageFile::from_parts("memory.jpg", data, info).unwrap()
    }

    /// Fresh directory under the system temp directory.
    pub fn scratch_dir(name: &str) -> PathBuf {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("hwimg-{}-{n}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
