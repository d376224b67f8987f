//! Pixel work behind the simulated blocks, done with the `image` crate.

use std::io::Cursor;

use hwimg_core::format::BYTES_PER_PIXEL;
use image::{ExtendedColorType, ImageEncoder, ImageReader, RgbaImage, imageops::FilterType};

use crate::error::HwError;

/// Packed RGBA frame moving between simulated components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SimFrame {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub pixels: Vec<u8>,
}

impl SimFrame {
    fn from_image(image: RgbaImage, stride: usize) -> Self {
        let (width, height) = image.dimensions();
        let row = width as usize * BYTES_PER_PIXEL;
        let stride = stride.max(row);
        let raw = image.into_raw();
        let pixels = if stride == row {
            raw
        } else {
            let mut padded = vec![0u8; stride * height as usize];
            for (dst, src) in padded.chunks_mut(stride).zip(raw.chunks(row)) {
                dst[..row].copy_from_slice(src);
            }
            padded
        };
        Self {
            width,
            height,
            stride,
            pixels,
        }
    }

    /// Rebuild a frame from strided bytes, as received on a raw input port.
    pub fn from_strided(
        width: u32,
        height: u32,
        stride: usize,
        bytes: &[u8],
    ) -> Result<Self, HwError> {
        let row = width as usize * BYTES_PER_PIXEL;
        if width == 0 || height == 0 || stride < row {
            return Err(HwError::BadParameter(format!(
                "frame {width}x{height} stride {stride}"
            )));
        }
        let needed = stride * (height as usize - 1) + row;
        if bytes.len() < needed {
            return Err(HwError::StreamCorrupt(format!(
                "frame needs {needed} bytes, got {}",
                bytes.len()
            )));
        }
        let mut pixels = vec![0u8; stride * height as usize];
        for y in 0..height as usize {
            let at = y * stride;
            pixels[at..at + row].copy_from_slice(&bytes[at..at + row]);
        }
        Ok(Self {
            width,
            height,
            stride,
            pixels,
        })
    }

    fn to_image(&self) -> Result<RgbaImage, HwError> {
        let row = self.width as usize * BYTES_PER_PIXEL;
        let mut packed = Vec::with_capacity(row * self.height as usize);
        for line in self.pixels.chunks(self.stride).take(self.height as usize) {
            packed.extend_from_slice(&line[..row]);
        }
        RgbaImage::from_raw(self.width, self.height, packed)
            .ok_or_else(|| HwError::Hardware("frame buffer too small".into()))
    }
}

/// Dimensions from the container header, once enough bytes have arrived.
pub(crate) fn probe_dimensions(stream: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(stream))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Decode a complete compressed stream to a packed RGBA frame.
pub(crate) fn decode(stream: &[u8]) -> Result<SimFrame, HwError> {
    let image = ImageReader::new(Cursor::new(stream))
        .with_guessed_format()
        .map_err(|e| HwError::StreamCorrupt(e.to_string()))?
        .decode()
        .map_err(|e| HwError::StreamCorrupt(e.to_string()))?;
    let rgba = image.to_rgba8();
    let stride = rgba.width() as usize * BYTES_PER_PIXEL;
    Ok(SimFrame::from_image(rgba, stride))
}

/// Scale `frame` to `width`x`height` and lay it out at `stride`.
pub(crate) fn resize(
    frame: &SimFrame,
    width: u32,
    height: u32,
    stride: usize,
) -> Result<SimFrame, HwError> {
    let source = frame.to_image()?;
    let scaled = if (frame.width, frame.height) == (width, height) {
        source
    } else {
        image::imageops::resize(&source, width, height, FilterType::Triangle)
    };
    Ok(SimFrame::from_image(scaled, stride))
}

/// JPEG-encode a frame, dropping alpha.
pub(crate) fn encode_jpeg(frame: &SimFrame, quality: u8) -> Result<Vec<u8>, HwError> {
    let row = frame.width as usize * BYTES_PER_PIXEL;
    let mut rgb = Vec::with_capacity(frame.width as usize * frame.height as usize * 3);
    for line in frame.pixels.chunks(frame.stride).take(frame.height as usize) {
        for px in line[..row].chunks_exact(BYTES_PER_PIXEL) {
            rgb.extend_from_slice(&px[..3]);
        }
    }
    let mut out = Cursor::new(Vec::new());
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .write_image(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| HwError::Hardware(format!("jpeg encode: {e}")))?;
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) fn solid_jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let frame = SimFrame {
        width,
        height,
        stride: width as usize * BYTES_PER_PIXEL,
        pixels: [rgb[0], rgb[1], rgb[2], 255].repeat((width * height) as usize),
    };
    encode_jpeg(&frame, 95).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_needs_only_the_header() {
        let jpeg = solid_jpeg(48, 32, [10, 20, 30]);
        assert_eq!(probe_dimensions(&jpeg), Some((48, 32)));
        assert_eq!(probe_dimensions(&jpeg[..4]), None);
    }

    #[test]
    fn resize_pads_rows_to_stride() {
        let frame = decode(&solid_jpeg(32, 16, [200, 100, 50])).unwrap();
        let out = resize(&frame, 16, 8, 80).unwrap();
        assert_eq!(out.pixels.len(), 80 * 8);
        assert_eq!(&out.pixels[64..80], &[0u8; 16]);
        assert!(out.pixels[0].abs_diff(200) < 8);
    }

    #[test]
    fn strided_frame_round_trips() {
        let bytes: Vec<u8> = (0..(12 * 2)).map(|v| v as u8).collect();
        let frame = SimFrame::from_strided(2, 2, 12, &bytes).unwrap();
        assert_eq!(&frame.pixels[..8], &bytes[..8]);
        assert_eq!(&frame.pixels[12..20], &bytes[12..20]);
        assert!(SimFrame::from_strided(2, 2, 12, &bytes[..10]).is_err());
    }
}
