use std::{fmt, num::NonZeroU32, str::FromStr};

/// Bytes per pixel of the native decoded layout.
pub const BYTES_PER_PIXEL: usize = 4;

/// Four-character code describing a pixel layout.
///
/// # Example
/// ```rust
/// use hwimg_core::prelude::FourCc;
///
/// let fcc = FourCc::new(*b"RGBA");
/// assert_eq!(fcc.to_string(), "RGBA");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

impl FourCc {
    /// 32-bit RGBA, the layout produced by the resize and render stages.
    pub const RGBA: FourCc = FourCc(*b"RGBA");
    /// Planar YUV 4:2:0 as emitted by the decoder before resize.
    pub const I420: FourCc = FourCc(*b"I420");
    /// Placeholder for ports that carry compressed data.
    pub const NONE: FourCc = FourCc([0; 4]);

    /// Construct from raw bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Little-endian u32 encoding.
    pub fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Try to convert to a printable string.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl From<u32> for FourCc {
    fn from(value: u32) -> Self {
        Self(value.to_le_bytes())
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) if self.0 != [0; 4] => write!(f, "{s}"),
            _ => write!(f, "0x{:08x}", self.to_u32()),
        }
    }
}

impl FromStr for FourCc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 {
            return Err("fourcc must be four ASCII bytes".into());
        }
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(FourCc(arr))
    }
}

/// Width and height of an image, both non-zero.
///
/// # Example
/// ```rust
/// use hwimg_core::prelude::Resolution;
///
/// let res = Resolution::new(640, 480).unwrap();
/// assert_eq!(res.width.get(), 640);
/// assert!(Resolution::new(0, 480).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resolution {
    /// Width in pixels (non-zero).
    pub width: NonZeroU32,
    /// Height in pixels (non-zero).
    pub height: NonZeroU32,
}

impl Resolution {
    /// Create a resolution if both dimensions are non-zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }

    /// Same resolution with width and height exchanged.
    pub fn transposed(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Geometry of a packed RGBA frame: resolution plus row stride in bytes.
///
/// `stride` is always at least `width * 4`; rows may carry trailing padding.
///
/// # Example
/// ```rust
/// use hwimg_core::prelude::FrameGeometry;
///
/// let geo = FrameGeometry::new(160, 120, 640).unwrap();
/// assert_eq!(geo.len(), 640 * 120);
/// assert!(FrameGeometry::new(160, 120, 100).is_none());
/// assert!(FrameGeometry::new(1, 3, usize::MAX / 2).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameGeometry {
    resolution: Resolution,
    stride: usize,
}

impl FrameGeometry {
    /// Validate dimensions and stride. Fails when the frame would not fit in
    /// the address space.
    pub fn new(width: u32, height: u32, stride: usize) -> Option<Self> {
        let resolution = Resolution::new(width, height)?;
        let row = (width as usize).checked_mul(BYTES_PER_PIXEL)?;
        if stride < row {
            return None;
        }
        stride.checked_mul(height as usize)?;
        Some(Self { resolution, stride })
    }

    /// Geometry with no row padding.
    pub fn packed(resolution: Resolution) -> Self {
        Self {
            resolution,
            stride: resolution.width.get() as usize * BYTES_PER_PIXEL,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn width(&self) -> u32 {
        self.resolution.width.get()
    }

    pub fn height(&self) -> u32 {
        self.resolution.height.get()
    }

    /// Row pitch in bytes.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Bytes of visible pixels in one row.
    pub fn row_bytes(&self) -> usize {
        self.width() as usize * BYTES_PER_PIXEL
    }

    /// Total bytes covered by `height` rows at this stride.
    pub fn len(&self) -> usize {
        self.stride * self.height() as usize
    }

    /// Never true; geometry always covers at least one pixel.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Compression format of a source image, as seen by the decoder input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CodingType {
    /// Raw pixels; used on uncompressed ports.
    #[default]
    Unused,
    /// Let the hardware detect the format from the stream.
    AutoDetect,
    Jpeg,
    Png,
    Gif,
    Bmp,
    Webp,
}

impl CodingType {
    /// Whether the hardware decode block accepts this coding type.
    pub fn hardware_decodable(self) -> bool {
        matches!(self, CodingType::Jpeg | CodingType::AutoDetect)
    }

    /// Lowercase name for logs.
    pub fn name(self) -> &'static str {
        match self {
            CodingType::Unused => "raw",
            CodingType::AutoDetect => "auto",
            CodingType::Jpeg => "jpeg",
            CodingType::Png => "png",
            CodingType::Gif => "gif",
            CodingType::Bmp => "bmp",
            CodingType::Webp => "webp",
        }
    }
}

/// EXIF orientation of a source image.
///
/// Values follow the EXIF tag (1..=8); codes 5 to 8 swap width and height when
/// the image is displayed upright.
///
/// # Example
/// ```rust
/// use hwimg_core::prelude::Orientation;
///
/// assert!(Orientation::from_exif(6).is_transposed());
/// assert!(!Orientation::from_exif(3).is_transposed());
/// assert_eq!(Orientation::from_exif(42), Orientation::Normal);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Orientation {
    #[default]
    Normal,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    Transpose,
    Rotate90,
    Transverse,
    Rotate270,
}

impl Orientation {
    /// Map an EXIF orientation value; unknown values read as `Normal`.
    pub fn from_exif(value: u32) -> Self {
        match value {
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate270,
            _ => Orientation::Normal,
        }
    }

    /// The EXIF value for this orientation.
    pub fn exif_value(self) -> u32 {
        match self {
            Orientation::Normal => 1,
            Orientation::FlipHorizontal => 2,
            Orientation::Rotate180 => 3,
            Orientation::FlipVertical => 4,
            Orientation::Transpose => 5,
            Orientation::Rotate90 => 6,
            Orientation::Transverse => 7,
            Orientation::Rotate270 => 8,
        }
    }

    /// Whether displaying upright swaps width and height.
    pub fn is_transposed(self) -> bool {
        self.exif_value() >= 5
    }
}
