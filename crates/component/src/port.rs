use std::fmt;

use hwimg_core::{
    buffer::BufferLease,
    format::{BYTES_PER_PIXEL, CodingType, FourCc, FrameGeometry},
};
use smallvec::{SmallVec, smallvec};

/// Kind of fixed-function block a component wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentRole {
    ImageDecode,
    Resize,
    ImageEncode,
    EglRender,
}

impl ComponentRole {
    /// Name used to instantiate the component on the hardware.
    pub fn component_name(self) -> &'static str {
        match self {
            ComponentRole::ImageDecode => "OMX.broadcom.image_decode",
            ComponentRole::Resize => "OMX.broadcom.resize",
            ComponentRole::ImageEncode => "OMX.broadcom.image_encode",
            ComponentRole::EglRender => "OMX.broadcom.egl_render",
        }
    }

    pub fn input_port(self) -> PortIndex {
        match self {
            ComponentRole::ImageDecode => PortIndex(320),
            ComponentRole::Resize => PortIndex(60),
            ComponentRole::ImageEncode => PortIndex(340),
            ComponentRole::EglRender => PortIndex(220),
        }
    }

    pub fn output_port(self) -> PortIndex {
        PortIndex(self.input_port().0 + 1)
    }

    /// Input then output port.
    pub fn ports(self) -> SmallVec<[PortIndex; 2]> {
        smallvec![self.input_port(), self.output_port()]
    }
}

impl fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.component_name())
    }
}

/// Hardware port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortIndex(pub u32);

impl fmt::Display for PortIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Component lifecycle state. Transitions move one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentState {
    Loaded,
    Idle,
    Executing,
}

/// Negotiated configuration of one port.
///
/// For image ports `width`/`height`/`stride`/`slice_height` describe one
/// frame; for compressed ports only `coding` and the buffer fields matter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDefinition {
    pub port: PortIndex,
    pub direction: PortDirection,
    pub enabled: bool,
    pub buffer_count_min: u32,
    pub buffer_count_actual: u32,
    pub buffer_size: usize,
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes.
    pub stride: u32,
    pub slice_height: u32,
    pub coding: CodingType,
    pub color: FourCc,
}

impl PortDefinition {
    /// Frame geometry if the port carries a known RGBA frame size.
    pub fn geometry(&self) -> Option<FrameGeometry> {
        FrameGeometry::new(self.width, self.height, self.stride as usize)
    }

    /// Whether both describe the same frame layout.
    pub fn same_frame(&self, other: &PortDefinition) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.stride == other.stride
            && self.slice_height == other.slice_height
            && self.color == other.color
    }

    /// Copy the frame layout of `source` onto this port.
    pub fn copy_frame_from(&mut self, source: &PortDefinition) {
        self.width = source.width;
        self.height = source.height;
        self.stride = source.stride;
        self.slice_height = source.slice_height;
        self.color = source.color;
        self.coding = CodingType::Unused;
    }

    /// Configure the port for an RGBA frame of `geometry`.
    pub fn set_rgba_frame(&mut self, geometry: &FrameGeometry) {
        self.width = geometry.width();
        self.height = geometry.height();
        self.stride = geometry.stride() as u32;
        self.slice_height = geometry.height();
        self.color = FourCc::RGBA;
        self.coding = CodingType::Unused;
    }

    /// Bytes in one full frame at the port's stride.
    pub fn frame_len(&self) -> usize {
        let stride = (self.stride as usize).max(self.width as usize * BYTES_PER_PIXEL);
        stride * self.slice_height.max(self.height) as usize
    }
}

/// Asynchronous notification a component can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The port's geometry must be renegotiated.
    PortSettingsChanged(PortIndex),
    /// The last buffer of the stream left this port.
    EndOfStream(PortIndex),
}

/// Per-buffer flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags {
    pub end_of_stream: bool,
    pub end_of_frame: bool,
}

/// One buffer allocated on a port.
///
/// Ownership moves between the client and the component as the buffer is
/// submitted (`empty_buffer`/`fill_buffer`) and returned
/// (`acquire_input`/`wait_filled`).
#[derive(Debug)]
pub struct BufferHeader {
    pub index: usize,
    pub port: PortIndex,
    pub flags: BufferFlags,
    data: BufferLease,
}

impl BufferHeader {
    pub fn new(index: usize, port: PortIndex, data: BufferLease) -> Self {
        Self {
            index,
            port,
            flags: BufferFlags::default(),
            data,
        }
    }

    /// Filled bytes.
    pub fn payload(&self) -> &[u8] {
        self.data.as_slice()
    }

    pub fn filled_len(&self) -> usize {
        self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Copy as much of `src` as fits; returns the bytes taken.
    pub fn fill_from(&mut self, src: &[u8]) -> usize {
        self.data.fill_from(src)
    }

    /// Reset length and flags for reuse.
    pub fn reset(&mut self) {
        self.data.clear();
        self.flags = BufferFlags::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwimg_core::buffer::BufferPool;

    fn port_def() -> PortDefinition {
        PortDefinition {
            port: PortIndex(61),
            direction: PortDirection::Output,
            enabled: false,
            buffer_count_min: 1,
            buffer_count_actual: 1,
            buffer_size: 0,
            width: 0,
            height: 0,
            stride: 0,
            slice_height: 0,
            coding: CodingType::Unused,
            color: FourCc::NONE,
        }
    }

    #[test]
    fn roles_map_to_port_pairs() {
        assert_eq!(ComponentRole::ImageDecode.output_port(), PortIndex(321));
        assert_eq!(ComponentRole::Resize.ports().as_slice(), &[PortIndex(60), PortIndex(61)]);
        assert_eq!(ComponentRole::EglRender.output_port(), PortIndex(221));
        assert_eq!(
            ComponentRole::ImageEncode.to_string(),
            "OMX.broadcom.image_encode"
        );
    }

    #[test]
    fn rgba_frame_sets_geometry() {
        let mut def = port_def();
        let geo = FrameGeometry::new(160, 120, 704).unwrap();
        def.set_rgba_frame(&geo);
        assert_eq!(def.geometry(), Some(geo));
        assert_eq!(def.frame_len(), 704 * 120);
        let mut other = port_def();
        other.copy_frame_from(&def);
        assert!(other.same_frame(&def));
    }

    #[test]
    fn header_reset_clears_flags() {
        let pool = BufferPool::new(1, 8);
        let mut header = BufferHeader::new(0, PortIndex(320), pool.try_lease().unwrap());
        header.fill_from(b"abc");
        header.flags.end_of_stream = true;
        assert_eq!(header.payload(), b"abc");
        header.reset();
        assert_eq!(header.filled_len(), 0);
        assert!(!header.flags.end_of_stream);
    }
}
