#![doc = include_str!("../README.md")]

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
mod readback;
pub mod reencoder;
mod renegotiate;
pub mod sink;
pub mod source;
mod stage;
pub mod texture;

pub mod prelude {
    pub use crate::{
        config::{PipelineConfig, PipelineTimeouts},
        decoder::ImageDecoder,
        encoder::ImageEncoder,
        error::{FailureKind, PipelineError},
        reencoder::ImageReencoder,
        sink::{FsWriter, ImageWriter},
        source::{FsSource, ImageFile, ImageInfo, SourceReader},
        texture::TextureDecoder,
    };
}
