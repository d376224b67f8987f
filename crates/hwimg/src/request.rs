//! Requests carried to the texture worker.

use std::{fmt, path::PathBuf};

use hwimg_component::graphics::{EglImage, TextureId};
use hwimg_core::completion::Completer;
use hwimg_pipeline::source::ImageFile;

use crate::subsystem::SubsystemError;

/// Opaque handle returned by [`crate::subsystem::ImageSubsystem::decode_to_texture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

/// A live texture as registered by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureInfo {
    pub handle: TextureHandle,
    pub texture: TextureId,
    pub egl_image: EglImage,
    pub width: u32,
    pub height: u32,
    pub filename: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextureAction {
    Alloc,
    Delete,
}

/// One unit of work for the texture worker. The requester gives it up when
/// enqueuing and gets the outcome back through `done`.
pub(crate) struct TextureRequest {
    pub action: TextureAction,
    pub width: u32,
    pub height: u32,
    /// Texture to delete; filled in by the worker for allocations.
    pub texture: Option<TextureId>,
    pub egl_image: Option<EglImage>,
    pub parent: TextureHandle,
    pub filename: PathBuf,
    pub source: Option<ImageFile>,
    pub done: Completer<Result<TextureInfo, SubsystemError>>,
}

impl TextureRequest {
    pub fn alloc(
        parent: TextureHandle,
        source: ImageFile,
        width: u32,
        height: u32,
        done: Completer<Result<TextureInfo, SubsystemError>>,
    ) -> Self {
        Self {
            action: TextureAction::Alloc,
            width,
            height,
            texture: None,
            egl_image: None,
            parent,
            filename: source.filename().to_path_buf(),
            source: Some(source),
            done,
        }
    }

    pub fn delete(
        parent: TextureHandle,
        done: Completer<Result<TextureInfo, SubsystemError>>,
    ) -> Self {
        Self {
            action: TextureAction::Delete,
            width: 0,
            height: 0,
            texture: None,
            egl_image: None,
            parent,
            filename: PathBuf::new(),
            source: None,
            done,
        }
    }
}

impl fmt::Debug for TextureRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureRequest")
            .field("action", &self.action)
            .field("parent", &self.parent)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("texture", &self.texture)
            .field("egl_image", &self.egl_image)
            .field("filename", &self.filename)
            .finish()
    }
}
