//! Handles and capabilities for the thread-affine graphics context.

use std::fmt;

use crate::error::GraphicsError;

/// GPU-side image backing a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EglImage(pub u64);

/// Display connection the image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EglDisplay(pub u64);

/// GL texture name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex{}", self.0)
    }
}

/// Where a render component writes its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EglTarget {
    pub image: EglImage,
    pub display: EglDisplay,
}

/// Creates graphics contexts. Shared across threads; the contexts it creates
/// are not.
pub trait GraphicsApi: Send + Sync {
    /// Create a context bound to the calling thread.
    fn create_context(&self) -> Result<Box<dyn GraphicsContext>, GraphicsError>;
}

/// A graphics context. It is created, used and dropped on one thread, which is
/// why the trait carries no `Send` bound. Dropping it destroys the context.
pub trait GraphicsContext {
    fn display(&self) -> EglDisplay;

    /// Allocate an RGBA texture of `width`x`height`.
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, GraphicsError>;

    /// Wrap a texture in an EGL image that hardware components can write.
    fn create_egl_image(&mut self, texture: TextureId) -> Result<EglImage, GraphicsError>;

    fn destroy_egl_image(&mut self, image: EglImage) -> Result<(), GraphicsError>;

    fn delete_texture(&mut self, texture: TextureId) -> Result<(), GraphicsError>;
}
