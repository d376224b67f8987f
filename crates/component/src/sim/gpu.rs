use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    thread::{self, ThreadId},
    time::Instant,
};

use hwimg_core::format::BYTES_PER_PIXEL;
use parking_lot::Mutex;

use crate::{
    error::{GraphicsError, HwError},
    graphics::{EglDisplay, EglImage, GraphicsApi, GraphicsContext, TextureId},
};

/// Operation recorded by the simulated graphics stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsOp {
    CreateContext,
    CreateTexture(TextureId),
    CreateImage(EglImage),
    DestroyImage(EglImage),
    DeleteTexture(TextureId),
    DestroyContext,
}

/// One entry of the graphics activity log.
#[derive(Debug, Clone, Copy)]
pub struct GraphicsEvent {
    pub op: GraphicsOp,
    pub thread: ThreadId,
    pub at: Instant,
}

struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

#[derive(Default)]
struct GpuState {
    textures: HashMap<TextureId, Surface>,
    images: HashMap<EglImage, TextureId>,
}

#[derive(Default)]
pub(crate) struct GpuInner {
    state: Mutex<GpuState>,
    log: Mutex<Vec<GraphicsEvent>>,
    next_texture: AtomicU32,
    next_image: AtomicU64,
    fail_textures: AtomicBool,
}

impl GpuInner {
    fn record(&self, op: GraphicsOp) {
        self.log.lock().push(GraphicsEvent {
            op,
            thread: thread::current().id(),
            at: Instant::now(),
        });
    }

    /// Write a packed-at-stride frame into the texture behind `image`.
    pub(crate) fn write_image(
        &self,
        image: EglImage,
        width: u32,
        height: u32,
        stride: usize,
        pixels: &[u8],
    ) -> Result<(), HwError> {
        let mut state = self.state.lock();
        let texture = *state
            .images
            .get(&image)
            .ok_or_else(|| HwError::BadParameter(format!("unknown egl image {image:?}")))?;
        let surface = state
            .textures
            .get_mut(&texture)
            .ok_or_else(|| HwError::BadParameter(format!("egl image {image:?} lost its texture")))?;
        if (surface.width, surface.height) != (width, height) {
            return Err(HwError::BadParameter(format!(
                "frame {width}x{height} does not match texture {}x{}",
                surface.width, surface.height
            )));
        }
        let row = width as usize * BYTES_PER_PIXEL;
        for (dst, src) in surface
            .pixels
            .chunks_mut(row)
            .zip(pixels.chunks(stride))
            .take(height as usize)
        {
            dst.copy_from_slice(&src[..row]);
        }
        Ok(())
    }
}

/// Simulated GPU memory shared by [`SimGraphics`] and the simulated render
/// component.
#[derive(Clone, Default)]
pub struct SimGraphics {
    pub(crate) inner: Arc<GpuInner>,
}

impl SimGraphics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything the graphics stack did, in order.
    pub fn events(&self) -> Vec<GraphicsEvent> {
        self.inner.log.lock().clone()
    }

    /// Packed RGBA contents of a live texture.
    pub fn texture_pixels(&self, texture: TextureId) -> Option<Vec<u8>> {
        self.inner
            .state
            .lock()
            .textures
            .get(&texture)
            .map(|s| s.pixels.clone())
    }

    pub fn live_textures(&self) -> usize {
        self.inner.state.lock().textures.len()
    }

    pub fn live_images(&self) -> usize {
        self.inner.state.lock().images.len()
    }

    /// Make texture allocation fail until reset.
    pub fn set_fail_textures(&self, fail: bool) {
        self.inner.fail_textures.store(fail, Ordering::Release);
    }
}

impl GraphicsApi for SimGraphics {
    fn create_context(&self) -> Result<Box<dyn GraphicsContext>, GraphicsError> {
        self.inner.record(GraphicsOp::CreateContext);
        Ok(Box::new(SimContext {
            gpu: self.inner.clone(),
            owner: thread::current().id(),
        }))
    }
}

/// Context handed out by [`SimGraphics`]; refuses use from any thread but
/// its creator.
struct SimContext {
    gpu: Arc<GpuInner>,
    owner: ThreadId,
}

impl SimContext {
    fn check_thread(&self) -> Result<(), GraphicsError> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(GraphicsError::ContextUnavailable(
                "context used off its owning thread".into(),
            ))
        }
    }
}

impl GraphicsContext for SimContext {
    fn display(&self) -> EglDisplay {
        EglDisplay(1)
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, GraphicsError> {
        self.check_thread()?;
        if self.gpu.fail_textures.load(Ordering::Acquire) {
            return Err(GraphicsError::Texture("out of texture memory".into()));
        }
        if width == 0 || height == 0 {
            return Err(GraphicsError::Texture(format!("invalid size {width}x{height}")));
        }
        let id = TextureId(self.gpu.next_texture.fetch_add(1, Ordering::Relaxed) + 1);
        self.gpu.state.lock().textures.insert(
            id,
            Surface {
                width,
                height,
                pixels: vec![0; width as usize * height as usize * BYTES_PER_PIXEL],
            },
        );
        self.gpu.record(GraphicsOp::CreateTexture(id));
        Ok(id)
    }

    fn create_egl_image(&mut self, texture: TextureId) -> Result<EglImage, GraphicsError> {
        self.check_thread()?;
        let mut state = self.gpu.state.lock();
        if !state.textures.contains_key(&texture) {
            return Err(GraphicsError::EglImage(format!("unknown texture {texture}")));
        }
        let image = EglImage(self.gpu.next_image.fetch_add(1, Ordering::Relaxed) + 1);
        state.images.insert(image, texture);
        drop(state);
        self.gpu.record(GraphicsOp::CreateImage(image));
        Ok(image)
    }

    fn destroy_egl_image(&mut self, image: EglImage) -> Result<(), GraphicsError> {
        self.check_thread()?;
        if self.gpu.state.lock().images.remove(&image).is_none() {
            return Err(GraphicsError::EglImage(format!("unknown egl image {image:?}")));
        }
        self.gpu.record(GraphicsOp::DestroyImage(image));
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) -> Result<(), GraphicsError> {
        self.check_thread()?;
        if self.gpu.state.lock().textures.remove(&texture).is_none() {
            return Err(GraphicsError::Texture(format!("unknown texture {texture}")));
        }
        self.gpu.record(GraphicsOp::DeleteTexture(texture));
        Ok(())
    }
}

impl Drop for SimContext {
    fn drop(&mut self) {
        self.gpu.record(GraphicsOp::DestroyContext);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_lifecycle_is_logged() {
        let graphics = SimGraphics::new();
        let mut ctx = graphics.create_context().unwrap();
        let tex = ctx.create_texture(2, 2).unwrap();
        let image = ctx.create_egl_image(tex).unwrap();
        graphics
            .inner
            .write_image(image, 2, 2, 12, &[7u8; 24])
            .unwrap();
        assert_eq!(graphics.texture_pixels(tex).unwrap(), vec![7u8; 16]);
        ctx.destroy_egl_image(image).unwrap();
        ctx.delete_texture(tex).unwrap();
        drop(ctx);
        let ops: Vec<GraphicsOp> = graphics.events().iter().map(|e| e.op).collect();
        assert_eq!(
            ops,
            vec![
                GraphicsOp::CreateContext,
                GraphicsOp::CreateTexture(tex),
                GraphicsOp::CreateImage(image),
                GraphicsOp::DestroyImage(image),
                GraphicsOp::DeleteTexture(tex),
                GraphicsOp::DestroyContext,
            ]
        );
        assert_eq!(graphics.live_textures(), 0);
    }

    #[test]
    fn write_rejects_mismatched_size() {
        let graphics = SimGraphics::new();
        let mut ctx = graphics.create_context().unwrap();
        let tex = ctx.create_texture(4, 4).unwrap();
        let image = ctx.create_egl_image(tex).unwrap();
        assert!(
            graphics
                .inner
                .write_image(image, 2, 2, 8, &[0u8; 16])
                .is_err()
        );
    }
}
