//! The texture worker: one thread that owns the graphics context and
//! serializes every texture allocation and deletion.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use hwimg_component::{
    component::HardwareBackend,
    error::GraphicsError,
    graphics::{GraphicsApi, GraphicsContext, TextureId},
};
use hwimg_core::{
    completion::{CompletionError, completion},
    queue::{RecvOutcome, SendOutcome, WorkRx, WorkTx, bounded, unbounded},
};
use hwimg_pipeline::{error::PipelineError, source::ImageFile, texture::TextureDecoder};
use parking_lot::Mutex;

use crate::{
    config::HwimgConfig,
    request::{TextureAction, TextureHandle, TextureInfo, TextureRequest},
};

/// Errors from the texture subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SubsystemError {
    #[error("texture subsystem is not initialized")]
    NotInitialized,
    #[error("texture subsystem is already running")]
    AlreadyRunning,
    #[error("texture worker exited before answering")]
    WorkerGone,
    #[error("unknown texture {0}")]
    UnknownTexture(TextureHandle),
    #[error("failed to spawn texture worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Graphics(#[from] GraphicsError),
}

impl SubsystemError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            SubsystemError::NotInitialized => "not_initialized",
            SubsystemError::AlreadyRunning => "already_running",
            SubsystemError::WorkerGone => "worker_gone",
            SubsystemError::UnknownTexture(_) => "unknown_texture",
            SubsystemError::Spawn(_) => "spawn_failed",
            SubsystemError::Pipeline(err) => err.code(),
            SubsystemError::Graphics(_) => "graphics_error",
        }
    }
}

impl From<CompletionError> for SubsystemError {
    fn from(_: CompletionError) -> Self {
        SubsystemError::WorkerGone
    }
}

type Registry = Arc<Mutex<HashMap<TextureHandle, TextureInfo>>>;

struct Worker {
    tx: WorkTx<TextureRequest>,
    thread: JoinHandle<()>,
}

/// Owner of the texture worker thread and the registry of live textures.
///
/// Requests from any number of threads are handled strictly in submission
/// order. Only the worker touches the graphics context: it creates it on
/// start, and destroys leftover textures and then the context on shutdown.
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use hwimg::prelude::*;
///
/// let subsystem = ImageSubsystem::new(backend, graphics, HwimgConfig::default());
/// subsystem.initialize()?;
/// let handle = subsystem.decode_to_texture(&file, 320, 240)?;
/// let texture = subsystem.get_texture(handle);
/// subsystem.destroy_texture(handle)?;
/// subsystem.deinitialize()?;
/// ```
pub struct ImageSubsystem {
    backend: Arc<dyn HardwareBackend>,
    graphics: Arc<dyn GraphicsApi>,
    config: HwimgConfig,
    registry: Registry,
    next_handle: AtomicU64,
    worker: Mutex<Option<Worker>>,
}

impl ImageSubsystem {
    pub fn new(
        backend: Arc<dyn HardwareBackend>,
        graphics: Arc<dyn GraphicsApi>,
        config: HwimgConfig,
    ) -> Self {
        Self {
            backend,
            graphics,
            config,
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_handle: AtomicU64::new(1),
            worker: Mutex::new(None),
        }
    }

    /// Start the worker and wait until it holds a graphics context.
    pub fn initialize(&self) -> Result<(), SubsystemError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(SubsystemError::AlreadyRunning);
        }
        let (tx, rx) = match self.config.queue_depth {
            0 => unbounded(),
            depth => bounded(depth),
        };
        let (ready_tx, ready) = completion::<Result<(), GraphicsError>>();
        let graphics = self.graphics.clone();
        let backend = self.backend.clone();
        let registry = self.registry.clone();
        let config = self.config;
        let thread = thread::Builder::new()
            .name("hwimg-texture".into())
            .spawn(move || {
                let ctx = match graphics.create_context() {
                    Ok(ctx) => ctx,
                    Err(err) => {
                        ready_tx.complete(Err(err));
                        return;
                    }
                };
                ready_tx.complete(Ok(()));
                run_worker(rx, ctx, TextureDecoder::new(backend, config.pipeline), registry);
            })
            .map_err(SubsystemError::Spawn)?;

        match ready.wait() {
            Ok(Ok(())) => {
                tracing::info!(backend = self.backend.name(), "texture worker started");
                *worker = Some(Worker { tx, thread });
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                tracing::warn!(error = %err, "texture worker could not create a graphics context");
                Err(err.into())
            }
            Err(_) => {
                let _ = thread.join();
                Err(SubsystemError::WorkerGone)
            }
        }
    }

    /// Stop the worker after it has drained the queue. A no-op when not
    /// running.
    pub fn deinitialize(&self) -> Result<(), SubsystemError> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        worker.tx.close();
        worker
            .thread
            .join()
            .map_err(|_| SubsystemError::WorkerGone)?;
        tracing::info!("texture worker stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Decode `file` at `width`x`height` into a new texture on the worker
    /// thread and register it under a fresh handle.
    pub fn decode_to_texture(
        &self,
        file: &ImageFile,
        width: u32,
        height: u32,
    ) -> Result<TextureHandle, SubsystemError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidInput(format!(
                "texture size {width}x{height}"
            ))
            .into());
        }
        if !file.coding_type().hardware_decodable() {
            return Err(PipelineError::Unsupported(format!(
                "hardware cannot decode {}",
                file.coding_type().name()
            ))
            .into());
        }
        let handle = TextureHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let info = self.submit(|done| {
            TextureRequest::alloc(handle, file.clone(), width, height, done)
        })?;
        Ok(info.handle)
    }

    /// Destroy a texture on the worker thread and forget its handle.
    pub fn destroy_texture(&self, handle: TextureHandle) -> Result<(), SubsystemError> {
        self.submit(|done| TextureRequest::delete(handle, done))?;
        Ok(())
    }

    /// The texture behind `handle`, if it is still live.
    pub fn get_texture(&self, handle: TextureHandle) -> Option<TextureId> {
        self.registry.lock().get(&handle).map(|info| info.texture)
    }

    pub fn texture_info(&self, handle: TextureHandle) -> Option<TextureInfo> {
        self.registry.lock().get(&handle).cloned()
    }

    pub fn live_textures(&self) -> usize {
        self.registry.lock().len()
    }

    fn submit(
        &self,
        build: impl FnOnce(
            hwimg_core::completion::Completer<Result<TextureInfo, SubsystemError>>,
        ) -> TextureRequest,
    ) -> Result<TextureInfo, SubsystemError> {
        let tx = match self.worker.lock().as_ref() {
            Some(worker) => worker.tx.clone(),
            None => return Err(SubsystemError::NotInitialized),
        };
        let (done, waiter) = completion();
        // Waits for room when the queue is full; the worker keeps draining.
        if tx.send_blocking(build(done)) == SendOutcome::Closed {
            return Err(SubsystemError::NotInitialized);
        }
        waiter.wait()?
    }
}

impl Drop for ImageSubsystem {
    fn drop(&mut self) {
        if let Err(err) = self.deinitialize() {
            tracing::warn!(error = %err, "texture worker shutdown failed");
        }
    }
}

fn run_worker(
    rx: WorkRx<TextureRequest>,
    mut ctx: Box<dyn GraphicsContext>,
    decoder: TextureDecoder,
    registry: Registry,
) {
    loop {
        match rx.recv() {
            RecvOutcome::Data(request) => dispatch(request, ctx.as_mut(), &decoder, &registry),
            RecvOutcome::Closed => break,
            RecvOutcome::Empty => continue,
        }
    }
    let leftovers: Vec<TextureInfo> = registry.lock().drain().map(|(_, info)| info).collect();
    for info in &leftovers {
        if let Err(err) = release(ctx.as_mut(), info) {
            tracing::warn!(texture = %info.texture, error = %err, "leftover texture release failed");
        }
    }
    if !leftovers.is_empty() {
        tracing::debug!(count = leftovers.len(), "released leftover textures");
    }
    drop(decoder);
    drop(ctx);
}

fn dispatch(
    mut request: TextureRequest,
    ctx: &mut dyn GraphicsContext,
    decoder: &TextureDecoder,
    registry: &Registry,
) {
    tracing::debug!(request = ?request, "texture request");
    let outcome = match request.action {
        TextureAction::Alloc => alloc(&mut request, ctx, decoder, registry),
        TextureAction::Delete => delete(&mut request, ctx, registry),
    };
    if let Err(err) = &outcome {
        tracing::warn!(handle = %request.parent, error = %err, "texture request failed");
    }
    request.done.complete(outcome);
}

fn alloc(
    request: &mut TextureRequest,
    ctx: &mut dyn GraphicsContext,
    decoder: &TextureDecoder,
    registry: &Registry,
) -> Result<TextureInfo, SubsystemError> {
    let source = request
        .source
        .take()
        .ok_or_else(|| PipelineError::InvalidInput("allocation without a source image".into()))?;
    let texture = ctx.create_texture(request.width, request.height)?;
    request.texture = Some(texture);
    let image = match ctx.create_egl_image(texture) {
        Ok(image) => image,
        Err(err) => {
            if let Err(cleanup) = ctx.delete_texture(texture) {
                tracing::warn!(texture = %texture, error = %cleanup, "texture cleanup failed");
            }
            return Err(err.into());
        }
    };
    request.egl_image = Some(image);
    let info = TextureInfo {
        handle: request.parent,
        texture,
        egl_image: image,
        width: request.width,
        height: request.height,
        filename: request.filename.clone(),
    };
    if let Err(err) = decoder.decode_file(
        &source,
        request.width,
        request.height,
        image,
        ctx.display(),
    ) {
        if let Err(cleanup) = release(ctx, &info) {
            tracing::warn!(texture = %texture, error = %cleanup, "texture cleanup failed");
        }
        return Err(err.into());
    }
    registry.lock().insert(info.handle, info.clone());
    Ok(info)
}

fn delete(
    request: &mut TextureRequest,
    ctx: &mut dyn GraphicsContext,
    registry: &Registry,
) -> Result<TextureInfo, SubsystemError> {
    let info = registry
        .lock()
        .remove(&request.parent)
        .ok_or(SubsystemError::UnknownTexture(request.parent))?;
    request.texture = Some(info.texture);
    request.egl_image = Some(info.egl_image);
    release(ctx, &info)?;
    Ok(info)
}

fn release(ctx: &mut dyn GraphicsContext, info: &TextureInfo) -> Result<(), GraphicsError> {
    let image = ctx.destroy_egl_image(info.egl_image);
    let texture = ctx.delete_texture(info.texture);
    image.and(texture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{jpeg_file, solid_jpeg};
    use hwimg_component::sim::{GraphicsOp, SimBackend, SimFaults, SimGraphics};
    use std::time::Duration;

    fn subsystem(faults: SimFaults) -> (ImageSubsystem, SimBackend, SimGraphics) {
        let graphics = SimGraphics::new();
        let backend = SimBackend::with_graphics(graphics.clone(), faults);
        let config = HwimgConfig::builder()
            .uniform_timeout(Duration::from_millis(500))
            .build();
        let subsystem =
            ImageSubsystem::new(Arc::new(backend.clone()), Arc::new(graphics.clone()), config);
        (subsystem, backend, graphics)
    }

    #[test]
    fn requires_initialize() {
        let (subsystem, _, _) = subsystem(SimFaults::default());
        let file = jpeg_file(solid_jpeg(16, 16, [1, 1, 1]));
        let err = subsystem.decode_to_texture(&file, 8, 8).unwrap_err();
        assert_eq!(err.code(), "not_initialized");
        subsystem.initialize().unwrap();
        assert_eq!(subsystem.initialize().unwrap_err().code(), "already_running");
        subsystem.deinitialize().unwrap();
        subsystem.deinitialize().unwrap();
        assert!(!subsystem.is_running());
    }

    #[test]
    fn texture_holds_decoded_pixels() {
        let (subsystem, _, graphics) = subsystem(SimFaults::default());
        subsystem.initialize().unwrap();
        let file = jpeg_file(solid_jpeg(64, 32, [250, 250, 0]));
        let handle = subsystem.decode_to_texture(&file, 32, 16).unwrap();
        let texture = subsystem.get_texture(handle).unwrap();
        let pixels = graphics.texture_pixels(texture).unwrap();
        assert_eq!(pixels.len(), 32 * 16 * 4);
        assert!(pixels.chunks(4).all(|px| px[0] > 230 && px[2] < 30));
        let info = subsystem.texture_info(handle).unwrap();
        assert_eq!((info.width, info.height), (32, 16));
        assert_eq!(info.filename, file.filename());
    }

    #[test]
    fn delete_then_lookup_reports_missing() {
        let (subsystem, _, graphics) = subsystem(SimFaults::default());
        subsystem.initialize().unwrap();
        let subsystem = Arc::new(subsystem);
        let file = jpeg_file(solid_jpeg(16, 16, [5, 5, 5]));

        let a = subsystem.decode_to_texture(&file, 16, 16).unwrap();
        let other = {
            let subsystem = subsystem.clone();
            let file = file.clone();
            thread::spawn(move || {
                subsystem.destroy_texture(a).unwrap();
                subsystem.decode_to_texture(&file, 8, 8).unwrap()
            })
        };
        let b = other.join().unwrap();
        assert_eq!(subsystem.get_texture(a), None);
        assert!(subsystem.get_texture(b).is_some());
        assert_eq!(graphics.live_textures(), 1);
        assert_eq!(
            subsystem.destroy_texture(a).unwrap_err().code(),
            "unknown_texture"
        );
    }

    #[test]
    fn callers_wait_for_room_in_a_full_queue() {
        let graphics = SimGraphics::new();
        let backend = SimBackend::with_graphics(graphics.clone(), SimFaults::default());
        let config = HwimgConfig::builder()
            .uniform_timeout(Duration::from_millis(1000))
            .queue_depth(2)
            .build();
        let subsystem = Arc::new(ImageSubsystem::new(
            Arc::new(backend.clone()),
            Arc::new(graphics.clone()),
            config,
        ));
        subsystem.initialize().unwrap();
        let file = jpeg_file(solid_jpeg(16, 16, [5, 5, 5]));
        let handles: Vec<TextureHandle> = (0..12)
            .map(|_| subsystem.decode_to_texture(&file, 4, 4).unwrap())
            .collect();

        backend.update_faults(|f| f.decode_delay = Some(Duration::from_millis(200)));
        let busy = {
            let (subsystem, file) = (subsystem.clone(), file.clone());
            thread::spawn(move || subsystem.decode_to_texture(&file, 8, 8))
        };
        thread::sleep(Duration::from_millis(30));
        let deleters: Vec<_> = handles
            .iter()
            .map(|&handle| {
                let subsystem = subsystem.clone();
                thread::spawn(move || subsystem.destroy_texture(handle))
            })
            .collect();
        for deleter in deleters {
            deleter.join().unwrap().unwrap();
        }
        let kept = busy.join().unwrap().unwrap();

        assert!(handles.iter().all(|&h| subsystem.get_texture(h).is_none()));
        assert!(subsystem.get_texture(kept).is_some());
        assert_eq!(graphics.live_textures(), 1);
    }

    #[test]
    fn requests_run_in_order_on_the_worker() {
        let (subsystem, backend, graphics) = subsystem(SimFaults::default());
        backend.update_faults(|f| f.decode_delay = Some(Duration::from_millis(100)));
        subsystem.initialize().unwrap();
        let subsystem = Arc::new(subsystem);
        let file = jpeg_file(solid_jpeg(16, 16, [5, 5, 5]));

        let first = {
            let (subsystem, file) = (subsystem.clone(), file.clone());
            thread::spawn(move || subsystem.decode_to_texture(&file, 16, 16).unwrap())
        };
        thread::sleep(Duration::from_millis(30));
        let second = {
            let (subsystem, file) = (subsystem.clone(), file.clone());
            thread::spawn(move || subsystem.decode_to_texture(&file, 8, 8).unwrap())
        };
        let a = first.join().unwrap();
        let b = second.join().unwrap();
        let (ta, tb) = (
            subsystem.get_texture(a).unwrap(),
            subsystem.get_texture(b).unwrap(),
        );

        let events = graphics.events();
        let position = |op: GraphicsOp| events.iter().position(|e| e.op == op).unwrap();
        assert!(position(GraphicsOp::CreateTexture(ta)) < position(GraphicsOp::CreateTexture(tb)));

        let worker = events[0].thread;
        assert_eq!(events[0].op, GraphicsOp::CreateContext);
        assert_ne!(worker, thread::current().id());
        assert!(events.iter().all(|e| e.thread == worker));
    }

    #[test]
    fn shutdown_releases_textures_and_context_on_the_worker() {
        let (subsystem, _, graphics) = subsystem(SimFaults::default());
        subsystem.initialize().unwrap();
        let file = jpeg_file(solid_jpeg(16, 16, [5, 5, 5]));
        subsystem.decode_to_texture(&file, 16, 16).unwrap();
        subsystem.decode_to_texture(&file, 4, 4).unwrap();
        subsystem.deinitialize().unwrap();

        assert_eq!(graphics.live_textures(), 0);
        assert_eq!(graphics.live_images(), 0);
        assert_eq!(subsystem.live_textures(), 0);
        let events = graphics.events();
        let last = events.last().unwrap();
        assert_eq!(last.op, GraphicsOp::DestroyContext);
        assert_eq!(last.thread, events[0].thread);
    }

    #[test]
    fn failed_decode_cleans_up_and_reports() {
        let (subsystem, backend, graphics) = subsystem(SimFaults::default());
        subsystem.initialize().unwrap();
        let garbage = hwimg_pipeline::source::ImageFile::from_parts(
            "garbage.jpg",
            b"not a jpeg at all".to_vec(),
            hwimg_pipeline::source::ImageInfo {
                width: 8,
                height: 8,
                orientation: Default::default(),
                coding_type: hwimg_core::format::CodingType::Jpeg,
            },
        )
        .unwrap();
        let err = subsystem.decode_to_texture(&garbage, 8, 8).unwrap_err();
        assert!(matches!(err, SubsystemError::Pipeline(_)));
        assert_eq!(graphics.live_textures(), 0);
        assert_eq!(graphics.live_images(), 0);
        assert_eq!(subsystem.live_textures(), 0);
        assert_eq!(backend.live_components(), 0);

        graphics.set_fail_textures(true);
        let file = jpeg_file(solid_jpeg(16, 16, [5, 5, 5]));
        let err = subsystem.decode_to_texture(&file, 8, 8).unwrap_err();
        assert_eq!(err.code(), "graphics_error");
        graphics.set_fail_textures(false);
        subsystem.decode_to_texture(&file, 8, 8).unwrap();
    }
}
