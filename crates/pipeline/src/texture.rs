use std::{
    sync::Arc,
    thread::{self, ThreadId},
    time::Instant,
};

use hwimg_component::{
    component::{Component, HardwareBackend},
    graphics::{EglDisplay, EglImage, EglTarget},
    port::ComponentRole,
};
use hwimg_core::{
    format::{BYTES_PER_PIXEL, CodingType},
    metrics::StageMetrics,
};
use parking_lot::Mutex;

use crate::{
    config::{PipelineConfig, PipelineTimeouts},
    decoder::validate,
    error::PipelineError,
    renegotiate::{DecodeFront, Downstream},
    source::ImageFile,
    stage::{self, Chain},
};

/// Downstream that tunnels the resize output into the render component
/// writing the caller's EGL image.
#[derive(Default)]
struct RenderStage {
    target: Option<EglTarget>,
    render: Option<Arc<dyn Component>>,
}

impl Downstream for RenderStage {
    fn attach(
        &mut self,
        backend: &dyn HardwareBackend,
        resize: &Arc<dyn Component>,
        chain: &mut Chain,
        config: &PipelineConfig,
    ) -> Result<(), PipelineError> {
        let target = self
            .target
            .ok_or_else(|| PipelineError::Protocol("no egl image to render into".into()))?;
        let frame = resize.port_definition(ComponentRole::Resize.output_port())?;
        let render = chain.create(backend, ComponentRole::EglRender)?;
        let mut def = render.port_definition(ComponentRole::EglRender.input_port())?;
        def.copy_frame_from(&frame);
        render.set_port_definition(&def)?;
        chain.connect(backend, resize, &render, &config.timeouts)?;
        render.use_egl_image(ComponentRole::EglRender.output_port(), target)?;
        stage::enable_ports(&render, &config.timeouts)?;
        self.render = Some(render);
        Ok(())
    }

    fn start(&mut self, timeouts: &PipelineTimeouts) -> Result<(), PipelineError> {
        match &self.render {
            Some(render) => stage::start(render, timeouts),
            None => Err(PipelineError::Protocol("render stage is not attached".into())),
        }
    }

    fn detach(&mut self) {
        self.render = None;
        self.target = None;
    }
}

struct TextureState {
    front: DecodeFront,
    stage: RenderStage,
}

/// Hardware decode -> resize -> render into a GPU texture.
///
/// Bound to the thread that created it, which must be the thread owning the
/// graphics context; calls from any other thread are refused.
pub struct TextureDecoder {
    owner: ThreadId,
    state: Mutex<TextureState>,
    metrics: StageMetrics,
}

impl TextureDecoder {
    pub fn new(backend: Arc<dyn HardwareBackend>, config: PipelineConfig) -> Self {
        Self {
            owner: thread::current().id(),
            state: Mutex::new(TextureState {
                front: DecodeFront::new(backend, config),
                stage: RenderStage::default(),
            }),
            metrics: StageMetrics::default(),
        }
    }

    /// Decode `data` scaled to `width`x`height` into the texture behind
    /// `image`. The texture must have exactly that size.
    pub fn decode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        image: EglImage,
        display: EglDisplay,
    ) -> Result<(), PipelineError> {
        self.decode_coded(CodingType::AutoDetect, data, width, height, image, display)
    }

    /// Decode a loaded source image, configuring the decoder for its coding
    /// type.
    pub fn decode_file(
        &self,
        file: &ImageFile,
        width: u32,
        height: u32,
        image: EglImage,
        display: EglDisplay,
    ) -> Result<(), PipelineError> {
        self.decode_coded(
            file.coding_type(),
            file.image_buffer(),
            width,
            height,
            image,
            display,
        )
    }

    fn decode_coded(
        &self,
        coding: CodingType,
        data: &[u8],
        width: u32,
        height: u32,
        image: EglImage,
        display: EglDisplay,
    ) -> Result<(), PipelineError> {
        if thread::current().id() != self.owner {
            return Err(PipelineError::Protocol(
                "texture decode called off the graphics thread".into(),
            ));
        }
        let stride = width as usize * BYTES_PER_PIXEL;
        let target = validate(coding, data, width, height, stride, usize::MAX)?;

        let started = Instant::now();
        let mut state = self.state.lock();
        let TextureState { front, stage } = &mut *state;
        stage.target = Some(EglTarget { image, display });
        let result = (|| -> Result<(), PipelineError> {
            front.build(coding, data.len(), target)?;
            front.feed(data, stage)?;
            front.await_settings(stage)?;
            let render = stage
                .render
                .clone()
                .ok_or_else(|| PipelineError::Protocol("render stage is not attached".into()))?;
            let timeouts = front.config().timeouts;
            let buffer = render.acquire_output(timeouts.output_buffer)?;
            render.fill_buffer(buffer)?;
            let filled = front.wait_filled(&render, &mut *stage)?;
            let complete = filled.flags.end_of_stream;
            render.release_buffer(filled)?;
            if complete {
                Ok(())
            } else {
                Err(PipelineError::Protocol(
                    "render returned without end of stream".into(),
                ))
            }
        })();
        front.teardown(stage);

        match result {
            Ok(()) => {
                self.metrics.record(started.elapsed());
                tracing::debug!(width, height, image = image.0, "texture decoded");
                Ok(())
            }
            Err(err) => {
                self.metrics.record_failure();
                tracing::warn!(error = %err, code = err.code(), "texture decode failed");
                Err(err)
            }
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        let TextureState { front, stage } = &mut *state;
        front.teardown(stage);
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }
}

impl Drop for TextureDecoder {
    fn drop(&mut self) {
        self.close();
    }
}
