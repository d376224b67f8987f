//! Copying resize output into caller memory.

use std::sync::Arc;

use hwimg_component::{
    component::{Component, HardwareBackend},
    port::ComponentRole,
};

use crate::{
    config::PipelineConfig,
    error::PipelineError,
    renegotiate::{DecodeFront, Downstream},
    stage::Chain,
};

/// Downstream that leaves the resize output untunnelled and reads it back
/// through client buffers of at most `readback_chunk` bytes.
#[derive(Default)]
pub(crate) struct CpuReadback {
    resize: Option<Arc<dyn Component>>,
}

impl Downstream for CpuReadback {
    fn attach(
        &mut self,
        _backend: &dyn HardwareBackend,
        resize: &Arc<dyn Component>,
        _chain: &mut Chain,
        config: &PipelineConfig,
    ) -> Result<(), PipelineError> {
        let out = ComponentRole::Resize.output_port();
        let mut def = resize.port_definition(out)?;
        def.buffer_size = def.frame_len().min(config.readback_chunk).max(1);
        def.buffer_count_actual = def.buffer_count_actual.max(def.buffer_count_min);
        resize.set_port_definition(&def)?;
        resize.allocate_buffers(out)?;
        self.resize = Some(resize.clone());
        Ok(())
    }

    fn detach(&mut self) {
        self.resize = None;
    }
}

impl CpuReadback {
    /// Fill `out` with exactly `need` bytes of resize output.
    ///
    /// Each buffer goes back to the resize as soon as its payload is copied,
    /// so no buffer is held when an error is returned.
    pub fn drain(
        &mut self,
        front: &mut DecodeFront,
        out: &mut [u8],
        need: usize,
    ) -> Result<(), PipelineError> {
        let resize = self
            .resize
            .clone()
            .ok_or_else(|| PipelineError::Protocol("resize output is not attached".into()))?;
        let timeouts = front.config().timeouts;
        let out = out
            .get_mut(..need)
            .ok_or_else(|| PipelineError::InvalidInput("output buffer too small".into()))?;
        let mut written = 0;
        while written < need {
            let buffer = resize.acquire_output(timeouts.output_buffer)?;
            resize.fill_buffer(buffer)?;
            let filled = front.wait_filled(&resize, &mut *self)?;
            let payload = filled.payload();
            let take = payload.len().min(need - written);
            out[written..written + take].copy_from_slice(&payload[..take]);
            written += take;
            let end = filled.flags.end_of_stream;
            resize.release_buffer(filled)?;
            if end {
                break;
            }
        }
        if written < need {
            return Err(PipelineError::Protocol(format!(
                "resize ended after {written} of {need} bytes"
            )));
        }
        Ok(())
    }
}
