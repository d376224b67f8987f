//! The decode -> resize front half shared by every decoding pipeline.
//!
//! The decoder only learns the real image geometry after it has parsed part of
//! the stream. It then raises a port-settings-changed event on its output and
//! waits until the client has reconfigured and re-enabled that port. The
//! resize stage, and whatever sits behind it, can only be configured at that
//! point. [`DecodeFront`] runs this handshake and hands the resize output to a
//! [`Downstream`] stage.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use hwimg_component::{
    component::{Component, HardwareBackend},
    port::{BufferHeader, ComponentRole, EventKind, PortDefinition},
};
use hwimg_core::format::{CodingType, FrameGeometry};

use crate::{
    config::{PipelineConfig, PipelineTimeouts},
    error::PipelineError,
    stage::{self, Chain},
};

/// The stage fed by the resize output.
pub(crate) trait Downstream {
    /// Configure the resize output buffers or bring up the components behind
    /// the resize. Everything created goes into `chain`.
    fn attach(
        &mut self,
        backend: &dyn HardwareBackend,
        resize: &Arc<dyn Component>,
        chain: &mut Chain,
        config: &PipelineConfig,
    ) -> Result<(), PipelineError>;

    /// Called once the resize is executing, before decoded data flows.
    fn start(&mut self, _timeouts: &PipelineTimeouts) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Drop component references after the chain was torn down.
    fn detach(&mut self);
}

#[derive(Debug)]
enum FrontState {
    TornDown,
    AwaitingSettings,
    Negotiated { source: PortDefinition },
}

pub(crate) struct DecodeFront {
    backend: Arc<dyn HardwareBackend>,
    config: PipelineConfig,
    chain: Chain,
    decoder: Option<Arc<dyn Component>>,
    resize: Option<Arc<dyn Component>>,
    target: Option<FrameGeometry>,
    state: FrontState,
}

impl DecodeFront {
    pub fn new(backend: Arc<dyn HardwareBackend>, config: PipelineConfig) -> Self {
        Self {
            backend,
            config,
            chain: Chain::default(),
            decoder: None,
            resize: None,
            target: None,
            state: FrontState::TornDown,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_built(&self) -> bool {
        !matches!(self.state, FrontState::TornDown)
    }

    /// Geometry the decoder reported for the current stream.
    pub fn source_geometry(&self) -> Option<&PortDefinition> {
        match &self.state {
            FrontState::Negotiated { source } => Some(source),
            _ => None,
        }
    }

    /// Create the decoder and get it ready to accept `len` bytes of `coding`.
    pub fn build(
        &mut self,
        coding: CodingType,
        len: usize,
        target: FrameGeometry,
    ) -> Result<(), PipelineError> {
        if self.is_built() {
            return Err(PipelineError::Protocol(
                "decode chain is already built".into(),
            ));
        }
        let timeouts = self.config.timeouts;
        let decoder = self
            .chain
            .create(self.backend.as_ref(), ComponentRole::ImageDecode)?;
        let input = ComponentRole::ImageDecode.input_port();
        let mut def = decoder.port_definition(input)?;
        def.coding = coding;
        def.buffer_size = def.buffer_size.min(len).max(1);
        decoder.set_port_definition(&def)?;
        decoder.allocate_buffers(input)?;
        decoder.enable_port(input, timeouts.port_command)?;
        stage::start(&decoder, &timeouts)?;
        tracing::debug!(
            coding = coding.name(),
            bytes = len,
            input_buffer = def.buffer_size,
            target_width = target.width(),
            target_height = target.height(),
            "decode chain built"
        );
        self.decoder = Some(decoder);
        self.target = Some(target);
        self.state = FrontState::AwaitingSettings;
        Ok(())
    }

    /// Queue the whole compressed stream, renegotiating as soon as the
    /// decoder reports the geometry.
    pub fn feed(&mut self, data: &[u8], downstream: &mut dyn Downstream) -> Result<(), PipelineError> {
        let decoder = self.decoder()?;
        let timeouts = self.config.timeouts;
        let mut offset = 0;
        while offset < data.len() {
            let mut buffer = decoder.acquire_input(timeouts.input_buffer)?;
            offset += buffer.fill_from(&data[offset..]);
            let last = offset == data.len();
            buffer.flags.end_of_stream = last;
            buffer.flags.end_of_frame = last;
            decoder.empty_buffer(buffer)?;
            if self.poll_settings_changed()? {
                self.renegotiate(downstream)?;
            }
        }
        Ok(())
    }

    /// Block until the first settings change arrived and was handled.
    pub fn await_settings(&mut self, downstream: &mut dyn Downstream) -> Result<(), PipelineError> {
        if !matches!(self.state, FrontState::AwaitingSettings) {
            return Ok(());
        }
        let decoder = self.decoder()?;
        let wait = self.config.timeouts.settings_changed;
        decoder
            .wait_for_event(settings_changed(), wait)
            .map_err(|err| {
                if err.is_timeout() {
                    PipelineError::Timeout {
                        stage: "port settings changed",
                        after: wait,
                    }
                } else {
                    err.into()
                }
            })?;
        self.renegotiate(downstream)
    }

    /// Non-blocking check for a pending settings change. Decoder errors raised
    /// meanwhile are returned.
    fn poll_settings_changed(&self) -> Result<bool, PipelineError> {
        match self.decoder()?.wait_for_event(settings_changed(), Duration::ZERO) {
            Ok(()) => Ok(true),
            Err(err) if err.is_timeout() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Handle one port-settings-changed event. The first one builds the resize
    /// and the downstream stage; later ones only update the resize input when
    /// the geometry actually changed.
    fn renegotiate(&mut self, downstream: &mut dyn Downstream) -> Result<(), PipelineError> {
        let decoder = self.decoder()?;
        let timeouts = self.config.timeouts;
        let out = ComponentRole::ImageDecode.output_port();

        if let FrontState::Negotiated { source } = &self.state {
            let resize = self.resize()?;
            let resize_in = ComponentRole::Resize.input_port();
            decoder.disable_port(out, timeouts.port_command)?;
            let fresh = decoder.port_definition(out)?;
            if fresh.same_frame(source) {
                tracing::debug!("repeated settings change with unchanged geometry");
            } else {
                tracing::debug!(
                    width = fresh.width,
                    height = fresh.height,
                    "decoder geometry changed, updating resize input"
                );
                resize.disable_port(resize_in, timeouts.port_command)?;
                let mut def = resize.port_definition(resize_in)?;
                def.copy_frame_from(&fresh);
                resize.set_port_definition(&def)?;
                resize.enable_port(resize_in, timeouts.port_command)?;
            }
            self.state = FrontState::Negotiated {
                source: fresh.clone(),
            };
            decoder.enable_port(out, timeouts.port_command)?;
            return Ok(());
        }

        let source = decoder.port_definition(out)?;
        if source.geometry().is_none() {
            return Err(PipelineError::Protocol(format!(
                "decoder reported unusable geometry {}x{} stride {}",
                source.width, source.height, source.stride
            )));
        }
        let target = self
            .target
            .ok_or_else(|| PipelineError::Protocol("no target geometry".into()))?;
        tracing::debug!(
            source_width = source.width,
            source_height = source.height,
            target_width = target.width(),
            target_height = target.height(),
            "port settings changed"
        );

        let backend = self.backend.clone();
        let resize = self.chain.create(backend.as_ref(), ComponentRole::Resize)?;
        let resize_in = ComponentRole::Resize.input_port();
        let resize_out = ComponentRole::Resize.output_port();
        let mut def = resize.port_definition(resize_in)?;
        def.copy_frame_from(&source);
        resize.set_port_definition(&def)?;
        let mut def = resize.port_definition(resize_out)?;
        def.set_rgba_frame(&target);
        resize.set_port_definition(&def)?;
        self.resize = Some(resize.clone());

        downstream.attach(backend.as_ref(), &resize, &mut self.chain, &self.config)?;
        self.chain
            .connect(backend.as_ref(), &decoder, &resize, &timeouts)?;
        stage::enable_ports(&resize, &timeouts)?;
        stage::start(&resize, &timeouts)?;
        downstream.start(&timeouts)?;

        self.state = FrontState::Negotiated { source };
        decoder.enable_port(out, timeouts.port_command)?;
        Ok(())
    }

    /// Wait for `component` to return a filled output buffer, handling
    /// settings changes that arrive meanwhile.
    pub fn wait_filled(
        &mut self,
        component: &Arc<dyn Component>,
        downstream: &mut dyn Downstream,
    ) -> Result<BufferHeader, PipelineError> {
        let total = self.config.timeouts.output_buffer;
        let poll = self.config.timeouts.poll_interval.max(Duration::from_millis(1));
        let deadline = Instant::now() + total;
        loop {
            if self.poll_settings_changed()? {
                self.renegotiate(downstream)?;
            }
            let slice = poll.min(deadline.saturating_duration_since(Instant::now()));
            match component.wait_filled(slice) {
                Ok(buffer) => return Ok(buffer),
                Err(err) if err.is_timeout() => {
                    if Instant::now() >= deadline {
                        return Err(PipelineError::Timeout {
                            stage: "output buffer",
                            after: total,
                        });
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Tear the whole chain down, downstream stages included.
    pub fn teardown(&mut self, downstream: &mut dyn Downstream) {
        downstream.detach();
        self.decoder = None;
        self.resize = None;
        self.target = None;
        self.chain.teardown(&self.config.timeouts);
        if self.is_built() {
            tracing::debug!("decode chain torn down");
        }
        self.state = FrontState::TornDown;
    }

    fn decoder(&self) -> Result<Arc<dyn Component>, PipelineError> {
        self.decoder
            .clone()
            .ok_or_else(|| PipelineError::Protocol("decoder is not built".into()))
    }

    fn resize(&self) -> Result<Arc<dyn Component>, PipelineError> {
        self.resize
            .clone()
            .ok_or_else(|| PipelineError::Protocol("resize is not built".into()))
    }
}

fn settings_changed() -> EventKind {
    EventKind::PortSettingsChanged(ComponentRole::ImageDecode.output_port())
}
