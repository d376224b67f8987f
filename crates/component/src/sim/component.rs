use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
    thread,
    time::{Duration, Instant},
};

use hwimg_core::{
    buffer::BufferPool,
    format::{BYTES_PER_PIXEL, CodingType, FourCc},
};
use parking_lot::{Condvar, Mutex};

use super::{
    BackendShared,
    codec::{self, SimFrame},
};
use crate::{
    component::{Component, ComponentHandle},
    error::HwError,
    graphics::EglTarget,
    port::{
        BufferHeader, ComponentRole, ComponentState, EventKind, PortDefinition, PortDirection,
        PortIndex,
    },
};

const DEFAULT_QUALITY: u8 = 80;
const ENCODE_OUTPUT_BUFFER: usize = 16 * 1024;

pub(crate) struct Link {
    pub peer: Weak<SimComponent>,
    pub peer_port: PortIndex,
}

struct SimPort {
    def: PortDefinition,
    pool: Option<BufferPool>,
    idle: Vec<BufferHeader>,
    queued: VecDeque<BufferHeader>,
    filled: VecDeque<BufferHeader>,
    link: Option<Link>,
}

impl SimPort {
    fn new(def: PortDefinition) -> Self {
        Self {
            def,
            pool: None,
            idle: Vec::new(),
            queued: VecDeque::new(),
            filled: VecDeque::new(),
            link: None,
        }
    }

    fn upstream(&self) -> Option<Arc<SimComponent>> {
        self.link.as_ref().and_then(|l| l.peer.upgrade())
    }
}

struct PendingBytes {
    bytes: Vec<u8>,
    offset: usize,
}

struct Inner {
    state: ComponentState,
    input: SimPort,
    output: SimPort,
    events: VecDeque<EventKind>,
    error: Option<HwError>,
    stream: Vec<u8>,
    stream_complete: bool,
    announced: u32,
    awaiting_ack: bool,
    delivered: bool,
    frame_in: Option<SimFrame>,
    pending: Option<PendingBytes>,
    quality: u8,
    egl_target: Option<EglTarget>,
}

impl Inner {
    fn port_mut(&mut self, port: PortIndex) -> Result<&mut SimPort, HwError> {
        if self.input.def.port == port {
            Ok(&mut self.input)
        } else if self.output.def.port == port {
            Ok(&mut self.output)
        } else {
            Err(HwError::BadParameter(format!("no port {port}")))
        }
    }

    fn fail(&mut self, err: HwError) {
        if self.error.is_none() {
            tracing::debug!(error = %err, "simulated component entered error state");
            self.error = Some(err);
        }
    }

    /// Move pending output bytes into buffers the client queued.
    fn flush_pending(&mut self) {
        let Inner {
            pending,
            output,
            events,
            ..
        } = self;
        while let Some(p) = pending.as_mut() {
            let Some(mut buffer) = output.queued.pop_front() else {
                break;
            };
            let n = buffer.fill_from(&p.bytes[p.offset..]);
            p.offset += n;
            let done = p.offset >= p.bytes.len();
            buffer.flags.end_of_stream = done;
            buffer.flags.end_of_frame = done;
            output.filled.push_back(buffer);
            if done {
                *pending = None;
                events.push_back(EventKind::EndOfStream(output.def.port));
            }
        }
    }
}

enum Work {
    Deliver {
        peer: Arc<SimComponent>,
        port: PortIndex,
        frame: SimFrame,
    },
}

/// Simulated hardware block. All processing happens synchronously inside the
/// calls that make it possible, so behaviour is deterministic.
pub(crate) struct SimComponent {
    role: ComponentRole,
    handle: ComponentHandle,
    shared: Arc<BackendShared>,
    inner: Mutex<Inner>,
    changed: Condvar,
}

fn port_def(
    port: PortIndex,
    direction: PortDirection,
    count: u32,
    buffer_size: usize,
    coding: CodingType,
    color: FourCc,
) -> PortDefinition {
    PortDefinition {
        port,
        direction,
        enabled: false,
        buffer_count_min: 1,
        buffer_count_actual: count,
        buffer_size,
        width: 0,
        height: 0,
        stride: 0,
        slice_height: 0,
        coding,
        color,
    }
}

impl SimComponent {
    pub(crate) fn new(
        role: ComponentRole,
        handle: ComponentHandle,
        shared: Arc<BackendShared>,
        input_buffer_size: usize,
    ) -> Self {
        let (inp, out) = (role.input_port(), role.output_port());
        let (input, output) = match role {
            ComponentRole::ImageDecode => (
                port_def(
                    inp,
                    PortDirection::Input,
                    3,
                    input_buffer_size,
                    CodingType::AutoDetect,
                    FourCc::NONE,
                ),
                port_def(out, PortDirection::Output, 1, 0, CodingType::Unused, FourCc::RGBA),
            ),
            ComponentRole::ImageEncode => (
                port_def(inp, PortDirection::Input, 1, 0, CodingType::Unused, FourCc::RGBA),
                port_def(
                    out,
                    PortDirection::Output,
                    2,
                    ENCODE_OUTPUT_BUFFER,
                    CodingType::Jpeg,
                    FourCc::NONE,
                ),
            ),
            ComponentRole::Resize | ComponentRole::EglRender => (
                port_def(inp, PortDirection::Input, 1, 0, CodingType::Unused, FourCc::RGBA),
                port_def(out, PortDirection::Output, 1, 0, CodingType::Unused, FourCc::RGBA),
            ),
        };
        Self {
            role,
            handle,
            shared,
            inner: Mutex::new(Inner {
                state: ComponentState::Loaded,
                input: SimPort::new(input),
                output: SimPort::new(output),
                events: VecDeque::new(),
                error: None,
                stream: Vec::new(),
                stream_complete: false,
                announced: 0,
                awaiting_ack: false,
                delivered: false,
                frame_in: None,
                pending: None,
                quality: DEFAULT_QUALITY,
                egl_target: None,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn set_link(&self, port: PortIndex, link: Option<Link>) -> Result<(), HwError> {
        let mut inner = self.inner.lock();
        inner.port_mut(port)?.link = link;
        Ok(())
    }

    /// Adopt the frame layout of an upstream port when a tunnel is set up.
    pub(crate) fn adopt_frame(&self, port: PortIndex, source: &PortDefinition) {
        if source.width == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if let Ok(p) = inner.port_mut(port)
            && !p.def.enabled
        {
            p.def.copy_frame_from(source);
        }
    }

    pub(crate) fn output_definition(&self) -> PortDefinition {
        self.inner.lock().output.def.clone()
    }

    pub(crate) fn receive_frame(&self, port: PortIndex, frame: SimFrame) {
        {
            let mut inner = self.inner.lock();
            if inner.input.def.port != port {
                inner.fail(HwError::Tunnel(format!("frame delivered to port {port}")));
            } else {
                inner.frame_in = Some(frame);
            }
        }
        self.changed.notify_all();
        self.pump();
    }

    fn stall(&self, op: &'static str, timeout: Duration) -> Result<(), HwError> {
        if self.shared.faults.lock().stall_port_commands {
            thread::sleep(timeout);
            return Err(HwError::timeout(op, timeout));
        }
        Ok(())
    }

    /// Block on the condvar until `ready` yields a value or `timeout` elapses.
    fn wait_until<T>(
        &self,
        op: &'static str,
        timeout: Duration,
        mut ready: impl FnMut(&mut Inner) -> Result<Option<T>, HwError>,
    ) -> Result<T, HwError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = ready(&mut *inner)? {
                return Ok(value);
            }
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return match ready(&mut *inner)? {
                    Some(value) => Ok(value),
                    None => Err(HwError::timeout(op, timeout)),
                };
            }
        }
    }

    /// Run whatever processing the current state allows, delivering frames
    /// downstream without holding this component's lock.
    pub(crate) fn pump(&self) {
        loop {
            let work = {
                let mut inner = self.inner.lock();
                let work = self.next_work(&mut inner);
                self.changed.notify_all();
                work
            };
            match work {
                None => return,
                Some(Work::Deliver { peer, port, frame }) => {
                    if self.role == ComponentRole::ImageDecode {
                        let delay = self.shared.faults.lock().decode_delay;
                        if let Some(delay) = delay {
                            thread::sleep(delay);
                        }
                    }
                    peer.receive_frame(port, frame);
                }
            }
        }
    }

    fn next_work(&self, inner: &mut Inner) -> Option<Work> {
        if inner.state != ComponentState::Executing || inner.error.is_some() {
            return None;
        }
        match self.role {
            ComponentRole::ImageDecode => self.decoder_work(inner),
            ComponentRole::Resize => self.resize_work(inner),
            ComponentRole::ImageEncode => {
                if inner.output.def.enabled
                    && let Some(frame) = inner.frame_in.take()
                {
                    match codec::encode_jpeg(&frame, inner.quality) {
                        Ok(bytes) => {
                            inner.pending = Some(PendingBytes { bytes, offset: 0 });
                            inner.flush_pending();
                        }
                        Err(e) => inner.fail(e),
                    }
                }
                None
            }
            ComponentRole::EglRender => {
                self.render_work(inner);
                None
            }
        }
    }

    fn decoder_work(&self, inner: &mut Inner) -> Option<Work> {
        if !inner.stream_complete
            || inner.announced == 0
            || inner.awaiting_ack
            || inner.delivered
            || !inner.output.def.enabled
        {
            return None;
        }
        let link = inner.output.link.as_ref()?;
        let peer = link.peer.upgrade()?;
        let port = link.peer_port;
        match codec::decode(&inner.stream) {
            Ok(frame) => {
                inner.delivered = true;
                Some(Work::Deliver { peer, port, frame })
            }
            Err(e) => {
                inner.fail(e);
                None
            }
        }
    }

    fn resize_work(&self, inner: &mut Inner) -> Option<Work> {
        if !inner.output.def.enabled {
            return None;
        }
        let geometry = inner.output.def.geometry()?;
        let frame = inner.frame_in.take()?;
        let input = &inner.input.def;
        if input.width != 0 && (input.width, input.height) != (frame.width, frame.height) {
            let msg = format!(
                "resize input configured {}x{} but received {}x{}",
                input.width, input.height, frame.width, frame.height
            );
            inner.fail(HwError::StreamCorrupt(msg));
            return None;
        }
        let scaled = match codec::resize(
            &frame,
            geometry.width(),
            geometry.height(),
            geometry.stride(),
        ) {
            Ok(scaled) => scaled,
            Err(e) => {
                inner.fail(e);
                return None;
            }
        };
        if let Some(link) = inner.output.link.as_ref() {
            let peer = link.peer.upgrade()?;
            return Some(Work::Deliver {
                peer,
                port: link.peer_port,
                frame: scaled,
            });
        }
        inner.pending = Some(PendingBytes {
            bytes: scaled.pixels,
            offset: 0,
        });
        inner.flush_pending();
        None
    }

    fn render_work(&self, inner: &mut Inner) {
        if !inner.output.def.enabled || inner.output.queued.is_empty() {
            return;
        }
        let Some(target) = inner.egl_target else {
            return;
        };
        let Some(frame) = inner.frame_in.take() else {
            return;
        };
        let written = self.shared.graphics.inner.write_image(
            target.image,
            frame.width,
            frame.height,
            frame.stride,
            &frame.pixels,
        );
        match written {
            Ok(()) => {
                if let Some(mut buffer) = inner.output.queued.pop_front() {
                    buffer.flags.end_of_stream = true;
                    buffer.flags.end_of_frame = true;
                    inner.output.filled.push_back(buffer);
                }
                let port = inner.output.def.port;
                inner.events.push_back(EventKind::EndOfStream(port));
            }
            Err(e) => inner.fail(e),
        }
    }

    /// Handle newly arrived compressed bytes on the decoder.
    fn decoder_input(&self, inner: &mut Inner) {
        let suppress = self.shared.faults.lock().suppress_settings_changed;
        if inner.announced == 0 && !suppress {
            if let Some((width, height)) = codec::probe_dimensions(&inner.stream) {
                let out = &mut inner.output.def;
                out.width = width;
                out.height = height;
                out.stride = width * BYTES_PER_PIXEL as u32;
                out.slice_height = height;
                out.buffer_size = out.frame_len();
                self.announce(inner);
            } else if inner.stream_complete {
                inner.fail(HwError::StreamCorrupt("unrecognised image header".into()));
            }
        }
    }

    fn announce(&self, inner: &mut Inner) {
        let port = inner.output.def.port;
        inner.announced += 1;
        inner.awaiting_ack = true;
        inner.events.push_back(EventKind::PortSettingsChanged(port));
        tracing::trace!(component = %self.role, announced = inner.announced, "port settings changed");
    }

    fn enter_executing(&self, from: ComponentState) {
        if self.role == ComponentRole::ImageDecode && from != ComponentState::Executing {
            self.shared.decoder_started();
        }
    }

    fn leave_executing(&self, from: ComponentState, to: ComponentState) {
        if self.role == ComponentRole::ImageDecode
            && from == ComponentState::Executing
            && to != ComponentState::Executing
        {
            self.shared.decoder_stopped();
        }
    }
}

impl Drop for SimComponent {
    fn drop(&mut self) {
        let state = self.inner.get_mut().state;
        self.leave_executing(state, ComponentState::Loaded);
    }
}

impl Component for SimComponent {
    fn role(&self) -> ComponentRole {
        self.role
    }

    fn handle(&self) -> ComponentHandle {
        self.handle
    }

    fn state(&self) -> ComponentState {
        self.inner.lock().state
    }

    fn set_state(&self, state: ComponentState, _timeout: Duration) -> Result<(), HwError> {
        use ComponentState::*;
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            let adjacent = matches!(
                (from, state),
                (Loaded, Idle) | (Idle, Loaded) | (Idle, Executing) | (Executing, Idle)
            );
            if from != state && !adjacent {
                return Err(HwError::IncorrectState {
                    expected: Idle,
                    actual: from,
                });
            }
            if from == Loaded && state == Idle {
                for port in [&inner.input, &inner.output] {
                    if port.def.enabled && port.link.is_none() && port.pool.is_none() {
                        return Err(HwError::InsufficientResources(format!(
                            "port {} enabled without buffers",
                            port.def.port
                        )));
                    }
                }
            }
            inner.state = state;
            from
        };
        if state == Executing {
            self.enter_executing(from);
        } else {
            self.leave_executing(from, state);
        }
        self.changed.notify_all();
        self.pump();
        Ok(())
    }

    fn port_definition(&self, port: PortIndex) -> Result<PortDefinition, HwError> {
        let mut inner = self.inner.lock();
        let p = inner.port_mut(port)?;
        Ok(p.def.clone())
    }

    fn set_port_definition(&self, definition: &PortDefinition) -> Result<(), HwError> {
        let mut inner = self.inner.lock();
        let loaded = inner.state == ComponentState::Loaded;
        let p = inner.port_mut(definition.port)?;
        if p.def.enabled && !loaded {
            return Err(HwError::PortBusy(definition.port));
        }
        if definition.buffer_count_actual < p.def.buffer_count_min {
            return Err(HwError::BadParameter(format!(
                "port {} needs at least {} buffers",
                definition.port, p.def.buffer_count_min
            )));
        }
        if definition.color == FourCc::RGBA
            && definition.width > 0
            && (definition.stride as usize) < definition.width as usize * BYTES_PER_PIXEL
        {
            return Err(HwError::BadParameter(format!(
                "stride {} too small for width {}",
                definition.stride, definition.width
            )));
        }
        if p.pool.is_some()
            && (definition.buffer_size != p.def.buffer_size
                || definition.buffer_count_actual != p.def.buffer_count_actual)
        {
            return Err(HwError::PortBusy(definition.port));
        }
        let keep = (p.def.port, p.def.direction, p.def.enabled, p.def.buffer_count_min);
        p.def = definition.clone();
        (p.def.port, p.def.direction, p.def.enabled, p.def.buffer_count_min) = keep;
        Ok(())
    }

    fn set_quality(&self, port: PortIndex, quality: u8) -> Result<(), HwError> {
        if self.role != ComponentRole::ImageEncode || port != self.role.output_port() {
            return Err(HwError::BadParameter(format!(
                "quality is not settable on {} port {port}",
                self.role
            )));
        }
        if !(1..=100).contains(&quality) {
            return Err(HwError::BadParameter(format!("quality {quality} out of range")));
        }
        self.inner.lock().quality = quality;
        Ok(())
    }

    fn enable_port(&self, port: PortIndex, timeout: Duration) -> Result<(), HwError> {
        self.stall("enable port", timeout)?;
        let upstream = {
            let mut inner = self.inner.lock();
            let loaded = inner.state == ComponentState::Loaded;
            let p = inner.port_mut(port)?;
            if p.def.enabled {
                return Ok(());
            }
            if !loaded && p.link.is_none() && p.pool.is_none() {
                return Err(HwError::InsufficientResources(format!(
                    "port {port} enabled without buffers"
                )));
            }
            p.def.enabled = true;
            let upstream = match p.def.direction {
                PortDirection::Input => p.upstream(),
                PortDirection::Output => None,
            };
            if port == inner.output.def.port && inner.awaiting_ack {
                inner.awaiting_ack = false;
                let repeat = self.shared.faults.lock().repeat_settings_changed;
                if repeat && inner.announced == 1 && inner.stream_complete {
                    self.announce(&mut inner);
                }
            }
            upstream
        };
        self.changed.notify_all();
        self.pump();
        if let Some(upstream) = upstream {
            upstream.pump();
        }
        Ok(())
    }

    fn disable_port(&self, port: PortIndex, timeout: Duration) -> Result<(), HwError> {
        self.stall("disable port", timeout)?;
        let mut inner = self.inner.lock();
        inner.port_mut(port)?.def.enabled = false;
        Ok(())
    }

    fn allocate_buffers(&self, port: PortIndex) -> Result<(), HwError> {
        let mut inner = self.inner.lock();
        let p = inner.port_mut(port)?;
        if p.link.is_some() {
            return Err(HwError::Tunnel(format!("port {port} is tunnelled")));
        }
        if p.pool.is_some() {
            return Err(HwError::BadParameter(format!(
                "port {port} already has buffers"
            )));
        }
        if p.def.buffer_size == 0 || p.def.buffer_count_actual == 0 {
            return Err(HwError::BadParameter(format!(
                "port {port} has no buffer size configured"
            )));
        }
        let pool = BufferPool::new(p.def.buffer_count_actual as usize, p.def.buffer_size);
        for index in 0..pool.count() {
            let lease = pool.try_lease().ok_or_else(|| {
                HwError::InsufficientResources(format!("port {port} buffer {index}"))
            })?;
            p.idle.push(BufferHeader::new(index, port, lease));
        }
        p.pool = Some(pool);
        Ok(())
    }

    fn use_egl_image(&self, port: PortIndex, target: EglTarget) -> Result<(), HwError> {
        if self.role != ComponentRole::EglRender || port != self.role.output_port() {
            return Err(HwError::BadParameter(format!(
                "{} port {port} cannot render to an egl image",
                self.role
            )));
        }
        let mut inner = self.inner.lock();
        let p = inner.port_mut(port)?;
        if p.pool.is_some() {
            return Err(HwError::BadParameter(format!(
                "port {port} already has buffers"
            )));
        }
        let pool = BufferPool::new(1, 0);
        let lease = pool
            .try_lease()
            .ok_or_else(|| HwError::InsufficientResources("egl image buffer".into()))?;
        p.idle.push(BufferHeader::new(0, port, lease));
        p.pool = Some(pool);
        inner.egl_target = Some(target);
        Ok(())
    }

    fn free_buffers(&self, port: PortIndex) -> Result<(), HwError> {
        let mut inner = self.inner.lock();
        let p = inner.port_mut(port)?;
        let Some(pool) = p.pool.as_ref() else {
            return Ok(());
        };
        let with_port = p.idle.len() + p.queued.len() + p.filled.len();
        let held = pool.outstanding().saturating_sub(with_port);
        if held > 0 {
            return Err(HwError::BuffersOutstanding { port, count: held });
        }
        let stats = pool.metrics();
        tracing::trace!(
            component = %self.role,
            port = %port,
            hits = stats.hits,
            misses = stats.misses,
            allocations = stats.allocations,
            "port buffers freed"
        );
        self.shared.record_pool(stats);
        p.idle.clear();
        p.queued.clear();
        p.filled.clear();
        p.pool = None;
        if self.role == ComponentRole::EglRender && port == self.role.output_port() {
            inner.egl_target = None;
        }
        Ok(())
    }

    fn acquire_input(&self, timeout: Duration) -> Result<BufferHeader, HwError> {
        self.wait_until("input buffer", timeout, |inner| {
            if let Some(err) = inner.error.clone() {
                return Err(err);
            }
            if !inner.input.def.enabled {
                return Err(HwError::PortDisabled(inner.input.def.port));
            }
            Ok(inner.input.idle.pop().map(|mut b| {
                b.reset();
                b
            }))
        })
    }

    fn empty_buffer(&self, mut buffer: BufferHeader) -> Result<(), HwError> {
        {
            let mut inner = self.inner.lock();
            if buffer.port != inner.input.def.port {
                return Err(HwError::BadParameter(format!(
                    "buffer for port {} sent to input {}",
                    buffer.port, inner.input.def.port
                )));
            }
            if inner.state != ComponentState::Executing {
                return Err(HwError::IncorrectState {
                    expected: ComponentState::Executing,
                    actual: inner.state,
                });
            }
            if !inner.input.def.enabled {
                return Err(HwError::PortDisabled(buffer.port));
            }
            inner.stream.extend_from_slice(buffer.payload());
            if buffer.flags.end_of_stream {
                inner.stream_complete = true;
            }
            buffer.reset();
            inner.input.idle.push(buffer);

            match self.role {
                ComponentRole::ImageDecode => self.decoder_input(&mut inner),
                ComponentRole::ImageEncode if inner.stream_complete => {
                    let def = inner.input.def.clone();
                    let stream = std::mem::take(&mut inner.stream);
                    match SimFrame::from_strided(def.width, def.height, def.stride as usize, &stream)
                    {
                        Ok(frame) => inner.frame_in = Some(frame),
                        Err(e) => inner.fail(e),
                    }
                }
                ComponentRole::ImageEncode => {}
                ComponentRole::Resize | ComponentRole::EglRender => {
                    inner.fail(HwError::Tunnel(format!(
                        "{} only accepts tunnelled input",
                        self.role
                    )));
                }
            }
        }
        self.changed.notify_all();
        self.pump();
        Ok(())
    }

    fn acquire_output(&self, timeout: Duration) -> Result<BufferHeader, HwError> {
        self.wait_until("output buffer", timeout, |inner| {
            Ok(inner.output.idle.pop().map(|mut b| {
                b.reset();
                b
            }))
        })
    }

    fn fill_buffer(&self, mut buffer: BufferHeader) -> Result<(), HwError> {
        {
            let mut inner = self.inner.lock();
            if buffer.port != inner.output.def.port {
                return Err(HwError::BadParameter(format!(
                    "buffer for port {} sent to output {}",
                    buffer.port, inner.output.def.port
                )));
            }
            if inner.state != ComponentState::Executing {
                return Err(HwError::IncorrectState {
                    expected: ComponentState::Executing,
                    actual: inner.state,
                });
            }
            if !inner.output.def.enabled {
                return Err(HwError::PortDisabled(buffer.port));
            }
            buffer.reset();
            inner.output.queued.push_back(buffer);
            inner.flush_pending();
        }
        self.changed.notify_all();
        self.pump();
        Ok(())
    }

    fn wait_filled(&self, timeout: Duration) -> Result<BufferHeader, HwError> {
        self.wait_until("filled buffer", timeout, |inner| {
            if let Some(buffer) = inner.output.filled.pop_front() {
                return Ok(Some(buffer));
            }
            match inner.error.clone() {
                Some(err) => Err(err),
                None => Ok(None),
            }
        })
    }

    fn release_buffer(&self, mut buffer: BufferHeader) -> Result<(), HwError> {
        let mut inner = self.inner.lock();
        buffer.reset();
        let p = inner.port_mut(buffer.port)?;
        p.idle.push(buffer);
        Ok(())
    }

    fn wait_for_event(&self, event: EventKind, timeout: Duration) -> Result<(), HwError> {
        self.wait_until("event", timeout, |inner| {
            if let Some(pos) = inner.events.iter().position(|e| *e == event) {
                inner.events.remove(pos);
                return Ok(Some(()));
            }
            match inner.error.clone() {
                Some(err) => Err(err),
                None => Ok(None),
            }
        })
    }
}
