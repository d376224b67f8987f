//! Deterministic in-process stand-in for the hardware and graphics stack.
//!
//! [`SimBackend`] implements [`HardwareBackend`] with components that really
//! decode, resize and encode (through the `image` crate), announce port
//! settings changes once the container header is parsed, and move frames
//! through tunnels. [`SimGraphics`] provides the matching graphics context and
//! the GPU memory that the simulated render component writes into.
//!
//! [`SimFaults`] switches on the misbehaviour pipelines must survive.

mod codec;
mod component;
mod gpu;

use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use hwimg_core::buffer::BufferPoolMetrics;
use parking_lot::Mutex;

pub use gpu::{GraphicsEvent, GraphicsOp, SimGraphics};

use self::component::{Link, SimComponent};
use crate::{
    component::{Component, ComponentHandle, HardwareBackend, Tunnel},
    error::HwError,
    port::{ComponentRole, PortIndex},
};

/// Default size of each decoder input buffer.
pub const DEFAULT_INPUT_BUFFER: usize = 80 * 1024;

/// Misbehaviour switches for [`SimBackend`].
#[derive(Debug, Clone)]
pub struct SimFaults {
    /// The decoder never announces its output geometry.
    pub suppress_settings_changed: bool,
    /// The decoder announces a second settings change right after the first
    /// one is acknowledged.
    pub repeat_settings_changed: bool,
    /// Port enable/disable never acknowledge and time out.
    pub stall_port_commands: bool,
    /// Extra time each decode spends in hardware.
    pub decode_delay: Option<Duration>,
    /// Creating a component of this role fails.
    pub unavailable: Option<ComponentRole>,
    pub input_buffer_size: usize,
}

impl Default for SimFaults {
    fn default() -> Self {
        Self {
            suppress_settings_changed: false,
            repeat_settings_changed: false,
            stall_port_commands: false,
            decode_delay: None,
            unavailable: None,
            input_buffer_size: DEFAULT_INPUT_BUFFER,
        }
    }
}

pub(crate) struct BackendShared {
    faults: Mutex<SimFaults>,
    registry: Mutex<HashMap<ComponentHandle, Weak<SimComponent>>>,
    next_handle: AtomicU64,
    active_decoders: AtomicUsize,
    peak_decoders: AtomicUsize,
    pool_totals: Mutex<BufferPoolMetrics>,
    graphics: SimGraphics,
}

impl BackendShared {
    fn decoder_started(&self) {
        let now = self.active_decoders.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_decoders.fetch_max(now, Ordering::AcqRel);
    }

    fn decoder_stopped(&self) {
        self.active_decoders.fetch_sub(1, Ordering::AcqRel);
    }

    /// Fold the counters of a port pool that is being released.
    pub(crate) fn record_pool(&self, pool: BufferPoolMetrics) {
        let mut totals = self.pool_totals.lock();
        totals.hits += pool.hits;
        totals.misses += pool.misses;
        totals.allocations += pool.allocations;
    }

    fn lookup(&self, handle: ComponentHandle) -> Result<Arc<SimComponent>, HwError> {
        self.registry
            .lock()
            .get(&handle)
            .and_then(Weak::upgrade)
            .ok_or_else(|| HwError::Tunnel(format!("component {handle} is not from this backend")))
    }
}

/// Simulated hardware. Clones share state.
///
/// # Example
/// ```rust,ignore
/// use hwimg_component::prelude::*;
/// use hwimg_component::sim::SimBackend;
///
/// let backend = SimBackend::new();
/// let decoder = backend.create_component(ComponentRole::ImageDecode).unwrap();
/// assert_eq!(decoder.state(), ComponentState::Loaded);
/// assert_eq!(backend.live_components(), 1);
/// ```
#[derive(Clone)]
pub struct SimBackend {
    shared: Arc<BackendShared>,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    pub fn new() -> Self {
        Self::with_graphics(SimGraphics::new(), SimFaults::default())
    }

    pub fn with_faults(faults: SimFaults) -> Self {
        Self::with_graphics(SimGraphics::new(), faults)
    }

    /// Backend whose render components write into `graphics`.
    pub fn with_graphics(graphics: SimGraphics, faults: SimFaults) -> Self {
        Self {
            shared: Arc::new(BackendShared {
                faults: Mutex::new(faults),
                registry: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(1),
                active_decoders: AtomicUsize::new(0),
                peak_decoders: AtomicUsize::new(0),
                pool_totals: Mutex::new(BufferPoolMetrics::default()),
                graphics,
            }),
        }
    }

    /// The graphics stack paired with this backend.
    pub fn graphics(&self) -> SimGraphics {
        self.shared.graphics.clone()
    }

    /// Change fault switches; affects components already created.
    pub fn update_faults(&self, update: impl FnOnce(&mut SimFaults)) {
        update(&mut self.shared.faults.lock());
    }

    /// Highest number of decoders that were executing at the same time.
    pub fn peak_concurrent_decodes(&self) -> usize {
        self.shared.peak_decoders.load(Ordering::Acquire)
    }

    /// Components created so far.
    pub fn components_created(&self) -> u64 {
        self.shared.next_handle.load(Ordering::Acquire) - 1
    }

    /// Buffer pool counters summed over every port pool released so far.
    pub fn pool_metrics(&self) -> BufferPoolMetrics {
        *self.shared.pool_totals.lock()
    }

    /// Components still alive.
    pub fn live_components(&self) -> usize {
        let mut registry = self.shared.registry.lock();
        registry.retain(|_, c| c.strong_count() > 0);
        registry.len()
    }
}

impl HardwareBackend for SimBackend {
    fn name(&self) -> &str {
        "sim"
    }

    fn create_component(&self, role: ComponentRole) -> Result<Arc<dyn Component>, HwError> {
        let input_buffer_size = {
            let faults = self.shared.faults.lock();
            if faults.unavailable == Some(role) {
                return Err(HwError::ComponentUnavailable {
                    name: role.component_name(),
                    reason: "no free instances".into(),
                });
            }
            faults.input_buffer_size
        };
        let handle = ComponentHandle(self.shared.next_handle.fetch_add(1, Ordering::AcqRel));
        let component = Arc::new(SimComponent::new(
            role,
            handle,
            self.shared.clone(),
            input_buffer_size,
        ));
        self.shared
            .registry
            .lock()
            .insert(handle, Arc::downgrade(&component));
        Ok(component)
    }

    fn create_tunnel(
        &self,
        source: &Arc<dyn Component>,
        source_port: PortIndex,
        sink: &Arc<dyn Component>,
        sink_port: PortIndex,
    ) -> Result<Box<dyn Tunnel>, HwError> {
        if source_port != source.role().output_port() || sink_port != sink.role().input_port() {
            return Err(HwError::Tunnel(format!(
                "cannot tunnel {}:{source_port} to {}:{sink_port}",
                source.role(),
                sink.role()
            )));
        }
        Ok(Box::new(SimTunnel {
            source: self.shared.lookup(source.handle())?,
            source_port,
            sink: self.shared.lookup(sink.handle())?,
            sink_port,
            established: false,
        }))
    }
}

struct SimTunnel {
    source: Arc<SimComponent>,
    source_port: PortIndex,
    sink: Arc<SimComponent>,
    sink_port: PortIndex,
    established: bool,
}

impl Tunnel for SimTunnel {
    fn establish(&mut self, _timeout: Duration) -> Result<(), HwError> {
        if self.established {
            return Ok(());
        }
        self.source.set_link(
            self.source_port,
            Some(Link {
                peer: Arc::downgrade(&self.sink),
                peer_port: self.sink_port,
            }),
        )?;
        self.sink.set_link(
            self.sink_port,
            Some(Link {
                peer: Arc::downgrade(&self.source),
                peer_port: self.source_port,
            }),
        )?;
        self.sink
            .adopt_frame(self.sink_port, &self.source.output_definition());
        self.established = true;
        self.source.pump();
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), HwError> {
        if !self.established {
            return Ok(());
        }
        self.established = false;
        self.source.set_link(self.source_port, None)?;
        self.sink.set_link(self.sink_port, None)
    }

    fn is_established(&self) -> bool {
        self.established
    }

    fn describe(&self) -> String {
        format!(
            "{}:{} -> {}:{}",
            self.source.role(),
            self.source_port,
            self.sink.role(),
            self.sink_port
        )
    }
}

impl Drop for SimTunnel {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{ComponentState, EventKind};
    use std::time::Duration;

    const T: Duration = Duration::from_millis(200);

    fn start_decoder(backend: &SimBackend) -> Arc<dyn Component> {
        let decoder = backend.create_component(ComponentRole::ImageDecode).unwrap();
        let input = ComponentRole::ImageDecode.input_port();
        decoder.allocate_buffers(input).unwrap();
        decoder.enable_port(input, T).unwrap();
        decoder.set_state(ComponentState::Idle, T).unwrap();
        decoder.set_state(ComponentState::Executing, T).unwrap();
        decoder
    }

    fn feed(decoder: &Arc<dyn Component>, bytes: &[u8]) {
        let mut offset = 0;
        while offset < bytes.len() {
            let mut buffer = decoder.acquire_input(T).unwrap();
            offset += buffer.fill_from(&bytes[offset..]);
            buffer.flags.end_of_stream = offset == bytes.len();
            decoder.empty_buffer(buffer).unwrap();
        }
    }

    #[test]
    fn decoder_announces_geometry_from_header() {
        let backend = SimBackend::new();
        let decoder = start_decoder(&backend);
        feed(&decoder, &codec::solid_jpeg(40, 30, [1, 2, 3]));
        let out = ComponentRole::ImageDecode.output_port();
        decoder
            .wait_for_event(EventKind::PortSettingsChanged(out), T)
            .unwrap();
        let def = decoder.port_definition(out).unwrap();
        assert_eq!((def.width, def.height, def.stride), (40, 30, 160));
        assert_eq!(backend.peak_concurrent_decodes(), 1);
    }

    #[test]
    fn suppressed_settings_change_times_out() {
        let backend = SimBackend::with_faults(SimFaults {
            suppress_settings_changed: true,
            ..SimFaults::default()
        });
        let decoder = start_decoder(&backend);
        feed(&decoder, &codec::solid_jpeg(8, 8, [0, 0, 0]));
        let out = ComponentRole::ImageDecode.output_port();
        let err = decoder
            .wait_for_event(EventKind::PortSettingsChanged(out), Duration::from_millis(20))
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn garbage_input_reports_corrupt_stream() {
        let backend = SimBackend::new();
        let decoder = start_decoder(&backend);
        feed(&decoder, b"definitely not an image");
        let out = ComponentRole::ImageDecode.output_port();
        let err = decoder
            .wait_for_event(EventKind::PortSettingsChanged(out), T)
            .unwrap_err();
        assert_eq!(err.code(), "stream_corrupt");
    }

    #[test]
    fn free_buffers_refuses_while_client_holds_one() {
        let backend = SimBackend::new();
        let decoder = start_decoder(&backend);
        let input = ComponentRole::ImageDecode.input_port();
        let held = decoder.acquire_input(T).unwrap();
        assert!(matches!(
            decoder.free_buffers(input),
            Err(HwError::BuffersOutstanding { count: 1, .. })
        ));
        decoder.release_buffer(held).unwrap();
        assert_eq!(backend.pool_metrics(), BufferPoolMetrics::default());
        decoder.free_buffers(input).unwrap();
        let pools = backend.pool_metrics();
        assert!(pools.allocations > 0);
        assert_eq!(pools.hits, pools.allocations);
        assert_eq!(pools.outstanding, 0);
    }

    #[test]
    fn reconfiguring_an_enabled_port_is_rejected() {
        let backend = SimBackend::new();
        let decoder = start_decoder(&backend);
        let input = ComponentRole::ImageDecode.input_port();
        let def = decoder.port_definition(input).unwrap();
        assert_eq!(
            decoder.set_port_definition(&def),
            Err(HwError::PortBusy(input))
        );
    }

    #[test]
    fn state_changes_move_one_step() {
        let backend = SimBackend::new();
        let resize = backend.create_component(ComponentRole::Resize).unwrap();
        assert!(matches!(
            resize.set_state(ComponentState::Executing, T),
            Err(HwError::IncorrectState { .. })
        ));
    }

    #[test]
    fn unavailable_role_fails_creation() {
        let backend = SimBackend::with_faults(SimFaults {
            unavailable: Some(ComponentRole::Resize),
            ..SimFaults::default()
        });
        assert!(backend.create_component(ComponentRole::ImageDecode).is_ok());
        let err = backend.create_component(ComponentRole::Resize).unwrap_err();
        assert_eq!(err.code(), "component_unavailable");
    }

    #[test]
    fn tunnel_rejects_wrong_ports() {
        let backend = SimBackend::new();
        let decoder = backend.create_component(ComponentRole::ImageDecode).unwrap();
        let resize = backend.create_component(ComponentRole::Resize).unwrap();
        let bad = backend.create_tunnel(
            &decoder,
            ComponentRole::ImageDecode.input_port(),
            &resize,
            ComponentRole::Resize.input_port(),
        );
        assert!(bad.is_err());
        let mut tunnel = backend
            .create_tunnel(
                &decoder,
                ComponentRole::ImageDecode.output_port(),
                &resize,
                ComponentRole::Resize.input_port(),
            )
            .unwrap();
        tunnel.establish(T).unwrap();
        assert!(tunnel.is_established());
        tunnel.teardown().unwrap();
        assert!(!tunnel.is_established());
    }

    #[test]
    fn dropped_components_leave_the_registry() {
        let backend = SimBackend::new();
        let decoder = start_decoder(&backend);
        assert_eq!(backend.live_components(), 1);
        drop(decoder);
        assert_eq!(backend.live_components(), 0);
        assert_eq!(backend.components_created(), 1);
    }
}
