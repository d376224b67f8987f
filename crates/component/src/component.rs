use std::{fmt, sync::Arc, time::Duration};

use crate::{
    error::HwError,
    graphics::EglTarget,
    port::{BufferHeader, ComponentRole, ComponentState, EventKind, PortDefinition, PortIndex},
};

/// Opaque identity of a component instance, unique per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentHandle(pub u64);

impl fmt::Display for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One fixed-function hardware block.
///
/// Every call blocks until the hardware acknowledges it or the supplied timeout
/// elapses; asynchronous notifications are observed through
/// [`Component::wait_for_event`] rather than callbacks. Implementations must be
/// safe to call from any thread, but a pipeline only drives a component from
/// one thread at a time.
///
/// Buffers follow the hardware ownership rules: a [`BufferHeader`] returned by
/// `acquire_input`, `acquire_output` or `wait_filled` belongs to the client
/// until it is handed back with `empty_buffer`, `fill_buffer` or
/// `release_buffer`. `free_buffers` fails while the client still holds any.
pub trait Component: Send + Sync {
    fn role(&self) -> ComponentRole;

    fn handle(&self) -> ComponentHandle;

    fn state(&self) -> ComponentState;

    /// Move one step along Loaded <-> Idle <-> Executing.
    fn set_state(&self, state: ComponentState, timeout: Duration) -> Result<(), HwError>;

    fn port_definition(&self, port: PortIndex) -> Result<PortDefinition, HwError>;

    /// Apply a port definition. The port must be disabled unless the component
    /// is still in `Loaded`.
    fn set_port_definition(&self, definition: &PortDefinition) -> Result<(), HwError>;

    /// JPEG quality factor (1..=100) for encode components.
    fn set_quality(&self, port: PortIndex, quality: u8) -> Result<(), HwError>;

    fn enable_port(&self, port: PortIndex, timeout: Duration) -> Result<(), HwError>;

    fn disable_port(&self, port: PortIndex, timeout: Duration) -> Result<(), HwError>;

    /// Allocate `buffer_count_actual` buffers of `buffer_size` bytes on a
    /// non-tunnelled port.
    fn allocate_buffers(&self, port: PortIndex) -> Result<(), HwError>;

    /// Bind a GPU image as the single output buffer of a render port.
    fn use_egl_image(&self, port: PortIndex, target: EglTarget) -> Result<(), HwError>;

    /// Release every buffer on `port`; fails with
    /// [`HwError::BuffersOutstanding`] while the client holds any.
    fn free_buffers(&self, port: PortIndex) -> Result<(), HwError>;

    /// Take an empty input buffer to fill.
    fn acquire_input(&self, timeout: Duration) -> Result<BufferHeader, HwError>;

    /// Submit a filled input buffer.
    fn empty_buffer(&self, buffer: BufferHeader) -> Result<(), HwError>;

    /// Take an idle output buffer to hand to the component.
    fn acquire_output(&self, timeout: Duration) -> Result<BufferHeader, HwError>;

    /// Give an output buffer to the component to fill.
    fn fill_buffer(&self, buffer: BufferHeader) -> Result<(), HwError>;

    /// Wait for the component to return a filled output buffer.
    fn wait_filled(&self, timeout: Duration) -> Result<BufferHeader, HwError>;

    /// Return a client-held buffer to the port's idle set.
    fn release_buffer(&self, buffer: BufferHeader) -> Result<(), HwError>;

    /// Wait for `event`. A zero timeout polls. Errors raised by the component
    /// while waiting are returned instead.
    fn wait_for_event(&self, event: EventKind, timeout: Duration) -> Result<(), HwError>;
}

impl fmt::Debug for dyn Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.role(), self.handle())
    }
}

/// A hardware-managed buffer link from one component's output port to another
/// component's input port.
pub trait Tunnel: Send {
    /// Connect the ports. Buffers flow once both ports are enabled.
    fn establish(&mut self, timeout: Duration) -> Result<(), HwError>;

    /// Disconnect; a no-op when not established.
    fn teardown(&mut self) -> Result<(), HwError>;

    fn is_established(&self) -> bool;

    /// Human-readable endpoints for logs.
    fn describe(&self) -> String;
}

/// Factory for components and tunnels on one piece of hardware.
pub trait HardwareBackend: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    fn create_component(&self, role: ComponentRole) -> Result<Arc<dyn Component>, HwError>;

    fn create_tunnel(
        &self,
        source: &Arc<dyn Component>,
        source_port: PortIndex,
        sink: &Arc<dyn Component>,
        sink_port: PortIndex,
    ) -> Result<Box<dyn Tunnel>, HwError>;
}
