use std::time::Duration;

use crate::port::{ComponentState, PortIndex};

/// Failure reported by a hardware component, tunnel or backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HwError {
    #[error("component {name} unavailable: {reason}")]
    ComponentUnavailable { name: &'static str, reason: String },
    #[error("insufficient resources: {0}")]
    InsufficientResources(String),
    #[error("bad parameter: {0}")]
    BadParameter(String),
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("incorrect state: expected {expected:?}, found {actual:?}")]
    IncorrectState {
        expected: ComponentState,
        actual: ComponentState,
    },
    #[error("port {0} must be disabled before reconfiguration")]
    PortBusy(PortIndex),
    #[error("port {0} is not enabled")]
    PortDisabled(PortIndex),
    #[error("{count} buffer(s) still held by the client on port {port}")]
    BuffersOutstanding { port: PortIndex, count: usize },
    #[error("stream corrupt: {0}")]
    StreamCorrupt(String),
    #[error("tunnel error: {0}")]
    Tunnel(String),
    #[error("hardware error: {0}")]
    Hardware(String),
}

impl HwError {
    pub fn timeout(op: &'static str, after: Duration) -> Self {
        HwError::Timeout { op, after }
    }

    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            HwError::ComponentUnavailable { .. } => "component_unavailable",
            HwError::InsufficientResources(_) => "insufficient_resources",
            HwError::BadParameter(_) => "bad_parameter",
            HwError::Timeout { .. } => "timeout",
            HwError::IncorrectState { .. } => "incorrect_state",
            HwError::PortBusy(_) => "port_busy",
            HwError::PortDisabled(_) => "port_disabled",
            HwError::BuffersOutstanding { .. } => "buffers_outstanding",
            HwError::StreamCorrupt(_) => "stream_corrupt",
            HwError::Tunnel(_) => "tunnel_error",
            HwError::Hardware(_) => "hardware_error",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HwError::Timeout { .. })
    }
}

/// Failure reported by the graphics context owner.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphicsError {
    #[error("graphics context unavailable: {0}")]
    ContextUnavailable(String),
    #[error("texture operation failed: {0}")]
    Texture(String),
    #[error("egl image operation failed: {0}")]
    EglImage(String),
}
