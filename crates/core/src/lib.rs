#![doc = include_str!("../README.md")]

pub mod buffer;
pub mod clamp;
pub mod completion;
pub mod format;
pub mod metrics;
pub mod queue;

pub mod prelude {
    pub use crate::{
        buffer::{BufferLease, BufferPool, BufferPoolMetrics},
        clamp::{ClampPolicy, HARDWARE_MAX_EDGE, clamp_limits},
        completion::{Completer, Completion, CompletionError, completion},
        format::{BYTES_PER_PIXEL, CodingType, FourCc, FrameGeometry, Orientation, Resolution},
        metrics::{Metrics, StageMetrics},
        queue::{RecvOutcome, SendOutcome, WorkRx, WorkTx, bounded, unbounded},
    };
}
