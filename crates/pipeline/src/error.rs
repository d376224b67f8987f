use std::{io, path::PathBuf, time::Duration};

use hwimg_component::error::HwError;

/// Broad class of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A component, tunnel or buffer could not be obtained.
    Resource,
    /// The hardware did not acknowledge in time.
    Timeout,
    /// The hardware answered with something the pipeline did not expect.
    Protocol,
    /// The caller's input was rejected.
    Input,
    /// Reading or writing a file failed.
    Io,
}

/// Errors returned by the image pipelines.
///
/// Every hardware-facing failure leaves the pipeline torn down; the next call
/// rebuilds it.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use hwimg_pipeline::error::{FailureKind, PipelineError};
///
/// let err = PipelineError::Timeout {
///     stage: "port settings changed",
///     after: Duration::from_secs(2),
/// };
/// assert_eq!(err.kind(), FailureKind::Timeout);
/// assert_eq!(err.code(), "timeout");
/// assert!(err.retryable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },
    #[error("hardware resource unavailable: {0}")]
    Resource(#[source] HwError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("hardware failure: {0}")]
    Hardware(#[source] HwError),
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::InvalidInput(_) | PipelineError::Unsupported(_) => FailureKind::Input,
            PipelineError::Timeout { .. } => FailureKind::Timeout,
            PipelineError::Resource(_) => FailureKind::Resource,
            PipelineError::Protocol(_) => FailureKind::Protocol,
            PipelineError::Hardware(HwError::StreamCorrupt(_)) => FailureKind::Input,
            PipelineError::Hardware(_) => FailureKind::Protocol,
            PipelineError::Io { .. } => FailureKind::Io,
        }
    }

    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_) => "invalid_input",
            PipelineError::Unsupported(_) => "unsupported",
            PipelineError::Timeout { .. } => "timeout",
            PipelineError::Resource(_) => "resource_unavailable",
            PipelineError::Protocol(_) => "protocol_error",
            PipelineError::Hardware(err) => err.code(),
            PipelineError::Io { .. } => "io_error",
        }
    }

    /// Whether calling again after the teardown may succeed.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Timeout { .. } | PipelineError::Resource(_)
        )
    }
}

impl From<HwError> for PipelineError {
    fn from(err: HwError) -> Self {
        match err {
            HwError::Timeout { op, after } => PipelineError::Timeout { stage: op, after },
            HwError::ComponentUnavailable { .. }
            | HwError::InsufficientResources(_)
            | HwError::Tunnel(_) => PipelineError::Resource(err),
            other => PipelineError::Hardware(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwimg_component::port::PortIndex;

    #[test]
    fn hardware_errors_are_classified() {
        let err: PipelineError = HwError::timeout("enable port", Duration::from_millis(3)).into();
        assert!(matches!(
            err,
            PipelineError::Timeout {
                stage: "enable port",
                ..
            }
        ));

        let err: PipelineError = HwError::ComponentUnavailable {
            name: "OMX.broadcom.resize",
            reason: "busy".into(),
        }
        .into();
        assert_eq!(err.kind(), FailureKind::Resource);
        assert!(err.retryable());

        let err: PipelineError = HwError::StreamCorrupt("bad marker".into()).into();
        assert_eq!(err.kind(), FailureKind::Input);
        assert_eq!(err.code(), "stream_corrupt");

        let err: PipelineError = HwError::PortBusy(PortIndex(60)).into();
        assert_eq!(err.kind(), FailureKind::Protocol);
        assert!(!err.retryable());
    }

    #[test]
    fn io_errors_name_the_path() {
        let err = PipelineError::io(
            "/tmp/missing.jpg",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.kind(), FailureKind::Io);
        assert!(err.to_string().contains("/tmp/missing.jpg"));
    }
}
