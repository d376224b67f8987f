//! Persistent write capability.

use std::path::Path;

use crate::error::PipelineError;

/// Writes finished images somewhere durable.
pub trait ImageWriter: Send + Sync {
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), PipelineError>;
}

/// Writes to the local filesystem, creating parent directories as needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsWriter;

impl ImageWriter for FsWriter {
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
        std::fs::write(path, bytes).map_err(|e| PipelineError::io(path, e))?;
        tracing::debug!(file = %path.display(), bytes = bytes.len(), "wrote image");
        Ok(())
    }
}
