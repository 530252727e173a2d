//! Workbench errors.

use smol_str::SmolStr;
use thiserror::Error;

use crate::control::ControlClientError;

/// Errors raised while loading, reconciling, or persisting workbench state.
///
/// Categorized failures (patch conflicts, validation checks, journey step
/// outcomes) are reported as structured data in their component results and
/// never surface through this enum.
#[derive(Debug, Error)]
pub enum WorkbenchError {
    /// Descriptor directory could not be read or written.
    #[error("descriptor io error '{path}': {source}")]
    DescriptorIo {
        path: SmolStr,
        #[source]
        source: std::io::Error,
    },

    /// A reserved descriptor file failed to parse.
    #[error("invalid descriptor '{file}': {message}")]
    InvalidDescriptor { file: SmolStr, message: SmolStr },

    /// Journey definition file failed to parse.
    #[error("invalid journey file '{file}': {message}")]
    InvalidJourney { file: SmolStr, message: SmolStr },

    /// Evidence store error (run directory or artifact write).
    #[error("evidence store error '{0}'")]
    Evidence(SmolStr),

    /// Control protocol error.
    #[error(transparent)]
    Control(#[from] ControlClientError),
}

impl WorkbenchError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::DescriptorIo {
            path: SmolStr::new(path.as_ref().to_string_lossy()),
            source,
        }
    }
}
