//! Error types for runtime operations

use skein_hal::HalError;
use skein_vm::VmError;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the runtime.
///
/// User-thread entry points fail with these; loop and callback paths route
/// failures into futures instead because unwinding through a foreign
/// completion callback is not safe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad device name/index, conflicting affinity, unknown required
    /// function, unsupported parameter format
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// API misuse: worker started twice, kill before start, mutation of a
    /// scheduled invocation
    #[error("logic error: {0}")]
    Logic(String),

    /// VM status from linking, calling convention finalization, or execution
    #[error("vm failure: {0}")]
    Vm(#[from] VmError),

    /// HAL status from semaphores, fences, or drivers
    #[error("hal failure: {0}")]
    Hal(#[from] HalError),

    /// Filesystem failure while loading modules or parameters
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Self::Logic(msg.into())
    }
}
