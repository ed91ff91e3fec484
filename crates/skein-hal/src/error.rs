//! Error types for HAL operations

/// Result type for HAL operations
pub type Result<T> = std::result::Result<T, HalError>;

/// Errors that can occur in HAL primitives and drivers
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    /// Timeline semaphores may only advance
    #[error("non-monotonic semaphore signal: current {current}, requested {requested}")]
    NonMonotonicSignal { current: u64, requested: u64 },

    /// A bounded wait ran out of time
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A loop callback reported failure
    #[error("loop callback failed: {0}")]
    Callback(String),

    /// Driver enumeration or device creation failed
    #[error("driver error: {0}")]
    Driver(String),

    /// Invalid queue index for a device
    #[error("queue ordinal {requested} out of range (device has {available} queues)")]
    InvalidQueue { requested: usize, available: usize },
}

impl HalError {
    /// Create a callback error
    pub fn callback(msg: impl Into<String>) -> Self {
        Self::Callback(msg.into())
    }

    /// Create a driver error
    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }
}
