//! Error types for VM operations

/// Result type for VM operations
pub type VmResult<T> = std::result::Result<T, VmError>;

/// Errors that can occur while linking modules or executing functions
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// A module references a function no earlier module exports
    #[error("unresolved import '{import}' required by module '{module}'")]
    UnresolvedImport { module: String, import: String },

    /// Arguments do not match the function signature
    #[error("calling convention mismatch for '{function}': {detail}")]
    CallingConvention { function: String, detail: String },

    /// Value kind mismatch during execution
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Register index outside the register file
    #[error("invalid register r{0}")]
    InvalidRegister(u8),

    /// Register read before any write
    #[error("uninitialized register r{0}")]
    UninitializedRegister(u8),

    /// Argument index outside the argument list
    #[error("invalid argument index {0}")]
    InvalidArgumentIndex(u8),

    /// Module container could not be decoded
    #[error("module parse error: {0}")]
    Parse(String),

    /// Generic execution failure
    #[error("execution error: {0}")]
    Execution(String),

    /// Completion-side fence signaling failed
    #[error("signal failed: {0}")]
    Signal(#[from] skein_hal::HalError),
}

impl VmError {
    pub fn type_mismatch(expected: impl std::fmt::Display, actual: impl std::fmt::Display) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}
