use thiserror::Error;

/// Result type for scaling operations
pub type Result<T> = std::result::Result<T, ScaleError>;

/// Errors returned by the scaling controller and its backends
#[derive(Error, Debug)]
pub enum ScaleError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("hardware apply failed at step {step}: {reason}")]
    HardwareApplyFailed { step: usize, reason: String },

    #[error("invalid threshold table: {0}")]
    InvalidTable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScaleError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn hardware(step: usize, reason: impl std::fmt::Display) -> Self {
        Self::HardwareApplyFailed {
            step,
            reason: reason.to_string(),
        }
    }
}
