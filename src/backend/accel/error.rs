//! Device backend error types

use thiserror::Error;

/// Device backend error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Memory allocation failed: {0}")]
    MemoryAllocationFailed(String),
    #[error("Memory copy failed: {0}")]
    MemoryCopyFailed(String),
    #[error("Stream fault on device {device}: {message}")]
    StreamFault { device: usize, message: String },
    #[error("Stream for device {0} is closed")]
    StreamClosed(usize),
    #[error("Internal lock poisoned - this indicates a bug: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for DeviceError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        DeviceError::LockPoisoned(format!("Lock poisoned: {}", err))
    }
}

/// Device result type
pub type DeviceResult<T> = Result<T, DeviceError>;

impl DeviceError {
    /// Check if this error is recoverable (temporary condition)
    ///
    /// Only allocation failures qualify: memory may be released by another
    /// owner on the same device. A faulted or closed stream stays faulted.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DeviceError::MemoryAllocationFailed(_))
    }

    /// Check if this error is permanent (should never retry)
    pub fn is_permanent(&self) -> bool {
        !self.is_recoverable()
    }
}
