//! Unified error handling for sparse-comm
//!
//! Every fallible public operation returns [`CommResult`]. Errors are grouped
//! into categories so callers can tell a bad plan from an exhausted device,
//! a misuse of the engine, or a device fault:
//! - Plan errors (invalid or unparsable transfer plan)
//! - Resource errors (device memory exhausted)
//! - Precondition errors (buffers, lengths or call order inconsistent)
//! - Device errors (stream faults, closed streams)
//! - Internal errors (bugs)

use std::fmt;

use crate::backend::DeviceError;
use crate::plan::PlanError;

/// Unified error type for sparse-comm
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    // ========== Plan Errors ==========
    /// Plan failed structural, role-specific or device-count validation
    #[error("Invalid transfer plan: {0}")]
    PlanInvalid(#[from] PlanError),

    /// Plan file could not be parsed
    #[error("Failed to parse transfer plan: {0}")]
    PlanParse(String),

    // ========== Resource Errors ==========
    /// Staging buffer allocation failed; nothing stays allocated
    #[error("Failed to allocate {elements} staging elements on device {device}: {source}")]
    DeviceAllocationFailure {
        device: usize,
        elements: usize,
        #[source]
        source: DeviceError,
    },

    // ========== Precondition Errors ==========
    /// Engine misuse: call order, buffer placement or lengths
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    /// Logical device index outside `0..num_devices`
    #[error("Invalid device index {index} (context has {num_devices} devices)")]
    InvalidDeviceIndex { index: usize, num_devices: usize },

    /// Inconsistent context configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Device Errors ==========
    /// Error raised by the device backend
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    // ========== I/O Errors ==========
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Internal Errors ==========
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl CommError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            CommError::PlanInvalid(_) | CommError::PlanParse(_) | CommError::Io(_) => {
                ErrorCategory::Plan
            }
            CommError::DeviceAllocationFailure { .. } => ErrorCategory::Resource,
            CommError::PreconditionViolation(_)
            | CommError::InvalidDeviceIndex { .. }
            | CommError::InvalidConfiguration(_) => ErrorCategory::Precondition,
            CommError::Device(DeviceError::LockPoisoned(_)) | CommError::LockPoisoned(_) => {
                ErrorCategory::Internal
            }
            CommError::Device(_) => ErrorCategory::Device,
        }
    }

    /// True for errors that can only come out of engine construction.
    ///
    /// These leave no engine behind; the caller has to build a new one.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            CommError::PlanInvalid(_)
                | CommError::PlanParse(_)
                | CommError::DeviceAllocationFailure { .. }
                | CommError::InvalidConfiguration(_)
        )
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transfer plan is unusable
    Plan,
    /// Device memory exhausted
    Resource,
    /// Caller broke an engine precondition
    Precondition,
    /// Device stream failure
    Device,
    /// Indicates a bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Plan => write!(f, "Plan"),
            ErrorCategory::Resource => write!(f, "Resource"),
            ErrorCategory::Precondition => write!(f, "Precondition"),
            ErrorCategory::Device => write!(f, "Device"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for CommError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        CommError::LockPoisoned(err.to_string())
    }
}

/// Helper type alias for Results using CommError
pub type CommResult<T> = std::result::Result<T, CommError>;

/// Create a precondition error with context
///
/// # Examples
/// ```ignore
/// return Err(precondition!("send count {} exceeds source length {}", count, len));
/// ```
#[macro_export]
macro_rules! precondition {
    ($msg:expr) => {
        $crate::error::CommError::PreconditionViolation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::CommError::PreconditionViolation(format!($fmt, $($arg)*))
    };
}
