//! Unified error handling for hipresource
//!
//! Every fallible pool, allocator and transfer operation returns
//! [`ResourceError`]. The variants fall into the categories exposed by
//! [`ErrorCategory`]:
//! - Allocation errors (host or device allocator could not satisfy a request)
//! - Precondition errors (operation issued against an unsized or poisoned pool)
//! - Transfer errors (a host/device copy primitive reported a failure)
//! - Configuration errors (bad builder or environment values)
//!
//! Nothing in this crate retries. Every error is surfaced to the caller,
//! which is expected to abandon the current test or benchmark case.

use std::fmt;

/// Unified error type for hipresource
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResourceError {
    // ========== Allocation Errors ==========
    /// Device allocator could not provide the requested bytes
    #[error("Device allocation of {bytes} bytes failed: {reason}")]
    DeviceAllocationFailed { bytes: usize, reason: String },

    /// Host allocation could not be reserved
    #[error("Host allocation of {bytes} bytes failed: {reason}")]
    HostAllocationFailed { bytes: usize, reason: String },

    /// Growing the pool would exceed its configured device budget
    #[error("Device budget exceeded: {requested} bytes requested, budget is {budget} bytes")]
    BudgetExceeded { requested: usize, budget: usize },

    /// Releasing a device allocation failed
    #[error("Device free failed: {0}")]
    DeviceFreeFailed(String),

    // ========== Precondition Errors ==========
    /// Problem size produced a negative or overflowing element count
    #[error("Invalid problem size for {role}: {reason}")]
    InvalidProblemSize { role: &'static str, reason: String },

    /// Transfer issued before the pool was sized for that group
    #[error("{0} storage was never sized; resize the pool first")]
    Unsized(&'static str),

    /// Transfer used before the role was ever sized
    #[error("Role {0} has no device allocation; resize the pool first")]
    NotAllocated(&'static str),

    /// Pool was left inconsistent by an earlier allocation failure
    #[error("Pool is poisoned by an earlier allocation failure; rebuild it")]
    PoolPoisoned,

    /// Handle does not belong to the allocator it was handed to
    #[error("Unknown device handle: {0}")]
    UnknownHandle(u64),

    /// Copy length does not fit the source or destination
    #[error("Transfer of {bytes} bytes exceeds allocation of {capacity} bytes")]
    TransferOutOfBounds { bytes: usize, capacity: usize },

    // ========== Transfer Errors ==========
    /// Host to device copy failed
    #[error("Host to device copy failed: {0}")]
    HostToDeviceFailed(String),

    /// Device to host copy failed
    #[error("Device to host copy failed: {0}")]
    DeviceToHostFailed(String),

    /// Waiting for prior device work failed
    #[error("Device synchronization failed: {0}")]
    SynchronizeFailed(String),

    // ========== Configuration Errors ==========
    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Internal Errors ==========
    /// Lock poisoned (indicates a bug or a panic while holding the lock)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl ResourceError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            ResourceError::DeviceAllocationFailed { .. }
            | ResourceError::HostAllocationFailed { .. }
            | ResourceError::BudgetExceeded { .. }
            | ResourceError::DeviceFreeFailed(_) => ErrorCategory::Allocation,

            ResourceError::InvalidProblemSize { .. }
            | ResourceError::Unsized(_)
            | ResourceError::NotAllocated(_)
            | ResourceError::PoolPoisoned
            | ResourceError::UnknownHandle(_)
            | ResourceError::TransferOutOfBounds { .. } => ErrorCategory::Precondition,

            ResourceError::HostToDeviceFailed(_)
            | ResourceError::DeviceToHostFailed(_)
            | ResourceError::SynchronizeFailed(_) => ErrorCategory::Transfer,

            ResourceError::InvalidConfiguration(_) => ErrorCategory::Configuration,

            ResourceError::LockPoisoned(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the failed operation may be retried as-is
    ///
    /// Always `false`: the pool never retries or degrades, and a failed
    /// resize leaves the pool poisoned.
    pub fn is_recoverable(&self) -> bool {
        false
    }

    /// Check if this error indicates misuse of the pool by the caller
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Precondition | ErrorCategory::Internal
        )
    }

    /// Check if this error came from an allocator
    pub fn is_allocation_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Allocation)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Host or device allocator failure
    Allocation,
    /// Operation issued in a state where it is not defined
    Precondition,
    /// Copy primitive failure
    Transfer,
    /// Bad configuration value
    Configuration,
    /// Indicates a bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Allocation => write!(f, "Allocation"),
            ErrorCategory::Precondition => write!(f, "Precondition"),
            ErrorCategory::Transfer => write!(f, "Transfer"),
            ErrorCategory::Configuration => write!(f, "Configuration"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for ResourceError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ResourceError::LockPoisoned(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type ResourceResult<T> = std::result::Result<T, ResourceError>;
