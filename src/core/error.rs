//! Error types for the kernel
//!
//! Recoverable misuse is reported through `OsResult`; broken invariants go
//! through [`crate::panic::software_panic`] instead.

use core::fmt;

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum OsError {
    // ============ Resource errors ============
    /// Resource already in use (e.g. a deadline is already armed)
    Busy = 1,

    // ============ Argument errors ============
    /// Task id out of range or not in the table
    InvalidTask = 10,
    /// Argument not valid for this operation
    InvalidArgument = 11,
    /// Task does not take part in the reset protocol
    ResetUnsupported = 12,

    // ============ Configuration errors ============
    /// Stack too small or misaligned
    StackSizeInvalid = 20,
    /// Task table does not fit the id space
    TooManyTasks = 21,

    // ============ OS state errors ============
    /// Kernel not initialized
    OsNotInit = 30,
    /// Kernel is already running
    OsRunning = 31,
    /// Kernel is not running
    OsNotRunning = 32,
}

/// Result type alias for kernel operations
pub type OsResult<T> = Result<T, OsError>;

impl OsError {
    /// Numeric error code, stable across builds
    #[inline]
    pub const fn code(self) -> u16 {
        self as u16
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            OsError::Busy => "busy",
            OsError::InvalidTask => "invalid task",
            OsError::InvalidArgument => "invalid argument",
            OsError::ResetUnsupported => "reset unsupported",
            OsError::StackSizeInvalid => "invalid stack size",
            OsError::TooManyTasks => "too many tasks",
            OsError::OsNotInit => "not initialized",
            OsError::OsRunning => "already running",
            OsError::OsNotRunning => "not running",
        }
    }
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}
