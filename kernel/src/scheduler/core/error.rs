//! Tasking Error Handling
//!
//! Typed errors for process/thread lifecycle operations, with recovery hints
//! for the syscall layer. Scheduling itself never fails with a recoverable
//! error; its only failure is fatal (see `kassert!`).

use crate::memory::range_pool::RangeError;
use crate::scheduler::thread::ThreadType;
use core::fmt;

/// Tasking error types with detailed context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskingError {
    // ═══════════════════════════════════════════════════════════════
    // Memory Errors
    // ═══════════════════════════════════════════════════════════════

    /// A pool had no range large enough
    OutOfMemory { requested_pages: usize },

    /// Range bookkeeping rejected a release (unknown or already free)
    RangeRelease(RangeError),

    // ═══════════════════════════════════════════════════════════════
    // Lookup Errors
    // ═══════════════════════════════════════════════════════════════

    /// Process not found in the process table
    ProcessNotFound { pid: u64 },

    /// Thread not found
    ThreadNotFound { thread_id: u64 },

    /// Core index past the configured core count
    CoreNotFound { core: usize },

    /// Process is being torn down and accepts no new threads
    ProcessDying { pid: u64 },

    /// Thread kind that cannot be created on request (idle)
    InvalidThreadKind { kind: ThreadType },

    // ═══════════════════════════════════════════════════════════════
    // Boot Errors
    // ═══════════════════════════════════════════════════════════════

    /// Configuration rejected by `KernelConfig::validate`
    InvalidConfig { reason: &'static str },
}

impl fmt::Display for TaskingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested_pages } => {
                write!(f, "OOM: no range of {} pages", requested_pages)
            }
            Self::RangeRelease(err) => write!(f, "range release failed: {}", err),
            Self::ProcessNotFound { pid } => write!(f, "Process {} not found", pid),
            Self::ThreadNotFound { thread_id } => write!(f, "Thread {} not found", thread_id),
            Self::CoreNotFound { core } => write!(f, "Core {} not present", core),
            Self::ProcessDying { pid } => write!(f, "Process {} is terminating", pid),
            Self::InvalidThreadKind { kind } => write!(f, "Cannot create {:?} thread", kind),
            Self::InvalidConfig { reason } => write!(f, "Invalid config: {}", reason),
        }
    }
}

impl From<RangeError> for TaskingError {
    fn from(err: RangeError) -> Self {
        match err {
            RangeError::OutOfSpace { requested } => Self::OutOfMemory {
                requested_pages: requested,
            },
            other => Self::RangeRelease(other),
        }
    }
}

impl TaskingError {
    /// Get recovery hint for this error
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "Free memory or reduce stack sizes",
            Self::RangeRelease(_) => "Check range ownership, possible double release",
            Self::ProcessNotFound { .. } => "Process may have already terminated",
            Self::ThreadNotFound { .. } => "Thread may have already terminated",
            Self::ProcessDying { .. } => "Process is exiting, do not add threads",
            Self::CoreNotFound { .. } => "Use a core index below the core count",
            Self::InvalidThreadKind { .. } => "Idle threads are created per core at boot",
            Self::InvalidConfig { .. } => "Fix the boot configuration",
        }
    }

    /// Is this a recoverable error?
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidConfig { .. } | Self::RangeRelease(_))
    }

    /// Should this error be logged?
    pub fn should_log(&self) -> bool {
        match self {
            Self::ThreadNotFound { .. } => false, // Common during cleanup
            Self::ProcessNotFound { .. } => false,
            _ => true,
        }
    }

    /// Get error severity (0-3)
    pub fn severity(&self) -> u8 {
        match self {
            Self::InvalidConfig { .. } => 3,  // Critical
            Self::RangeRelease(_) => 3,
            Self::OutOfMemory { .. } => 2,    // Severe
            Self::ProcessDying { .. } => 1,   // Warning
            _ => 0,                           // Info
        }
    }
}

/// Result type for tasking operations
pub type TaskingResult<T> = Result<T, TaskingError>;

/// Log a tasking error with its recovery hint, evaluating to the error
#[macro_export]
macro_rules! sched_error {
    ($err:expr) => {{
        let err = $err;
        if err.should_log() {
            log::error!("[SCHED] Error: {} (hint: {})", err, err.recovery_hint());
        }
        err
    }};
}

/// Fatal kernel invariant check: halts with context instead of continuing
/// on corrupted state
#[macro_export]
macro_rules! kassert {
    ($cond:expr, $reason:expr) => {
        if !$cond {
            panic!("[KERNEL CRITICAL] Invariant violated: {}", $reason);
        }
    };
    ($cond:expr, $fmt:literal, $($arg:tt)+) => {
        if !$cond {
            panic!(concat!("[KERNEL CRITICAL] Invariant violated: ", $fmt), $($arg)+);
        }
    };
}
