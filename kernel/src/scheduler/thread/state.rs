//! State - Thread state machine and wait conditions
//!
//! The scheduler derives a thread's state from two facts: its `alive` flag
//! and which of its core's queues currently links it (`QueueSlot`).

use super::thread::ThreadId;
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

/// Thread state, as seen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created but not yet added to a scheduler
    Created,
    /// In a run queue
    Runnable,
    /// Current thread of its core
    Running,
    /// In a wait queue
    Waiting,
    /// Killed, waiting to be reaped
    Dead,
}

impl ThreadState {
    /// Running or runnable: counts toward its core's load
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Runnable)
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Runnable => write!(f, "Runnable"),
            Self::Running => write!(f, "Running"),
            Self::Waiting => write!(f, "Waiting"),
            Self::Dead => write!(f, "Dead"),
        }
    }
}

/// Which per-core structure links the thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueueSlot {
    /// Linked nowhere (not added yet, idle entry, or reaped)
    Detached = 0,
    Run = 1,
    Wait = 2,
    /// `current_entry` of its core, in neither queue
    Current = 3,
}

impl QueueSlot {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Run,
            2 => Self::Wait,
            3 => Self::Current,
            _ => Self::Detached,
        }
    }
}

/// Atomic queue slot, written only by the owning core's scheduler
pub struct AtomicQueueSlot {
    slot: AtomicU8,
}

impl AtomicQueueSlot {
    pub const fn new(slot: QueueSlot) -> Self {
        Self {
            slot: AtomicU8::new(slot as u8),
        }
    }

    pub fn load(&self) -> QueueSlot {
        QueueSlot::from_u8(self.slot.load(Ordering::Acquire))
    }

    pub fn store(&self, slot: QueueSlot) {
        self.slot.store(slot as u8, Ordering::Release);
    }
}

/// Condition a waiting thread is blocked on
///
/// Deadlines are core-local uptime in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitState {
    /// No condition; ready at the next pass
    #[default]
    None,
    /// Sleep until the deadline
    Time { deadline_ms: u64 },
    /// User-space atomic lock, optionally with a timeout
    AtomicLock { address: usize, deadline_ms: Option<u64> },
    /// Receive on the thread's message box
    MessageBox { deadline_ms: Option<u64> },
    /// Termination of another thread
    Join { target: ThreadId },
    /// Delivery of an IRQ to a driver thread
    Irq { irq: u8, deadline_ms: Option<u64> },
}

impl WaitState {
    /// Deadline after which the wait ends regardless of its condition
    pub fn deadline_ms(&self) -> Option<u64> {
        match *self {
            Self::None | Self::Join { .. } => None,
            Self::Time { deadline_ms } => Some(deadline_ms),
            Self::AtomicLock { deadline_ms, .. }
            | Self::MessageBox { deadline_ms }
            | Self::Irq { deadline_ms, .. } => deadline_ms,
        }
    }

    pub fn timed_out(&self, now_ms: u64) -> bool {
        self.deadline_ms().map_or(false, |deadline| now_ms >= deadline)
    }
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Time { deadline_ms } => write!(f, "sleep until {}ms", deadline_ms),
            Self::AtomicLock { address, .. } => write!(f, "atomic {:#x}", address),
            Self::MessageBox { .. } => write!(f, "message"),
            Self::Join { target } => write!(f, "join {}", target),
            Self::Irq { irq, .. } => write!(f, "irq {}", irq),
        }
    }
}
