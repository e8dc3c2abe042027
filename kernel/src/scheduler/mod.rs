//! Scheduler subsystem
//!
//! Per-core round-robin scheduling with lazy reaping of dead threads.

pub mod core;
pub mod idle;
pub mod thread;

// Re-exports
pub use self::core::{Scheduler, SchedulerStats};
pub use thread::{
    CpuState, QueueSlot, Thread, ThreadId, ThreadMemory, ThreadPriority, ThreadState, ThreadType,
    ThreadTypeMask, WaitState,
};
