//! Thread module

pub mod stack;
pub mod state;
pub mod thread;

pub use stack::ThreadMemory;
pub use state::{QueueSlot, ThreadState, WaitState};
pub use thread::{CpuState, Thread, ThreadId, ThreadPriority, ThreadType, ThreadTypeMask, CPU_STATE_SIZE};
