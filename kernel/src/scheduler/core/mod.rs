//! Scheduler core module
//!
//! - `scheduler`: per-core round-robin queues, reaping and wait handling
//! - `loadbalancer`: placement of new threads across cores
//! - `statistics`: per-core counters and snapshots
//! - `error`: tasking errors and the fatal-check macros

pub mod error;
pub mod loadbalancer;
pub mod scheduler;
pub mod statistics;

pub use error::{TaskingError, TaskingResult};
pub use scheduler::Scheduler;
pub use statistics::{SchedulerStatistics, SchedulerStats};
