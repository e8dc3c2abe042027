//! Idle Thread Implementation
//!
//! One idle thread per core, owned by the kernel process. It is never
//! queued, never killed and holds no stack lease: architecture code runs its
//! halt loop on the core's boot stack.

use super::core::Scheduler;
use super::thread::{Thread, ThreadType};
use crate::logger;
use crate::process::ProcessManager;
use alloc::format;
use alloc::sync::Arc;

/// Create the idle thread for `scheduler`'s core and install it
pub fn install(processes: &ProcessManager, scheduler: &Scheduler) -> Arc<Thread> {
    let idle = processes.create_idle_thread(scheduler.core_id());
    scheduler.set_idle(idle.clone());
    logger::debug(&format!("core {}: idle thread {}", scheduler.core_id(), idle.id()));
    idle
}

pub fn is_idle(thread: &Thread) -> bool {
    thread.kind() == ThreadType::Idle
}
