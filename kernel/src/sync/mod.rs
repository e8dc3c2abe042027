//! Synchronization primitives
//!
//! Per-core state is protected by masking interrupts on that core;
//! cross-core tables additionally take a `GlobalLock`, which can only be
//! acquired while an `InterruptGuard` is held.

pub mod global_lock;
pub mod interrupt_guard;

pub use global_lock::GlobalLock;
pub use interrupt_guard::InterruptGuard;
