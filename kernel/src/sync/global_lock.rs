//! Cross-core lock
//!
//! A spinlock whose `lock` demands proof that interrupts are masked on the
//! calling core, so an interrupt handler can never spin on a lock its own
//! core already holds.

use super::InterruptGuard;
use spin::{Mutex, MutexGuard};

pub struct GlobalLock<T> {
    inner: Mutex<T>,
}

impl<T> GlobalLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquire the lock; released when the returned guard drops, which must
    /// happen before `_irq` is dropped
    pub fn lock<'g>(&'g self, _irq: &'g InterruptGuard<'_>) -> MutexGuard<'g, T> {
        self.inner.lock()
    }

    /// Non-spinning acquire for diagnostics paths
    pub fn try_lock<'g>(&'g self, _irq: &'g InterruptGuard<'_>) -> Option<MutexGuard<'g, T>> {
        self.inner.try_lock()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}
