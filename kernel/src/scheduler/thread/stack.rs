//! Stack - Thread stack and TLS ranges
//!
//! A user thread's memory is two ranges of its process's virtual pool
//! (stack, thread-local storage) plus the physical pages backing the stack.
//! The lease is taken out of the thread exactly once, when it is reaped.

use crate::memory::{PhysicalAddress, VirtualAddress, PAGE_SIZE};
use alloc::vec::Vec;

/// Ranges owned by one thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMemory {
    /// Stack base (lowest address)
    pub stack: VirtualAddress,
    pub stack_pages: usize,
    /// Thread-local storage block, if the process uses TLS
    pub tls: Option<VirtualAddress>,
    pub tls_pages: usize,
    /// Physical allocations backing the ranges above
    pub physical: Vec<PhysicalAddress>,
}

impl ThreadMemory {
    /// Stack top (highest address, initial stack pointer)
    pub fn stack_top(&self) -> VirtualAddress {
        self.stack + self.stack_pages * PAGE_SIZE
    }

    pub fn virtual_pages(&self) -> usize {
        self.stack_pages + if self.tls.is_some() { self.tls_pages } else { 0 }
    }
}
