//! Host-side port implementations
//!
//! Used by the unit and integration tests, and usable for bring-up on a
//! hosted target. No hardware is touched.

use super::{ContextSwitchPort, InterruptControl, WaitOracle};
use crate::memory::PhysicalAddress;
use crate::process::ProcessId;
use crate::scheduler::thread::{CpuState, ThreadId};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::Mutex;

/// Interrupt flag kept in an atomic, with a count of mask operations
pub struct MockInterrupts {
    enabled: AtomicBool,
    disables: AtomicUsize,
}

impl MockInterrupts {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            disables: AtomicUsize::new(0),
        }
    }

    /// Number of `disable` calls so far
    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::Relaxed)
    }
}

impl Default for MockInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptControl for MockInterrupts {
    fn disable(&self) -> bool {
        self.disables.fetch_add(1, Ordering::Relaxed);
        self.enabled.swap(false, Ordering::AcqRel)
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    fn are_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// Context switch port that copies raw frames into the blob and panics on
/// enter with the target directory, so tests can observe the switch
pub struct MockSwitchPort;

impl ContextSwitchPort for MockSwitchPort {
    fn save_state(&self, raw: &[u8]) -> CpuState {
        CpuState::from_bytes(raw)
    }

    fn restore_and_enter(&self, state: &CpuState, directory: PhysicalAddress) -> ! {
        panic!(
            "restore_and_enter: directory {:#x} state[0]={:#x}",
            directory.value(),
            state.as_bytes()[0]
        );
    }
}

/// Wait oracle driven by the test: released atomics, pending messages and
/// fired IRQs are plain sets
pub struct MockOracle {
    atomics: Mutex<Vec<(ProcessId, usize)>>,
    messages: Mutex<Vec<ThreadId>>,
    irqs: Mutex<Vec<u8>>,
}

impl MockOracle {
    pub const fn new() -> Self {
        Self {
            atomics: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            irqs: Mutex::new(Vec::new()),
        }
    }

    pub fn release_atomic(&self, process: ProcessId, address: usize) {
        self.atomics.lock().push((process, address));
    }

    pub fn post_message(&self, thread: ThreadId) {
        self.messages.lock().push(thread);
    }

    pub fn fire_irq(&self, irq: u8) {
        self.irqs.lock().push(irq);
    }
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitOracle for MockOracle {
    fn atomic_released(&self, process: ProcessId, address: usize) -> bool {
        self.atomics.lock().contains(&(process, address))
    }

    fn message_available(&self, thread: ThreadId) -> bool {
        self.messages.lock().contains(&thread)
    }

    fn irq_fired(&self, irq: u8) -> bool {
        self.irqs.lock().contains(&irq)
    }
}
