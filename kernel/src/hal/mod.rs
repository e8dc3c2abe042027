//! Hardware boundary
//!
//! The tasking core never touches CPU registers, interrupt flags or device
//! state directly. Architecture code implements these ports; `mock`
//! provides host implementations for tests and bring-up.

pub mod mock;

use crate::memory::PhysicalAddress;
use crate::process::ProcessId;
use crate::scheduler::thread::{CpuState, ThreadId};
use alloc::sync::Arc;

/// Interrupt masking on the current core
pub trait InterruptControl: Send + Sync {
    /// Mask interrupts, returning whether they were enabled before
    fn disable(&self) -> bool;

    /// Unmask interrupts
    fn enable(&self);

    fn are_enabled(&self) -> bool;
}

/// Saves and restores CPU register state
///
/// The scheduler stores the returned blob and hands it back unchanged; it
/// never interprets the bytes.
pub trait ContextSwitchPort: Send + Sync {
    /// Capture the interrupted register frame
    fn save_state(&self, raw: &[u8]) -> CpuState;

    /// Load `state` in address space `directory` and enter it
    fn restore_and_enter(&self, state: &CpuState, directory: PhysicalAddress) -> !;
}

/// External facts the wait states depend on
///
/// Messaging, user-space atomics and IRQ delivery live outside the tasking
/// core; the scheduler only asks whether a waiter's condition now holds.
pub trait WaitOracle: Send + Sync {
    /// The atomic word at `address` in `process` is released
    fn atomic_released(&self, _process: ProcessId, _address: usize) -> bool {
        false
    }

    /// A message is queued for `thread`
    fn message_available(&self, _thread: ThreadId) -> bool {
        false
    }

    /// IRQ `irq` fired since the waiter registered
    fn irq_fired(&self, _irq: u8) -> bool {
        false
    }
}

/// The ports one kernel instance runs against
#[derive(Clone)]
pub struct Ports {
    pub interrupts: Arc<dyn InterruptControl>,
    pub switch: Arc<dyn ContextSwitchPort>,
    pub oracle: Arc<dyn WaitOracle>,
}

impl Ports {
    /// Host ports: atomic interrupt flag, panicking switch, test-driven oracle
    pub fn mock() -> (Self, Arc<mock::MockInterrupts>, Arc<mock::MockOracle>) {
        let interrupts = Arc::new(mock::MockInterrupts::new());
        let oracle = Arc::new(mock::MockOracle::new());
        let ports = Self {
            interrupts: interrupts.clone(),
            switch: Arc::new(mock::MockSwitchPort),
            oracle: oracle.clone(),
        };
        (ports, interrupts, oracle)
    }
}
