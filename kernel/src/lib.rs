// src/lib.rs
// Cœur de tâches du noyau : ordonnanceur par cœur + pools de plages d'adresses
#![no_std] // Pas de bibliothèque standard

// Le harness de test de l'hôte a besoin de std
#[cfg(test)]
extern crate std;

// Import de alloc pour les allocations dynamiques
extern crate alloc;

// Modules du noyau
pub mod config;
pub mod hal;
pub mod kernel;
pub mod logger;
pub mod memory;
pub mod process;
pub mod scheduler;
pub mod sync;

pub use config::KernelConfig;
pub use kernel::{KernelContext, Ports};
pub use memory::range_pool::{AddressRange, AddressRangePool, RangeError, RangeFlags};
pub use memory::{PhysicalAddress, VirtualAddress, PAGE_SIZE};
pub use process::{ProcessId, ProcessManager};
pub use scheduler::{Scheduler, Thread, ThreadId, ThreadType, ThreadTypeMask, WaitState};
pub use scheduler::core::error::{TaskingError, TaskingResult};
