//! Memory management subsystem
//!
//! Page-granular bookkeeping only: the pools track which address ranges are
//! in use, acquiring and mapping the pages themselves is the caller's job.

pub mod address;
pub mod range_pool;

// Re-exports
pub use address::{PageAddress, PhysicalAddress, VirtualAddress};
pub use range_pool::{AddressRange, AddressRangePool, RangeError, RangeFlags};

/// Page size (4KB)
pub const PAGE_SIZE: usize = 4096;

static_assertions::const_assert!(PAGE_SIZE.is_power_of_two());

/// Pool over the kernel-wide physical window
pub type PhysicalPool = AddressRangePool<PhysicalAddress>;

/// Pool over one process's user virtual window
pub type VirtualPool = AddressRangePool<VirtualAddress>;

/// Round down to the start of the page
pub const fn page_align_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Round up to the start of the next page
pub const fn page_align_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

// Error type for memory operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    OutOfMemory,
    InvalidAddress,
    AlignmentError,
    InvalidSize,
}

impl core::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            MemoryError::OutOfMemory => write!(f, "Out of memory"),
            MemoryError::InvalidAddress => write!(f, "Invalid address"),
            MemoryError::AlignmentError => write!(f, "Alignment error"),
            MemoryError::InvalidSize => write!(f, "Invalid size"),
        }
    }
}

pub type MemoryResult<T> = Result<T, MemoryError>;
