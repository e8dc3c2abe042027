//! Boot-time configuration of the tasking core
//!
//! Validated once by `KernelContext::init`; there is no reconfiguration
//! after boot.

use crate::memory::{page_align_down, page_align_up, PAGE_SIZE};
use crate::scheduler::thread::ThreadPriority;
use crate::scheduler::core::error::{TaskingError, TaskingResult};
use log::LevelFilter;

/// Tasking configuration for initialization
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Number of cores, one scheduler each
    pub core_count: usize,
    /// Start of the physical window handed to the physical pool
    pub physical_start: usize,
    /// End (exclusive) of the physical window
    pub physical_end: usize,
    /// Start of each process's user virtual window
    pub user_start: usize,
    /// End (exclusive) of each process's user virtual window
    pub user_end: usize,
    /// Pages per thread stack
    pub stack_pages: usize,
    /// Pages per thread-local storage block
    pub tls_pages: usize,
    /// Timer tick period in milliseconds
    pub tick_ms: u64,
    /// Priority given to threads spawned without an explicit one
    pub default_priority: ThreadPriority,
    /// Maximum level handed to the logger
    pub log_level: LevelFilter,
}

impl KernelConfig {
    /// Configuration par défaut pour le démarrage
    pub fn default_config() -> Self {
        // Physical pages above the kernel image (16MB) up to 128MB, user
        // space between 4MB and 3GB.
        const PHYSICAL_START: usize = 0x0100_0000;
        const PHYSICAL_END: usize = 0x0800_0000;
        const USER_START: usize = 0x0040_0000;
        const USER_END: usize = 0xC000_0000;

        KernelConfig {
            core_count: 1,
            physical_start: PHYSICAL_START,
            physical_end: PHYSICAL_END,
            user_start: USER_START,
            user_end: USER_END,
            stack_pages: 4,
            tls_pages: 1,
            tick_ms: 10,
            default_priority: ThreadPriority::Normal,
            log_level: LevelFilter::Info,
        }
    }

    pub fn with_cores(mut self, core_count: usize) -> Self {
        self.core_count = core_count;
        self
    }

    /// Physical window, rounded inward to page boundaries
    pub fn with_physical_window(mut self, start: usize, end: usize) -> Self {
        self.physical_start = page_align_up(start);
        self.physical_end = page_align_down(end);
        self
    }

    /// User virtual window, rounded inward to page boundaries
    pub fn with_user_window(mut self, start: usize, end: usize) -> Self {
        self.user_start = page_align_up(start);
        self.user_end = page_align_down(end);
        self
    }

    pub fn with_stack_pages(mut self, stack_pages: usize, tls_pages: usize) -> Self {
        self.stack_pages = stack_pages;
        self.tls_pages = tls_pages;
        self
    }

    pub fn with_tick_ms(mut self, tick_ms: u64) -> Self {
        self.tick_ms = tick_ms;
        self
    }

    pub fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    /// Number of pages in the physical window
    pub fn physical_pages(&self) -> usize {
        (self.physical_end - self.physical_start) / PAGE_SIZE
    }

    /// Check everything `KernelContext::init` relies on
    pub fn validate(&self) -> TaskingResult<()> {
        if self.core_count == 0 {
            return Err(TaskingError::InvalidConfig { reason: "core_count must be > 0" });
        }
        if self.physical_end <= self.physical_start {
            return Err(TaskingError::InvalidConfig { reason: "empty physical window" });
        }
        if self.user_end <= self.user_start {
            return Err(TaskingError::InvalidConfig { reason: "empty user window" });
        }
        if self.physical_start % PAGE_SIZE != 0
            || self.physical_end % PAGE_SIZE != 0
            || self.user_start % PAGE_SIZE != 0
            || self.user_end % PAGE_SIZE != 0
        {
            return Err(TaskingError::InvalidConfig { reason: "window not page aligned" });
        }
        if self.stack_pages == 0 {
            return Err(TaskingError::InvalidConfig { reason: "stack_pages must be > 0" });
        }
        if self.tick_ms == 0 {
            return Err(TaskingError::InvalidConfig { reason: "tick_ms must be > 0" });
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::default_config()
    }
}
