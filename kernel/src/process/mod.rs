//! Process management
//!
//! The process table and the kernel-wide physical pool, shared by every
//! core's scheduler. A process owns its address space, its virtual-range
//! tracker and its threads; it is destroyed once its last thread is reaped.
//!
//! Lock order: process table, then physical pool. Both are `GlobalLock`s, so
//! every entry point masks interrupts first.

pub mod address_space;

pub use address_space::AddressSpace;

use crate::config::KernelConfig;
use crate::hal::InterruptControl;
use crate::logger;
use crate::memory::{PhysicalAddress, PhysicalPool, RangeFlags, VirtualAddress, VirtualPool};
use crate::scheduler::core::error::{TaskingError, TaskingResult};
use crate::scheduler::idle;
use crate::scheduler::thread::{
    CpuState, Thread, ThreadId, ThreadMemory, ThreadPriority, ThreadType,
};
use crate::sync::{GlobalLock, InterruptGuard};
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use hashbrown::HashMap;

/// Process ID type
pub type ProcessId = u64;

/// The kernel's own process, owner of idle and kernel threads
pub const KERNEL_PID: ProcessId = 0;

/// Process Control Block
pub struct Process {
    pid: ProcessId,
    identifier: Option<String>,
    /// Non-owning link to the parent
    parent: Option<ProcessId>,
    children: Vec<ProcessId>,
    address_space: AddressSpace,
    /// Threads not yet reaped
    threads: Vec<Arc<Thread>>,
    /// Set by `mark_process_dead`; no new threads are accepted
    dying: bool,
}

/// Read-only snapshot of a process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    pub identifier: Option<String>,
    pub parent: Option<ProcessId>,
    pub children: Vec<ProcessId>,
    pub directory: PhysicalAddress,
    pub thread_count: usize,
    pub virtual_used_pages: usize,
    pub dying: bool,
}

impl Process {
    fn info(&self) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            identifier: self.identifier.clone(),
            parent: self.parent,
            children: self.children.clone(),
            directory: self.address_space.directory(),
            thread_count: self.threads.len(),
            virtual_used_pages: self.address_space.virtual_ranges().used_pages(),
            dying: self.dying,
        }
    }
}

/// What releasing a thread led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// The thread was already released
    AlreadyReleased,
    /// Thread resources returned, process lives on
    ThreadReleased,
    /// It was the last thread: the process was destroyed too
    ProcessDestroyed(ProcessId),
}

struct ProcessTable {
    processes: HashMap<ProcessId, Process>,
    threads: HashMap<ThreadId, Arc<Thread>>,
}

pub struct ProcessManager {
    config: KernelConfig,
    interrupts: Arc<dyn InterruptControl>,
    table: GlobalLock<ProcessTable>,
    physical: GlobalLock<PhysicalPool>,
    next_pid: AtomicU64,
    next_tid: AtomicU64,
}

impl ProcessManager {
    /// Build the physical pool and the kernel process
    pub fn new(config: KernelConfig, interrupts: Arc<dyn InterruptControl>) -> TaskingResult<Self> {
        config.validate()?;

        let mut physical = PhysicalPool::new();
        physical.initialize(
            PhysicalAddress::new(config.physical_start),
            PhysicalAddress::new(config.physical_end),
        );

        let manager = Self {
            interrupts,
            table: GlobalLock::new(ProcessTable {
                processes: HashMap::new(),
                threads: HashMap::new(),
            }),
            physical: GlobalLock::new(physical),
            next_pid: AtomicU64::new(KERNEL_PID),
            next_tid: AtomicU64::new(1),
            config,
        };
        manager.create_process_inner(None, Some("kernel"), None)?;

        log::info!(
            "process manager: {} physical pages, user window {:#x}..{:#x}",
            manager.config.physical_pages(),
            manager.config.user_start,
            manager.config.user_end
        );
        Ok(manager)
    }

    fn guard(&self) -> InterruptGuard<'_> {
        InterruptGuard::new(&*self.interrupts)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Create an empty process (no threads) under `parent`
    pub fn create_process(
        &self,
        parent: Option<ProcessId>,
        identifier: Option<&str>,
    ) -> TaskingResult<ProcessId> {
        self.create_process_inner(parent, identifier, None)
    }

    /// Create a process whose virtual ranges copy `parent`'s
    pub fn fork_process(&self, parent: ProcessId) -> TaskingResult<ProcessId> {
        self.create_process_inner(Some(parent), None, Some(parent))
    }

    fn create_process_inner(
        &self,
        parent: Option<ProcessId>,
        identifier: Option<&str>,
        fork_from: Option<ProcessId>,
    ) -> TaskingResult<ProcessId> {
        let irq = self.guard();
        let mut table = self.table.lock(&irq);

        if let Some(ppid) = parent {
            match table.processes.get(&ppid) {
                Some(p) if p.dying => return Err(TaskingError::ProcessDying { pid: ppid }),
                Some(_) => {}
                None => return Err(TaskingError::ProcessNotFound { pid: ppid }),
            }
        }

        let address_space = {
            let mut physical = self.physical.lock(&irq);
            match fork_from.and_then(|pid| table.processes.get(&pid)) {
                Some(source) => AddressSpace::fork(&mut physical, &source.address_space),
                None => AddressSpace::create(
                    &mut physical,
                    VirtualAddress::new(self.config.user_start),
                    VirtualAddress::new(self.config.user_end),
                ),
            }
        };
        let address_space = address_space.map_err(|err| crate::sched_error!(err))?;

        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let process = Process {
            pid,
            identifier: identifier.map(String::from),
            parent,
            children: Vec::new(),
            address_space,
            threads: Vec::new(),
            dying: false,
        };
        table.processes.insert(pid, process);
        if let Some(ppid) = parent {
            if let Some(p) = table.processes.get_mut(&ppid) {
                p.children.push(pid);
            }
        }

        log::debug!("process {} created (parent {:?})", pid, parent);
        Ok(pid)
    }

    /// Create a user or kernel thread in `pid` with a stack and TLS block
    ///
    /// On exhaustion every range taken so far is given back and
    /// `OutOfMemory` is returned. Idle threads come from
    /// `create_idle_thread` only.
    pub fn create_thread(
        &self,
        pid: ProcessId,
        kind: ThreadType,
        identifier: Option<&str>,
        initial_state: CpuState,
    ) -> TaskingResult<Arc<Thread>> {
        if kind == ThreadType::Idle {
            return Err(TaskingError::InvalidThreadKind { kind });
        }

        let irq = self.guard();
        let mut table = self.table.lock(&irq);
        let table = &mut *table;

        let process = match table.processes.get_mut(&pid) {
            Some(p) if p.dying => return Err(TaskingError::ProcessDying { pid }),
            Some(p) => p,
            None => return Err(TaskingError::ProcessNotFound { pid }),
        };

        let memory = {
            let mut physical = self.physical.lock(&irq);
            Self::lease_thread_memory(&self.config, process, &mut physical)
        };
        let memory = memory.map_err(|err| crate::sched_error!(err))?;

        let id = self.next_tid.fetch_add(1, Ordering::Relaxed);
        let mut thread = Thread::new(id, pid, kind, self.config.default_priority, initial_state)
            .with_memory(memory);
        if let Some(name) = identifier {
            thread = thread.with_identifier(name);
        }
        let thread = Arc::new(thread);

        process.threads.push(thread.clone());
        table.threads.insert(id, thread.clone());

        log::debug!("thread {} ({:?}) created in process {}", id, kind, pid);
        Ok(thread)
    }

    fn lease_thread_memory(
        config: &KernelConfig,
        process: &mut Process,
        physical: &mut PhysicalPool,
    ) -> TaskingResult<ThreadMemory> {
        let ranges = process.address_space.virtual_ranges_mut();

        let stack = ranges.allocate(config.stack_pages, RangeFlags::USER | RangeFlags::STACK)?;

        let tls = if config.tls_pages > 0 {
            match ranges.allocate(config.tls_pages, RangeFlags::USER | RangeFlags::TLS) {
                Ok(tls) => Some(tls),
                Err(err) => {
                    Self::rollback_virtual(ranges, Some(stack));
                    return Err(err.into());
                }
            }
        } else {
            None
        };

        let backing = match physical.allocate(config.stack_pages, RangeFlags::STACK) {
            Ok(base) => base,
            Err(err) => {
                Self::rollback_virtual(ranges, core::iter::once(stack).chain(tls));
                return Err(err.into());
            }
        };

        Ok(ThreadMemory {
            stack,
            stack_pages: config.stack_pages,
            tls,
            tls_pages: config.tls_pages,
            physical: vec![backing],
        })
    }

    fn rollback_virtual(ranges: &mut VirtualPool, bases: impl IntoIterator<Item = VirtualAddress>) {
        for base in bases {
            if let Err(err) = ranges.free(base) {
                logger::error(&format!("thread rollback: releasing {:?}: {}", base, err));
            }
        }
    }

    /// Per-core idle thread: kernel process, no stack lease
    pub fn create_idle_thread(&self, core: usize) -> Arc<Thread> {
        let irq = self.guard();
        let mut table = self.table.lock(&irq);

        let id = self.next_tid.fetch_add(1, Ordering::Relaxed);
        let thread = Thread::new(id, KERNEL_PID, ThreadType::Idle, ThreadPriority::Idle, CpuState::zeroed());
        thread.set_identifier(&format!("idle/{}", core));
        let thread = Arc::new(thread);

        if let Some(kernel) = table.processes.get_mut(&KERNEL_PID) {
            kernel.threads.push(thread.clone());
        }
        table.threads.insert(id, thread.clone());
        thread
    }

    /// Return a dead thread's ranges; tear the process down after its last
    /// thread. Safe to call more than once per thread.
    pub fn release_thread(&self, thread: &Arc<Thread>) -> ReapOutcome {
        let irq = self.guard();
        let mut table = self.table.lock(&irq);
        let table = &mut *table;

        if table.threads.remove(&thread.id()).is_none() {
            return ReapOutcome::AlreadyReleased;
        }

        let pid = thread.process();
        let process = match table.processes.get_mut(&pid) {
            Some(p) => p,
            None => {
                log::warn!("thread {} reaped after process {} vanished", thread.id(), pid);
                return ReapOutcome::ThreadReleased;
            }
        };
        process.threads.retain(|t| !Arc::ptr_eq(t, thread));

        if let Some(memory) = thread.take_memory() {
            let ranges = process.address_space.virtual_ranges_mut();
            for base in core::iter::once(memory.stack).chain(memory.tls) {
                if let Err(err) = ranges.free(base) {
                    log::error!("thread {}: releasing {:?}: {}", thread.id(), base, err);
                }
            }
            let mut physical = self.physical.lock(&irq);
            for base in memory.physical {
                if let Err(err) = physical.free(base) {
                    log::error!("thread {}: releasing {:?}: {}", thread.id(), base, err);
                }
            }
        }

        log::debug!("thread {} of process {} reaped", thread.id(), pid);

        if process.threads.is_empty() && pid != KERNEL_PID {
            self.destroy_process(table, pid, &irq);
            ReapOutcome::ProcessDestroyed(pid)
        } else {
            ReapOutcome::ThreadReleased
        }
    }

    fn destroy_process(&self, table: &mut ProcessTable, pid: ProcessId, irq: &InterruptGuard<'_>) {
        let process = match table.processes.remove(&pid) {
            Some(p) => p,
            None => return,
        };

        for child in &process.children {
            if let Some(c) = table.processes.get_mut(child) {
                c.parent = None;
            }
        }
        if let Some(ppid) = process.parent {
            if let Some(p) = table.processes.get_mut(&ppid) {
                p.children.retain(|&c| c != pid);
            }
        }

        let pages = {
            let mut physical = self.physical.lock(irq);
            process.address_space.release(&mut physical)
        };
        log::info!("process {} destroyed, {} physical pages returned", pid, pages);
    }

    /// Mark every thread of `pid` dead. Memory is reclaimed later, by the
    /// schedulers that own the threads. Idempotent; returns how many threads
    /// were newly killed.
    pub fn mark_process_dead(&self, pid: ProcessId) -> usize {
        let irq = self.guard();
        let mut table = self.table.lock(&irq);
        let table = &mut *table;

        let process = match table.processes.get_mut(&pid) {
            Some(p) => p,
            None => return 0,
        };
        if pid != KERNEL_PID {
            process.dying = true;
        }

        let killed = process
            .threads
            .iter()
            .filter(|t| !idle::is_idle(t))
            .filter(|t| t.kill())
            .count();

        // nothing left for a scheduler to reap
        if process.threads.is_empty() && pid != KERNEL_PID {
            self.destroy_process(table, pid, &irq);
        }

        log::debug!("process {}: {} threads marked dead", pid, killed);
        killed
    }

    /// Mark one thread dead; idle threads cannot be killed
    pub fn mark_thread_dead(&self, tid: ThreadId) -> bool {
        match self.thread(tid) {
            Some(t) if !idle::is_idle(&t) => t.kill(),
            _ => false,
        }
    }

    pub fn thread(&self, tid: ThreadId) -> Option<Arc<Thread>> {
        let irq = self.guard();
        let table = self.table.lock(&irq);
        table.threads.get(&tid).cloned()
    }

    /// Known and not killed; dead-but-unreaped threads count as not alive
    pub fn is_thread_alive(&self, tid: ThreadId) -> bool {
        self.thread(tid).map_or(false, |t| t.is_alive())
    }

    pub fn process(&self, pid: ProcessId) -> Option<ProcessInfo> {
        let irq = self.guard();
        let table = self.table.lock(&irq);
        table.processes.get(&pid).map(Process::info)
    }

    pub fn process_count(&self) -> usize {
        let irq = self.guard();
        let count = self.table.lock(&irq).processes.len();
        count
    }

    pub fn thread_count(&self) -> usize {
        let irq = self.guard();
        let count = self.table.lock(&irq).threads.len();
        count
    }

    /// Page directory of `pid`, or the kernel's when the process is gone
    pub fn directory_of(&self, pid: ProcessId) -> PhysicalAddress {
        let irq = self.guard();
        let table = self.table.lock(&irq);
        table
            .processes
            .get(&pid)
            .or_else(|| table.processes.get(&KERNEL_PID))
            .map(|p| p.address_space.directory())
            .unwrap_or_default()
    }

    /// Reserve user virtual pages in `pid` (heap, mappings)
    pub fn allocate_virtual(
        &self,
        pid: ProcessId,
        pages: usize,
        flags: RangeFlags,
    ) -> TaskingResult<VirtualAddress> {
        let irq = self.guard();
        let mut table = self.table.lock(&irq);
        let process = table
            .processes
            .get_mut(&pid)
            .ok_or(TaskingError::ProcessNotFound { pid })?;
        let base = process
            .address_space
            .virtual_ranges_mut()
            .allocate(pages, flags)?;
        Ok(base)
    }

    /// Give back a range from `allocate_virtual`; returns its page count
    pub fn free_virtual(&self, pid: ProcessId, base: VirtualAddress) -> TaskingResult<usize> {
        let irq = self.guard();
        let mut table = self.table.lock(&irq);
        let process = table
            .processes
            .get_mut(&pid)
            .ok_or(TaskingError::ProcessNotFound { pid })?;
        let pages = process.address_space.virtual_ranges_mut().free(base)?;
        Ok(pages)
    }

    /// Allocate physical pages charged to `pid`'s address space
    pub fn charge_physical(
        &self,
        pid: ProcessId,
        pages: usize,
        flags: RangeFlags,
    ) -> TaskingResult<PhysicalAddress> {
        let irq = self.guard();
        let mut table = self.table.lock(&irq);
        let process = table
            .processes
            .get_mut(&pid)
            .ok_or(TaskingError::ProcessNotFound { pid })?;
        let mut physical = self.physical.lock(&irq);
        process.address_space.charge(&mut physical, pages, flags)
    }

    pub fn physical_free_pages(&self) -> usize {
        let irq = self.guard();
        let pages = self.physical.lock(&irq).free_pages();
        pages
    }

    pub fn physical_used_pages(&self) -> usize {
        let irq = self.guard();
        let pages = self.physical.lock(&irq).used_pages();
        pages
    }

    /// Destroy a process that never got a thread (failed spawn rollback)
    pub fn discard_empty_process(&self, pid: ProcessId) -> bool {
        let irq = self.guard();
        let mut table = self.table.lock(&irq);
        let table = &mut *table;
        match table.processes.get(&pid) {
            Some(p) if p.threads.is_empty() && pid != KERNEL_PID => {
                self.destroy_process(table, pid, &irq);
                true
            }
            _ => false,
        }
    }
}
