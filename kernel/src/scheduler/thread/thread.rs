//! Thread Structure and Management
//!
//! Represents a schedulable execution context. A thread is shared (`Arc`)
//! between its process, which owns it, and the one scheduler whose queues
//! link it. Everything another core may touch is atomic or behind a spin
//! lock; queue membership is written only by the owning core.

use super::stack::ThreadMemory;
use super::state::{AtomicQueueSlot, QueueSlot, ThreadState, WaitState};
use crate::process::ProcessId;
use alloc::string::String;
use bitflags::bitflags;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use spin::Mutex;

/// Thread ID type
pub type ThreadId = u64;

/// Bytes of saved register state per thread
pub const CPU_STATE_SIZE: usize = 256;

/// Kind of thread, used for filtering in enumeration queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadType {
    /// First thread of a user process
    Main,
    /// Additional user thread
    Sub,
    /// Virtual 8086 task
    Vm86,
    /// Per-core fallback thread
    Idle,
    /// Kernel worker
    Kernel,
}

bitflags! {
    /// Filter over `ThreadType`s
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ThreadTypeMask: u8 {
        const MAIN   = 1 << 0;
        const SUB    = 1 << 1;
        const VM86   = 1 << 2;
        const IDLE   = 1 << 3;
        const KERNEL = 1 << 4;
        const USER   = Self::MAIN.bits() | Self::SUB.bits() | Self::VM86.bits();
    }
}

impl ThreadType {
    pub fn mask(self) -> ThreadTypeMask {
        match self {
            Self::Main => ThreadTypeMask::MAIN,
            Self::Sub => ThreadTypeMask::SUB,
            Self::Vm86 => ThreadTypeMask::VM86,
            Self::Idle => ThreadTypeMask::IDLE,
            Self::Kernel => ThreadTypeMask::KERNEL,
        }
    }
}

/// Thread priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ThreadPriority {
    Idle = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Realtime = 4,
}

impl ThreadPriority {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Low,
            3 => Self::High,
            4 => Self::Realtime,
            _ => Self::Normal,
        }
    }

    /// Load weight; doubles per level above Low, idle weighs nothing
    pub fn weight(self) -> u64 {
        match self {
            Self::Idle => 0,
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 4,
            Self::Realtime => 8,
        }
    }
}

/// Saved register state, opaque to the scheduler
#[repr(C, align(16))]
#[derive(Clone, PartialEq, Eq)]
pub struct CpuState {
    bytes: [u8; CPU_STATE_SIZE],
}

static_assertions::const_assert_eq!(core::mem::size_of::<CpuState>(), CPU_STATE_SIZE);
static_assertions::const_assert_eq!(core::mem::align_of::<CpuState>(), 16);

impl CpuState {
    pub const fn zeroed() -> Self {
        Self {
            bytes: [0; CPU_STATE_SIZE],
        }
    }

    /// Copy a raw frame; shorter input is zero-padded, longer is truncated
    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut state = Self::zeroed();
        let len = raw.len().min(CPU_STATE_SIZE);
        state.bytes[..len].copy_from_slice(&raw[..len]);
        state
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for CpuState {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl core::fmt::Debug for CpuState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "CpuState({} bytes)", CPU_STATE_SIZE)
    }
}

const NO_CORE: usize = usize::MAX;

/// Thread Control Block (TCB)
pub struct Thread {
    /// Unique thread ID
    id: ThreadId,

    /// Owning process
    process: ProcessId,

    kind: ThreadType,

    /// Optional registered name, for lookup by identifier
    identifier: Mutex<Option<String>>,

    /// Cleared on kill; the scheduler reaps the thread when it sees this
    alive: AtomicBool,

    priority: AtomicU8,

    /// Times selected by `schedule`
    rounds: AtomicU64,

    /// Times moved into a wait queue
    wait_count: AtomicU64,

    wait_state: Mutex<WaitState>,

    /// Saved register blob (ContextSwitchPort format)
    cpu_state: Mutex<CpuState>,

    /// Stack/TLS lease, taken once at reaping
    memory: Mutex<Option<ThreadMemory>>,

    /// Runtime statistics
    execution_ms: AtomicU64,
    scheduled_at_ms: AtomicU64,

    /// Core whose scheduler links this thread
    core: AtomicUsize,

    slot: AtomicQueueSlot,
}

impl Thread {
    pub fn new(
        id: ThreadId,
        process: ProcessId,
        kind: ThreadType,
        priority: ThreadPriority,
        initial_state: CpuState,
    ) -> Self {
        Self {
            id,
            process,
            kind,
            identifier: Mutex::new(None),
            alive: AtomicBool::new(true),
            priority: AtomicU8::new(priority as u8),
            rounds: AtomicU64::new(0),
            wait_count: AtomicU64::new(0),
            wait_state: Mutex::new(WaitState::None),
            cpu_state: Mutex::new(initial_state),
            memory: Mutex::new(None),
            execution_ms: AtomicU64::new(0),
            scheduled_at_ms: AtomicU64::new(0),
            core: AtomicUsize::new(NO_CORE),
            slot: AtomicQueueSlot::new(QueueSlot::Detached),
        }
    }

    /// Attach the stack/TLS lease
    pub fn with_memory(self, memory: ThreadMemory) -> Self {
        *self.memory.lock() = Some(memory);
        self
    }

    pub fn with_identifier(self, identifier: &str) -> Self {
        self.set_identifier(identifier);
        self
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn process(&self) -> ProcessId {
        self.process
    }

    pub fn kind(&self) -> ThreadType {
        self.kind
    }

    pub fn identifier(&self) -> Option<String> {
        self.identifier.lock().clone()
    }

    pub fn set_identifier(&self, identifier: &str) {
        *self.identifier.lock() = Some(String::from(identifier));
    }

    pub fn has_identifier(&self, identifier: &str) -> bool {
        self.identifier.lock().as_deref() == Some(identifier)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the thread dead; returns whether it was alive. Idempotent.
    pub fn kill(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub fn priority(&self) -> ThreadPriority {
        ThreadPriority::from_u8(self.priority.load(Ordering::Relaxed))
    }

    pub fn set_priority(&self, priority: ThreadPriority) {
        self.priority.store(priority as u8, Ordering::Relaxed);
    }

    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    pub fn wait_count(&self) -> u64 {
        self.wait_count.load(Ordering::Relaxed)
    }

    pub fn wait_state(&self) -> WaitState {
        *self.wait_state.lock()
    }

    pub fn set_wait_state(&self, state: WaitState) {
        *self.wait_state.lock() = state;
    }

    /// Copy of the saved register blob
    pub fn cpu_state(&self) -> CpuState {
        self.cpu_state.lock().clone()
    }

    pub fn store_cpu_state(&self, state: CpuState) {
        *self.cpu_state.lock() = state;
    }

    /// Milliseconds spent as a core's current thread, up to the last switch
    pub fn execution_ms(&self) -> u64 {
        self.execution_ms.load(Ordering::Relaxed)
    }

    pub fn assigned_core(&self) -> Option<usize> {
        match self.core.load(Ordering::Acquire) {
            NO_CORE => None,
            core => Some(core),
        }
    }

    /// Stack top of a user thread
    pub fn stack_top(&self) -> Option<crate::memory::VirtualAddress> {
        self.memory.lock().as_ref().map(ThreadMemory::stack_top)
    }

    /// Copy of the stack/TLS lease, if not yet released
    pub fn memory(&self) -> Option<ThreadMemory> {
        self.memory.lock().clone()
    }

    pub fn queue_slot(&self) -> QueueSlot {
        self.slot.load()
    }

    /// Scheduler view of the thread
    pub fn state(&self) -> ThreadState {
        if !self.is_alive() {
            return ThreadState::Dead;
        }
        match self.queue_slot() {
            QueueSlot::Detached => ThreadState::Created,
            QueueSlot::Run => ThreadState::Runnable,
            QueueSlot::Wait => ThreadState::Waiting,
            QueueSlot::Current => ThreadState::Running,
        }
    }

    pub(crate) fn set_queue_slot(&self, slot: QueueSlot) {
        self.slot.store(slot);
    }

    pub(crate) fn set_core(&self, core: usize) {
        self.core.store(core, Ordering::Release);
    }

    pub(crate) fn note_scheduled(&self, now_ms: u64) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
        self.scheduled_at_ms.store(now_ms, Ordering::Relaxed);
    }

    /// Credit run time since the last `note_scheduled`
    pub(crate) fn note_descheduled(&self, now_ms: u64) {
        let since = self.scheduled_at_ms.load(Ordering::Relaxed);
        self.execution_ms
            .fetch_add(now_ms.saturating_sub(since), Ordering::Relaxed);
    }

    pub(crate) fn note_wait(&self) {
        self.wait_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Take the lease for release; `None` once taken
    pub(crate) fn take_memory(&self) -> Option<ThreadMemory> {
        self.memory.lock().take()
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("process", &self.process)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("rounds", &self.rounds())
            .finish()
    }
}
