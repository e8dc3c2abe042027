//! Per-core round-robin scheduler
//!
//! Each core owns one `Scheduler`: a FIFO run queue, a FIFO wait queue, the
//! current thread and the idle thread. All of it sits behind one spin lock
//! that is only taken with interrupts masked.
//!
//! Dead threads are never unlinked by the killer. `schedule()` finds them
//! and reaps them, so the queues never point at released memory.

use super::statistics::{SchedulerStatistics, SchedulerStats};
use crate::hal::Ports;
use crate::logger;
use crate::process::ProcessManager;
use crate::scheduler::idle;
use crate::scheduler::thread::{
    QueueSlot, Thread, ThreadId, ThreadPriority, ThreadTypeMask, WaitState,
};
use crate::sync::InterruptGuard;
use alloc::collections::VecDeque;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// Queues of one core
struct CoreQueues {
    run: VecDeque<Arc<Thread>>,
    wait: VecDeque<Arc<Thread>>,
    current: Option<Arc<Thread>>,
    idle: Option<Arc<Thread>>,
}

impl CoreQueues {
    const fn new() -> Self {
        Self {
            run: VecDeque::new(),
            wait: VecDeque::new(),
            current: None,
            idle: None,
        }
    }

    /// Remove `thread` from whichever queue links it
    fn unlink(&mut self, thread: &Arc<Thread>) {
        match thread.queue_slot() {
            QueueSlot::Run => self.run.retain(|t| !Arc::ptr_eq(t, thread)),
            QueueSlot::Wait => self.wait.retain(|t| !Arc::ptr_eq(t, thread)),
            QueueSlot::Current | QueueSlot::Detached => {}
        }
    }

    fn is_current(&self, thread: &Arc<Thread>) -> bool {
        self.current.as_ref().map_or(false, |c| Arc::ptr_eq(c, thread))
    }

    /// Every thread on this core, each once
    ///
    /// A current thread that blocked itself is reported from the wait queue.
    fn threads(&self) -> impl Iterator<Item = &Arc<Thread>> {
        let current = self
            .current
            .iter()
            .filter(|t| t.queue_slot() == QueueSlot::Current);
        let idle = self
            .idle
            .iter()
            .filter(|t| t.queue_slot() != QueueSlot::Current);
        current.chain(self.run.iter()).chain(self.wait.iter()).chain(idle)
    }
}

pub struct Scheduler {
    core_id: usize,
    queues: Mutex<CoreQueues>,
    processes: Arc<ProcessManager>,
    ports: Ports,
    tick_ms: u64,
    /// Core-local uptime
    uptime_ms: AtomicU64,
    stats: SchedulerStatistics,
}

impl Scheduler {
    pub fn new(core_id: usize, processes: Arc<ProcessManager>, ports: Ports, tick_ms: u64) -> Self {
        Self {
            core_id,
            queues: Mutex::new(CoreQueues::new()),
            processes,
            ports,
            tick_ms,
            uptime_ms: AtomicU64::new(0),
            stats: SchedulerStatistics::new(),
        }
    }

    fn guard(&self) -> InterruptGuard<'_> {
        InterruptGuard::new(&*self.ports.interrupts)
    }

    pub fn core_id(&self) -> usize {
        self.core_id
    }

    /// Install the fallback thread picked when nothing else can run
    pub fn set_idle(&self, idle: Arc<Thread>) {
        let _irq = self.guard();
        idle.set_core(self.core_id);
        idle.set_queue_slot(QueueSlot::Detached);
        self.queues.lock().idle = Some(idle);
    }

    pub fn idle(&self) -> Option<Arc<Thread>> {
        let _irq = self.guard();
        self.queues.lock().idle.clone()
    }

    pub fn current(&self) -> Option<Arc<Thread>> {
        let _irq = self.guard();
        self.queues.lock().current.clone()
    }

    // ═══════════════════════════════════════════════════════════════
    // Queue admission
    // ═══════════════════════════════════════════════════════════════

    /// Make a new thread runnable on this core (run-queue tail)
    ///
    /// Returns false if the thread is already linked somewhere.
    pub fn add(&self, thread: Arc<Thread>) -> bool {
        let _irq = self.guard();
        let mut queues = self.queues.lock();
        if thread.queue_slot() != QueueSlot::Detached || idle::is_idle(&thread) {
            log::warn!(
                "core {}: refusing to add thread {} ({:?}, {:?})",
                self.core_id,
                thread.id(),
                thread.kind(),
                thread.queue_slot()
            );
            return false;
        }

        thread.set_core(self.core_id);
        thread.set_queue_slot(QueueSlot::Run);
        log::debug!("core {}: thread {} added", self.core_id, thread.id());
        queues.run.push_back(thread);
        self.stats.record_add();
        true
    }

    /// Store the interrupted register frame into the current thread
    ///
    /// With no current thread, schedules one instead.
    pub fn save(&self, raw: &[u8]) -> Arc<Thread> {
        let state = self.ports.switch.save_state(raw);
        {
            let _irq = self.guard();
            let queues = self.queues.lock();
            if let Some(current) = queues.current.clone() {
                current.store_cpu_state(state);
                return current;
            }
        }
        self.schedule()
    }

    // ═══════════════════════════════════════════════════════════════
    // Scheduling
    // ═══════════════════════════════════════════════════════════════

    /// Pick the next thread for this core
    ///
    /// The previous thread resumes at the run-queue tail, released waiters
    /// follow it, and the walk always starts at the head: A, B, C, A, B, C.
    pub fn schedule(&self) -> Arc<Thread> {
        let _irq = self.guard();
        let mut queues = self.queues.lock();
        let now = self.get_milliseconds();

        let previous = queues.current.take();
        if let Some(prev) = &previous {
            prev.note_descheduled(now);
            // a thread that blocked itself already sits in the wait queue
            if prev.queue_slot() == QueueSlot::Current {
                if idle::is_idle(prev) {
                    prev.set_queue_slot(QueueSlot::Detached);
                } else if prev.is_alive() {
                    prev.set_queue_slot(QueueSlot::Run);
                    queues.run.push_back(prev.clone());
                } else {
                    self.reap(prev);
                }
            }
        }

        self.process_wait_queue_locked(&mut queues, now);

        let mut next = None;
        while let Some(candidate) = queues.run.pop_front() {
            candidate.set_queue_slot(QueueSlot::Detached);
            if candidate.is_alive() {
                next = Some(candidate);
                break;
            }
            self.reap(&candidate);
        }

        let idle = next.is_none();
        let next = match next.or_else(|| queues.idle.clone()) {
            Some(thread) => thread,
            None => {
                logger::warn(&format!(
                    "[SCHED] core {}: no runnable thread and no idle thread, deadlock",
                    self.core_id
                ));
                panic!(
                    "[KERNEL CRITICAL] core {}: deadlock, nothing to schedule",
                    self.core_id
                );
            }
        };

        next.set_queue_slot(QueueSlot::Current);
        next.note_scheduled(now);
        queues.current = Some(next.clone());

        let switched = previous.map_or(true, |prev| !Arc::ptr_eq(&prev, &next));
        self.stats.record_schedule(switched, idle);
        next
    }

    /// Move every waiter whose condition holds to the run-queue tail
    pub fn process_wait_queue(&self) -> usize {
        let _irq = self.guard();
        let mut queues = self.queues.lock();
        let now = self.get_milliseconds();
        self.process_wait_queue_locked(&mut queues, now)
    }

    fn process_wait_queue_locked(&self, queues: &mut CoreQueues, now: u64) -> usize {
        let mut released = 0;
        let mut i = 0;
        while i < queues.wait.len() {
            // dead waiters go to the run queue too, the walk reaps them
            let ready = {
                let thread = &queues.wait[i];
                !thread.is_alive() || self.waiting_state_holds(thread, now)
            };
            if !ready {
                i += 1;
                continue;
            }
            if let Some(thread) = queues.wait.remove(i) {
                thread.set_wait_state(WaitState::None);
                // the current thread stays current until the next pass
                let slot = if queues.is_current(&thread) {
                    QueueSlot::Current
                } else {
                    queues.run.push_back(thread.clone());
                    QueueSlot::Run
                };
                thread.set_queue_slot(slot);
                released += 1;
            }
        }
        released
    }

    /// Whether `thread`'s wait condition is satisfied now
    pub fn check_waiting_state(&self, thread: &Thread) -> bool {
        self.waiting_state_holds(thread, self.get_milliseconds())
    }

    fn waiting_state_holds(&self, thread: &Thread, now: u64) -> bool {
        let state = thread.wait_state();
        if state.timed_out(now) {
            return true;
        }
        let oracle = &self.ports.oracle;
        match state {
            WaitState::None => true,
            WaitState::Time { .. } => false,
            WaitState::AtomicLock { address, .. } => oracle.atomic_released(thread.process(), address),
            WaitState::MessageBox { .. } => oracle.message_available(thread.id()),
            WaitState::Join { target } => !self.processes.is_thread_alive(target),
            WaitState::Irq { irq, .. } => oracle.irq_fired(irq),
        }
    }

    /// Reap `thread` if it is dead; returns whether it is alive
    ///
    /// Only threads linked on this core are reaped here. A dead thread of
    /// another core is left for that core's scheduler.
    pub fn check_alive_state(&self, thread: &Arc<Thread>) -> bool {
        if thread.is_alive() || idle::is_idle(thread) {
            return true;
        }
        if thread.assigned_core() != Some(self.core_id) {
            return false;
        }
        let _irq = self.guard();
        let mut queues = self.queues.lock();
        let is_current = queues.is_current(thread);
        // detached and not current: reaped already
        if thread.queue_slot() == QueueSlot::Detached && !is_current {
            return false;
        }
        queues.unlink(thread);
        if is_current {
            queues.current = None;
        }
        self.reap(thread);
        false
    }

    /// Release a dead, unlinked thread through its process
    fn reap(&self, thread: &Arc<Thread>) {
        thread.set_queue_slot(QueueSlot::Detached);
        let outcome = self.processes.release_thread(thread);
        self.stats.record_reap();
        log::debug!(
            "core {}: reaped thread {} ({:?})",
            self.core_id,
            thread.id(),
            outcome
        );
    }

    // ═══════════════════════════════════════════════════════════════
    // Queue moves
    // ═══════════════════════════════════════════════════════════════

    /// Put `thread` at the head of the wait queue so it is checked first
    pub fn increase_wait_priority(&self, thread: &Arc<Thread>) -> bool {
        if !self.owns(thread) {
            return false;
        }
        let _irq = self.guard();
        let mut queues = self.queues.lock();
        if !self.linked(thread) {
            return false;
        }
        queues.unlink(thread);
        thread.set_queue_slot(QueueSlot::Wait);
        queues.wait.push_front(thread.clone());
        true
    }

    /// Relink a waiting thread at the run-queue tail
    ///
    /// The current thread is left alone; `schedule` requeues it.
    pub fn move_to_run_queue(&self, thread: &Arc<Thread>) -> bool {
        if !self.owns(thread) {
            return false;
        }
        let _irq = self.guard();
        let mut queues = self.queues.lock();
        match thread.queue_slot() {
            QueueSlot::Run | QueueSlot::Current => return true,
            QueueSlot::Wait => queues.unlink(thread),
            QueueSlot::Detached => return self.linked(thread),
        }
        if queues.is_current(thread) {
            thread.set_queue_slot(QueueSlot::Current);
        } else {
            thread.set_queue_slot(QueueSlot::Run);
            queues.run.push_back(thread.clone());
        }
        true
    }

    /// Relink `thread` at the wait-queue tail
    ///
    /// For the current thread this is a block: it keeps running until the
    /// next `schedule`, which will not requeue it.
    pub fn move_to_wait_queue(&self, thread: &Arc<Thread>) -> bool {
        self.block(thread, None)
    }

    /// Block `thread` on `state`
    pub fn wait(&self, thread: &Arc<Thread>, state: WaitState) -> bool {
        self.block(thread, Some(state))
    }

    fn block(&self, thread: &Arc<Thread>, state: Option<WaitState>) -> bool {
        if !self.owns(thread) {
            return false;
        }
        let _irq = self.guard();
        let mut queues = self.queues.lock();
        if !self.linked(thread) {
            return false;
        }
        if let Some(state) = state {
            thread.set_wait_state(state);
        }
        if thread.queue_slot() == QueueSlot::Wait {
            return true;
        }
        queues.unlink(thread);
        thread.set_queue_slot(QueueSlot::Wait);
        thread.note_wait();
        queues.wait.push_back(thread.clone());
        true
    }

    /// Block `thread` for `ms` milliseconds of core uptime
    pub fn sleep(&self, thread: &Arc<Thread>, ms: u64) -> bool {
        let deadline_ms = self.get_milliseconds().saturating_add(ms);
        self.wait(thread, WaitState::Time { deadline_ms })
    }

    fn owns(&self, thread: &Thread) -> bool {
        if idle::is_idle(thread) || thread.assigned_core() != Some(self.core_id) {
            log::warn!(
                "core {}: thread {} belongs to core {:?}",
                self.core_id,
                thread.id(),
                thread.assigned_core()
            );
            return false;
        }
        true
    }

    /// Queued or current here; call with the queue lock held
    ///
    /// A detached thread was reaped (or popped by a `schedule` in progress)
    /// and must not be relinked.
    fn linked(&self, thread: &Thread) -> bool {
        if thread.queue_slot() == QueueSlot::Detached {
            log::warn!("core {}: thread {} is not linked", self.core_id, thread.id());
            return false;
        }
        true
    }

    // ═══════════════════════════════════════════════════════════════
    // Termination
    // ═══════════════════════════════════════════════════════════════

    /// Mark every thread of `pid` dead; they are reaped by their schedulers
    pub fn remove_threads(&self, pid: crate::process::ProcessId) -> usize {
        self.processes.mark_process_dead(pid)
    }

    /// Mark one thread dead
    pub fn kill_thread(&self, tid: ThreadId) -> bool {
        self.processes.mark_thread_dead(tid)
    }

    pub fn set_priority(&self, tid: ThreadId, priority: ThreadPriority) -> bool {
        match self.get_task_by_id(tid) {
            Some(thread) if !idle::is_idle(&thread) => {
                thread.set_priority(priority);
                true
            }
            _ => false,
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════

    /// Priority-weighted count of runnable work on this core
    pub fn calculate_load(&self) -> u64 {
        let _irq = self.guard();
        let queues = self.queues.lock();
        Self::load_of(&queues)
    }

    fn load_of(queues: &CoreQueues) -> u64 {
        let current = queues
            .current
            .iter()
            .filter(|t| t.queue_slot() == QueueSlot::Current);
        current
            .chain(queues.run.iter())
            .filter(|t| t.state().is_active())
            .map(|t| t.priority().weight())
            .sum()
    }

    pub fn get_task_by_id(&self, tid: ThreadId) -> Option<Arc<Thread>> {
        let _irq = self.guard();
        let queues = self.queues.lock();
        let found = queues.threads().find(|t| t.id() == tid).cloned();
        found
    }

    pub fn get_task_by_identifier(&self, identifier: &str) -> Option<Arc<Thread>> {
        let _irq = self.guard();
        let queues = self.queues.lock();
        let found = queues
            .threads()
            .find(|t| t.has_identifier(identifier))
            .cloned();
        found
    }

    /// Threads on this core whose type is in `mask`
    pub fn count(&self, mask: ThreadTypeMask) -> usize {
        let _irq = self.guard();
        let queues = self.queues.lock();
        let count = queues
            .threads()
            .filter(|t| mask.contains(t.kind().mask()))
            .count();
        count
    }

    /// Fill `buffer` with ids of threads in `mask`; returns how many were
    /// written
    pub fn get_task_ids(&self, buffer: &mut [ThreadId], mask: ThreadTypeMask) -> usize {
        let _irq = self.guard();
        let queues = self.queues.lock();
        let ids = queues
            .threads()
            .filter(|t| mask.contains(t.kind().mask()))
            .map(|t| t.id());
        let mut written = 0;
        for (slot, id) in buffer.iter_mut().zip(ids) {
            *slot = id;
            written += 1;
        }
        written
    }

    /// Run-queue ids, head first
    pub fn run_queue_ids(&self) -> Vec<ThreadId> {
        let _irq = self.guard();
        let queues = self.queues.lock();
        let ids = queues.run.iter().map(|t| t.id()).collect();
        ids
    }

    /// Wait-queue ids, head first
    pub fn wait_queue_ids(&self) -> Vec<ThreadId> {
        let _irq = self.guard();
        let queues = self.queues.lock();
        let ids = queues.wait.iter().map(|t| t.id()).collect();
        ids
    }

    // ═══════════════════════════════════════════════════════════════
    // Time
    // ═══════════════════════════════════════════════════════════════

    /// Advance core uptime by one tick
    pub fn update_milliseconds(&self) -> u64 {
        self.uptime_ms.fetch_add(self.tick_ms, Ordering::Relaxed) + self.tick_ms
    }

    pub fn get_milliseconds(&self) -> u64 {
        self.uptime_ms.load(Ordering::Relaxed)
    }

    // ═══════════════════════════════════════════════════════════════
    // Diagnostics
    // ═══════════════════════════════════════════════════════════════

    pub fn stats(&self) -> SchedulerStats {
        let _irq = self.guard();
        let queues = self.queues.lock();
        SchedulerStats {
            core: self.core_id,
            run_queue_len: queues.run.len(),
            wait_queue_len: queues.wait.len(),
            total_schedules: self.stats.total_schedules.load(Ordering::Relaxed),
            total_switches: self.stats.total_switches.load(Ordering::Relaxed),
            total_added: self.stats.total_added.load(Ordering::Relaxed),
            total_reaped: self.stats.total_reaped.load(Ordering::Relaxed),
            idle_picks: self.stats.idle_picks.load(Ordering::Relaxed),
            uptime_ms: self.get_milliseconds(),
            load: Self::load_of(&queues),
        }
    }

    /// Log queue contents
    pub fn dump(&self) -> SchedulerStats {
        let stats = self.stats();
        logger::info(&format!(
            "[SCHED] core {}: run={} wait={} load={} switches={} reaped={} busy={:.1}%",
            stats.core,
            stats.run_queue_len,
            stats.wait_queue_len,
            stats.load,
            stats.total_switches,
            stats.total_reaped,
            stats.busy_rate()
        ));

        let _irq = self.guard();
        let queues = self.queues.lock();
        if let Some(current) = &queues.current {
            log::info!("  current: {:?}", current);
        }
        for thread in queues.run.iter() {
            log::info!("  run:     {:?}", thread);
        }
        for thread in queues.wait.iter() {
            log::info!("  wait:    {:?} on {}", thread, thread.wait_state());
        }
        stats
    }

    // ═══════════════════════════════════════════════════════════════
    // Context switch
    // ═══════════════════════════════════════════════════════════════

    /// Enter the current thread in its address space
    ///
    /// No lock is held across the switch.
    pub fn apply_context_switch(&self) -> ! {
        let current = self.current();
        let thread = match current {
            Some(thread) => thread,
            None => self.schedule(),
        };
        let directory = self.processes.directory_of(thread.process());
        let state = thread.cpu_state();
        drop(thread);
        self.ports.switch.restore_and_enter(&state, directory)
    }
}
