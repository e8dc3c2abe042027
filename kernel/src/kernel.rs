//! Kernel context
//!
//! Everything the tasking core shares between cores, built once at boot and
//! passed explicitly: the process manager (process table and physical pool)
//! and one scheduler per core, each with its idle thread.

use crate::config::KernelConfig;
use crate::logger;
use crate::process::{ProcessId, ProcessManager, KERNEL_PID};
use crate::scheduler::core::error::{TaskingError, TaskingResult};
use crate::scheduler::core::loadbalancer;
use crate::scheduler::{idle, CpuState, Scheduler, SchedulerStats, Thread, ThreadId, ThreadType};
use alloc::sync::Arc;
use alloc::vec::Vec;

pub use crate::hal::Ports;

pub struct KernelContext {
    config: KernelConfig,
    processes: Arc<ProcessManager>,
    schedulers: Vec<Scheduler>,
}

impl KernelContext {
    /// Build the physical pool, the kernel process and the per-core
    /// schedulers with their idle threads
    pub fn init(config: KernelConfig, ports: Ports) -> TaskingResult<Self> {
        config.validate().map_err(|err| crate::sched_error!(err))?;
        logger::set_level(config.log_level);

        let processes = Arc::new(ProcessManager::new(config.clone(), ports.interrupts.clone())?);

        let schedulers: Vec<Scheduler> = (0..config.core_count)
            .map(|core| Scheduler::new(core, processes.clone(), ports.clone(), config.tick_ms))
            .collect();
        for scheduler in &schedulers {
            idle::install(&processes, scheduler);
        }

        log::info!(
            "tasking core up: {} cores, {} physical pages, tick {}ms",
            config.core_count,
            config.physical_pages(),
            config.tick_ms
        );

        Ok(Self {
            config,
            processes,
            schedulers,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn processes(&self) -> &Arc<ProcessManager> {
        &self.processes
    }

    pub fn cores(&self) -> usize {
        self.schedulers.len()
    }

    pub fn scheduler(&self, core: usize) -> TaskingResult<&Scheduler> {
        self.schedulers
            .get(core)
            .ok_or(TaskingError::CoreNotFound { core })
    }

    /// Core with the lowest priority-weighted load
    pub fn least_loaded_core(&self) -> usize {
        let loads: Vec<u64> = self.schedulers.iter().map(Scheduler::calculate_load).collect();
        loadbalancer::pick_core(&loads)
    }

    /// Create a process with its main thread and make it runnable
    ///
    /// If the thread cannot be created, the empty process is discarded.
    pub fn spawn_process(
        &self,
        parent: Option<ProcessId>,
        identifier: Option<&str>,
        entry_state: CpuState,
    ) -> TaskingResult<(ProcessId, Arc<Thread>)> {
        let parent = parent.or(Some(KERNEL_PID));
        let pid = self.processes.create_process(parent, identifier)?;
        match self.spawn_thread(pid, ThreadType::Main, identifier, entry_state, None) {
            Ok(thread) => Ok((pid, thread)),
            Err(err) => {
                self.processes.discard_empty_process(pid);
                Err(err)
            }
        }
    }

    /// Create a process whose address ranges copy `parent`'s, with one
    /// thread resuming at `entry_state`
    pub fn fork(
        &self,
        parent: ProcessId,
        entry_state: CpuState,
    ) -> TaskingResult<(ProcessId, Arc<Thread>)> {
        let pid = self.processes.fork_process(parent)?;
        match self.spawn_thread(pid, ThreadType::Main, None, entry_state, None) {
            Ok(thread) => Ok((pid, thread)),
            Err(err) => {
                self.processes.discard_empty_process(pid);
                Err(err)
            }
        }
    }

    /// Create a thread in `pid` and add it to `core`, or to the least
    /// loaded core when none is requested
    ///
    /// A thread no scheduler accepts is released again before returning.
    pub fn spawn_thread(
        &self,
        pid: ProcessId,
        kind: ThreadType,
        identifier: Option<&str>,
        initial_state: CpuState,
        core: Option<usize>,
    ) -> TaskingResult<Arc<Thread>> {
        let core = match core {
            Some(core) => {
                self.scheduler(core)?;
                core
            }
            None => self.least_loaded_core(),
        };
        let thread = self
            .processes
            .create_thread(pid, kind, identifier, initial_state)?;
        if let Err(err) = self.place(thread.clone(), core) {
            thread.kill();
            self.processes.release_thread(&thread);
            return Err(err);
        }
        Ok(thread)
    }

    /// Add an existing, unqueued thread to `core`
    pub fn place(&self, thread: Arc<Thread>, core: usize) -> TaskingResult<()> {
        let id = thread.id();
        if self.scheduler(core)?.add(thread) {
            Ok(())
        } else {
            Err(TaskingError::ThreadNotFound { thread_id: id })
        }
    }

    /// Mark every thread of `pid` dead; each core reaps its own threads at
    /// its next `schedule`
    pub fn kill_process(&self, pid: ProcessId) -> TaskingResult<usize> {
        if self.processes.process(pid).is_none() {
            return Err(TaskingError::ProcessNotFound { pid });
        }
        Ok(self.processes.mark_process_dead(pid))
    }

    pub fn kill_thread(&self, tid: ThreadId) -> TaskingResult<bool> {
        if self.processes.thread(tid).is_none() {
            return Err(TaskingError::ThreadNotFound { thread_id: tid });
        }
        Ok(self.processes.mark_thread_dead(tid))
    }

    /// Timer interrupt on `core`: advance time, save the interrupted frame
    /// and pick the next thread. The caller then applies the switch.
    pub fn timer_tick(&self, core: usize, raw: &[u8]) -> TaskingResult<Arc<Thread>> {
        let scheduler = self.scheduler(core)?;
        scheduler.update_milliseconds();
        if scheduler.current().is_some() {
            scheduler.save(raw);
        }
        Ok(scheduler.schedule())
    }

    pub fn stats(&self) -> Vec<SchedulerStats> {
        self.schedulers.iter().map(Scheduler::stats).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PAGE_SIZE;

    fn context(cores: usize) -> KernelContext {
        let (ports, _, _) = Ports::mock();
        let config = KernelConfig::default_config()
            .with_cores(cores)
            .with_physical_window(0, 128 * PAGE_SIZE)
            .with_user_window(0x40_0000, 0x40_0000 + 64 * PAGE_SIZE)
            .with_stack_pages(2, 0);
        KernelContext::init(config, ports).unwrap()
    }

    #[test]
    fn test_each_core_has_idle() {
        let ctx = context(2);
        assert_eq!(ctx.cores(), 2);
        for core in 0..2 {
            let sched = ctx.scheduler(core).unwrap();
            assert_eq!(sched.schedule().kind(), ThreadType::Idle);
        }
        assert!(matches!(ctx.scheduler(2), Err(TaskingError::CoreNotFound { core: 2 })));
    }

    #[test]
    fn test_spawn_spreads_over_cores() {
        let ctx = context(2);
        let (pid, main) = ctx.spawn_process(None, Some("init"), CpuState::zeroed()).unwrap();
        let sub = ctx
            .spawn_thread(pid, ThreadType::Sub, None, CpuState::zeroed(), None)
            .unwrap();
        assert_eq!(main.assigned_core(), Some(0));
        assert_eq!(sub.assigned_core(), Some(1));
        assert_eq!(ctx.processes().process(pid).unwrap().parent, Some(KERNEL_PID));
    }

    #[test]
    fn test_timer_tick_saves_and_switches() {
        let ctx = context(1);
        let (_, a) = ctx.spawn_process(None, None, CpuState::zeroed()).unwrap();
        let (_, b) = ctx.spawn_process(None, None, CpuState::zeroed()).unwrap();

        assert_eq!(ctx.timer_tick(0, &[1]).unwrap().id(), a.id());
        assert_eq!(ctx.timer_tick(0, &[2]).unwrap().id(), b.id());
        assert_eq!(a.cpu_state().as_bytes()[0], 2);
        assert_eq!(ctx.scheduler(0).unwrap().get_milliseconds(), 20);
    }

    #[test]
    fn test_kill_process_reaped_on_owning_core() {
        let ctx = context(2);
        let (pid, main) = ctx.spawn_process(None, None, CpuState::zeroed()).unwrap();
        let sub = ctx
            .spawn_thread(pid, ThreadType::Sub, None, CpuState::zeroed(), Some(1))
            .unwrap();

        assert_eq!(ctx.kill_process(pid), Ok(2));
        assert_eq!(ctx.kill_process(pid), Ok(0));
        ctx.scheduler(0).unwrap().schedule();
        assert!(main.memory().is_none());
        assert!(sub.memory().is_some());
        ctx.scheduler(1).unwrap().schedule();
        assert!(ctx.processes().process(pid).is_none());
        assert_eq!(ctx.kill_process(pid), Err(TaskingError::ProcessNotFound { pid }));
    }

    #[test]
    fn test_spawn_idle_kind_takes_nothing() {
        let ctx = context(1);
        let (pid, _) = ctx.spawn_process(None, None, CpuState::zeroed()).unwrap();
        let physical = ctx.processes().physical_used_pages();

        let err = ctx.spawn_thread(pid, ThreadType::Idle, None, CpuState::zeroed(), Some(0));
        assert_eq!(err.unwrap_err(), TaskingError::InvalidThreadKind { kind: ThreadType::Idle });
        assert_eq!(ctx.processes().physical_used_pages(), physical);
        assert_eq!(ctx.processes().process(pid).unwrap().thread_count, 1);

        // the process still tears down normally
        assert_eq!(ctx.kill_process(pid), Ok(1));
        ctx.scheduler(0).unwrap().schedule();
        assert!(ctx.processes().process(pid).is_none());
        assert_eq!(ctx.processes().physical_used_pages(), 1);
    }

    #[test]
    fn test_init_applies_log_level() {
        let (ports, _, _) = Ports::mock();
        let config = KernelConfig::default_config().with_log_level(log::LevelFilter::Warn);
        assert!(KernelContext::init(config, ports).is_ok());
        assert!(log::max_level() >= log::LevelFilter::Warn);
    }

    #[test]
    fn test_failed_spawn_discards_process() {
        let ctx = context(1);
        let before = ctx.processes().process_count();
        let err = ctx.spawn_thread(999, ThreadType::Sub, None, CpuState::zeroed(), None);
        assert_eq!(err.unwrap_err(), TaskingError::ProcessNotFound { pid: 999 });
        assert_eq!(ctx.processes().process_count(), before);
    }
}
