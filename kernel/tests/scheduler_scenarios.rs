//! End-to-end scenarios through `KernelContext` with the mock ports

use exo_tasking::hal::mock::{MockInterrupts, MockOracle};
use exo_tasking::hal::InterruptControl;
use exo_tasking::scheduler::{CpuState, ThreadState};
use exo_tasking::{
    KernelConfig, KernelContext, Ports, TaskingError, ThreadType, ThreadTypeMask, WaitState,
    PAGE_SIZE,
};
use std::sync::Arc;

fn boot(cores: usize) -> (KernelContext, Arc<MockInterrupts>, Arc<MockOracle>) {
    let (ports, interrupts, oracle) = Ports::mock();
    let config = KernelConfig::default_config()
        .with_cores(cores)
        .with_physical_window(0x10_0000, 0x10_0000 + 256 * PAGE_SIZE)
        .with_user_window(0x40_0000, 0x40_0000 + 128 * PAGE_SIZE)
        .with_stack_pages(4, 1)
        .with_tick_ms(10);
    (KernelContext::init(config, ports).unwrap(), interrupts, oracle)
}

#[test]
fn round_robin_across_processes() {
    let (ctx, _, _) = boot(1);
    let ids: Vec<u64> = (0..3)
        .map(|_| ctx.spawn_process(None, None, CpuState::zeroed()).unwrap().1.id())
        .collect();

    let sched = ctx.scheduler(0).unwrap();
    let picked: Vec<u64> = (0..6).map(|_| sched.schedule().id()).collect();
    assert_eq!(picked, [ids.clone(), ids].concat());
}

#[test]
fn killed_process_memory_returns_after_reap() {
    let (ctx, _, _) = boot(1);
    let pm = ctx.processes().clone();
    let baseline = pm.physical_used_pages();

    let (pid, main) = ctx
        .spawn_process(None, Some("victim"), CpuState::zeroed())
        .unwrap();
    ctx.spawn_thread(pid, ThreadType::Sub, None, CpuState::zeroed(), None)
        .unwrap();
    // directory + two 4-page stacks
    assert_eq!(pm.physical_used_pages(), baseline + 9);

    let sched = ctx.scheduler(0).unwrap();
    assert_eq!(sched.schedule().id(), main.id());
    assert_eq!(ctx.kill_process(pid), Ok(2));
    assert_eq!(main.state(), ThreadState::Dead);
    assert_eq!(pm.physical_used_pages(), baseline + 9);

    assert_eq!(sched.schedule().kind(), ThreadType::Idle);
    assert!(pm.process(pid).is_none());
    assert_eq!(pm.physical_used_pages(), baseline);
    assert_eq!(sched.count(ThreadTypeMask::USER), 0);
    assert_eq!(sched.stats().total_reaped, 2);
}

#[test]
fn blocked_thread_released_by_message() {
    let (ctx, _, oracle) = boot(1);
    let (pid, server) = ctx.spawn_process(None, Some("server"), CpuState::zeroed()).unwrap();
    let client = ctx
        .spawn_thread(pid, ThreadType::Sub, Some("client"), CpuState::zeroed(), None)
        .unwrap();
    let sched = ctx.scheduler(0).unwrap();

    assert_eq!(sched.schedule().id(), server.id());
    sched.wait(&server, WaitState::MessageBox { deadline_ms: None });
    assert_eq!(sched.schedule().id(), client.id());
    assert_eq!(sched.schedule().id(), client.id());

    oracle.post_message(server.id());
    assert_eq!(sched.schedule().id(), client.id());
    assert_eq!(sched.schedule().id(), server.id());
    assert_eq!(server.wait_count(), 1);
}

#[test]
fn timer_ticks_accumulate_execution_time() {
    let (ctx, _, _) = boot(1);
    let (_, a) = ctx.spawn_process(None, None, CpuState::zeroed()).unwrap();
    let (_, b) = ctx.spawn_process(None, None, CpuState::zeroed()).unwrap();

    for _ in 0..4 {
        ctx.timer_tick(0, &[0xab; 16]).unwrap();
    }
    // a: ticks 1-2, b: ticks 2-3, a: ticks 3-4
    assert_eq!(a.execution_ms(), 20);
    assert_eq!(b.execution_ms(), 10);
    assert_eq!(a.cpu_state().as_bytes()[0], 0xab);
    assert_eq!(ctx.scheduler(0).unwrap().current().map(|t| t.id()), Some(b.id()));
}

#[test]
fn every_scheduler_pass_masks_interrupts() {
    let (ctx, interrupts, _) = boot(1);
    ctx.spawn_process(None, None, CpuState::zeroed()).unwrap();
    let before = interrupts.disable_count();
    ctx.scheduler(0).unwrap().schedule();
    assert!(interrupts.disable_count() > before);
    assert!(interrupts.are_enabled());
}

#[test]
fn fork_child_inherits_ranges() {
    let (ctx, _, _) = boot(2);
    let (parent, _) = ctx.spawn_process(None, None, CpuState::zeroed()).unwrap();
    let (child, thread) = ctx.fork(parent, CpuState::from_bytes(&[1, 2, 3])).unwrap();

    let pm = ctx.processes();
    // parent: one thread; child: copied ranges plus its own thread
    assert_eq!(pm.process(parent).unwrap().virtual_used_pages, 5);
    assert_eq!(pm.process(child).unwrap().virtual_used_pages, 10);
    assert_eq!(pm.process(parent).unwrap().children, vec![child]);
    assert_eq!(&thread.cpu_state().as_bytes()[..3], &[1, 2, 3]);
    assert_eq!(thread.assigned_core(), Some(1));
}

#[test]
fn errors_surface_as_tasking_errors() {
    let (ctx, _, _) = boot(1);
    assert_eq!(
        ctx.kill_thread(12345),
        Err(TaskingError::ThreadNotFound { thread_id: 12345 })
    );
    assert_eq!(
        ctx.fork(777, CpuState::zeroed()).map(|(pid, _)| pid),
        Err(TaskingError::ProcessNotFound { pid: 777 })
    );
    let idle = ctx.scheduler(0).unwrap().idle().unwrap();
    assert_eq!(ctx.kill_thread(idle.id()), Ok(false));
}
