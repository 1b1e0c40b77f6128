//! End-to-end scenarios exercising the scheduler and thread engine through
//! the public `Kernel` API, the way a syscall dispatcher would drive it.

use std::collections::HashMap;

use mlfq_kernel::kernel::Kernel;
use mlfq_kernel::proc::{Pid, PASSWORD};
use mlfq_kernel::KernelError;

fn boot() -> (Kernel, Pid) {
    let mut kernel = Kernel::new();
    let init = kernel.boot_init_process("init").unwrap();
    (kernel, init)
}

#[test]
fn fork_wait_baseline() {
    let (mut kernel, init) = boot();
    let child = kernel.fork(init).unwrap();
    kernel.exit(child, Some(init)).unwrap();
    let reaped = kernel.wait(init).unwrap();
    assert_eq!(reaped, child);
    assert_eq!(kernel.wait(init), Err(KernelError::NoChildren));
}

#[test]
fn mlfq_decay_demotes_cpu_bound_children() {
    let (mut kernel, init) = boot();
    let children: Vec<Pid> = (0..5).map(|_| kernel.fork(init).unwrap()).collect();

    let mut ticks_at: HashMap<Pid, [u32; 3]> = children.iter().map(|&p| (p, [0; 3])).collect();

    for _ in 0..150 {
        if kernel.scheduler_state().current().is_none() {
            kernel.schedule();
        }
        if let Some(pid) = kernel.scheduler_state().current() {
            if let Some(counts) = ticks_at.get_mut(&pid) {
                let level = kernel.table().get(pid).unwrap().level;
                counts[level as usize] += 1;
            }
        }
        kernel.tick();
    }

    for pid in &children {
        let counts = ticks_at[pid];
        assert!(
            counts[0] <= counts[1] + counts[2],
            "pid {:?}: time at L0 ({}) exceeded L1+L2 ({}) after 150 ticks",
            pid,
            counts[0],
            counts[1] + counts[2]
        );
    }
}

#[test]
fn priority_boost_clears_lock_and_resets_to_l0() {
    let (mut kernel, init) = boot();
    kernel.scheduler_lock(init, PASSWORD).unwrap();
    kernel.schedule();
    for _ in 0..100 {
        kernel.tick();
    }
    assert_eq!(kernel.get_level(init).unwrap(), 0);
    assert!(!kernel.table().get(init).unwrap().locked);
    assert!(!kernel.scheduler_state().is_locked());
}

#[test]
fn scheduler_lock_password_gate() {
    let (mut kernel, init) = boot();
    let level_before = kernel.get_level(init).unwrap();
    assert_eq!(
        kernel.scheduler_lock(init, 2019030990),
        Err(KernelError::BadPassword)
    );
    assert_eq!(kernel.get_level(init).unwrap(), level_before);

    kernel.scheduler_lock(init, 2019030991).unwrap();
    assert_eq!(kernel.get_level(init).unwrap(), 0);
}

#[test]
fn thread_join_returns_exit_value() {
    let (mut kernel, init) = boot();
    let tid = kernel.thread_create(init, 0x4000, 0).unwrap();
    kernel.table_mut().get_mut(init).unwrap().cur_thread = tid;
    kernel.thread_exit(init, 0xdeadbeef).unwrap();
    kernel.table_mut().get_mut(init).unwrap().cur_thread = 0;
    let retval = kernel.thread_join(init, tid).unwrap();
    assert_eq!(retval, 0xdeadbeef);
}

#[test]
fn exec_collapses_worker_threads_to_single_main() {
    let (mut kernel, init) = boot();
    let t1 = kernel.thread_create(init, 0x1000, 0).unwrap();
    let t2 = kernel.thread_create(init, 0x2000, 0).unwrap();
    let t3 = kernel.thread_create(init, 0x3000, 0).unwrap();

    kernel.table_mut().get_mut(init).unwrap().cur_thread = t2;
    kernel.exec2(init, 4096, 4).unwrap();

    let proc = kernel.table().get(init).unwrap();
    assert_eq!(proc.cur_thread, 0);
    assert!(matches!(proc.ttable[0].state, mlfq_kernel::State::Runnable));
    for tid in [t1, t3, 1, 2, 3] {
        if tid != 0 {
            assert!(matches!(
                proc.ttable[tid].state,
                mlfq_kernel::State::Unused
            ));
        }
    }
}

#[test]
fn hundred_and_first_process_fails_no_slot() {
    let (mut kernel, init) = boot();
    let mut last_ok = init;
    for _ in 0..99 {
        last_ok = kernel.fork(last_ok).unwrap();
    }
    assert_eq!(kernel.fork(last_ok), Err(KernelError::NoSlot));
}

#[test]
fn tenth_thread_create_fails_thread_table_full() {
    let (mut kernel, init) = boot();
    for _ in 1..mlfq_kernel::proc::THREADS_PER_PROC {
        kernel.thread_create(init, 0x1000, 0).unwrap();
    }
    assert_eq!(
        kernel.thread_create(init, 0x1000, 0),
        Err(KernelError::ThreadTableFull)
    );
}

#[test]
fn exec2_zero_or_over_max_stacksize_fails_bad_arg() {
    let (mut kernel, init) = boot();
    assert_eq!(kernel.exec2(init, 4096, 0), Err(KernelError::BadArg));
    assert_eq!(kernel.exec2(init, 4096, 101), Err(KernelError::BadArg));
}

#[test]
fn double_scheduler_lock_fails_duplicated() {
    let (mut kernel, init) = boot();
    kernel.scheduler_lock(init, PASSWORD).unwrap();
    assert_eq!(
        kernel.scheduler_lock(init, PASSWORD),
        Err(KernelError::Duplicated)
    );
}

#[test]
fn lock_unlock_round_trip_returns_to_l2() {
    let (mut kernel, init) = boot();
    kernel.scheduler_lock(init, PASSWORD).unwrap();
    kernel.scheduler_unlock(init).unwrap();
    assert_eq!(kernel.get_level(init).unwrap(), 2);
    assert!(!kernel.scheduler_state().is_locked());
}
