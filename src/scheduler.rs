//! The multi-level feedback queue (component C3).
//!
//! Three ready queues (`L0`, `L1`, `L2`) hold pids in arrival order. `L0`
//! and `L1` are plain FIFOs; `L2` is scanned for the highest `priority`,
//! ties broken by earliest arrival. A process transitions out of its queue
//! the moment it is picked to run and is never re-queued until it becomes
//! `Runnable` again (by voluntary yield, quantum exhaustion, wakeup, or the
//! periodic boost).

use std::collections::VecDeque;

use crate::contracts::AddressSpace;
use crate::error::{diag, KernelError, KernelResult};
use crate::proc::{Pid, State, PASSWORD};
use crate::table::ProcTable;

/// Quanta in ticks for L0/L1/L2, index-matched to `level`.
pub const QUANTUM: [u32; 3] = [4, 6, 8];
/// Ticks between priority boosts.
pub const BOOST_INTERVAL: u64 = 100;
/// Starting priority a process is given on L2 entry.
pub const L2_START_PRIORITY: u8 = 3;
/// Ceiling for `set_priority`'s argument; independent of `L2_START_PRIORITY`.
pub const MAX_PRIORITY: u8 = 10;

#[derive(Debug, Default)]
pub struct Scheduler {
    l0: VecDeque<Pid>,
    l1: VecDeque<Pid>,
    l2: VecDeque<Pid>,
    /// pid currently occupying the CPU, off every queue.
    current: Option<Pid>,
    /// pid holding the scheduler lock, bypassing normal level selection.
    locked_pid: Option<Pid>,
    ticks: u64,
    ticks_since_boost: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    pub fn is_locked(&self) -> bool {
        self.locked_pid.is_some()
    }

    pub fn lock_holder(&self) -> Option<Pid> {
        self.locked_pid
    }

    fn queue_mut(&mut self, level: u8) -> &mut VecDeque<Pid> {
        match level {
            0 => &mut self.l0,
            1 => &mut self.l1,
            _ => &mut self.l2,
        }
    }

    /// Insert `pid` at the tail of the queue matching its current level.
    /// Callers must only invoke this once the process is `Runnable` and is
    /// not the scheduler-lock holder (the lock holder is tracked out of
    /// band via `locked_pid`).
    pub fn enqueue<A: AddressSpace>(&mut self, table: &ProcTable<A>, pid: Pid) {
        let level = table.get(pid).map(|p| p.level).unwrap_or(0);
        self.queue_mut(level).push_back(pid);
    }

    fn remove_from_queues(&mut self, pid: Pid) {
        self.l0.retain(|&p| p != pid);
        self.l1.retain(|&p| p != pid);
        self.l2.retain(|&p| p != pid);
    }

    fn pop_fifo<A: AddressSpace>(queue: &mut VecDeque<Pid>, table: &ProcTable<A>) -> Option<Pid> {
        while let Some(pid) = queue.pop_front() {
            if matches!(table.get(pid).map(|p| p.state), Some(State::Runnable)) {
                return Some(pid);
            }
            // stale entry (process died or slept without being dequeued); drop it.
        }
        None
    }

    fn pop_l2<A: AddressSpace>(&mut self, table: &ProcTable<A>) -> Option<Pid> {
        loop {
            let best = self
                .l2
                .iter()
                .enumerate()
                .filter(|(_, &pid)| matches!(table.get(pid).map(|p| p.state), Some(State::Runnable)))
                .max_by_key(|(idx, &pid)| {
                    let priority = table.get(pid).map(|p| p.priority).unwrap_or(0);
                    // VecDeque front = earliest arrival; negate index so the
                    // earliest arrival wins ties on priority.
                    (priority, std::cmp::Reverse(*idx))
                })
                .map(|(idx, &pid)| (idx, pid));
            match best {
                Some((idx, pid)) => {
                    self.l2.remove(idx);
                    return Some(pid);
                }
                None => {
                    if self.l2.is_empty() {
                        return None;
                    }
                    // every remaining entry is stale; purge and retry.
                    self.l2.retain(|&pid| {
                        matches!(table.get(pid).map(|p| p.state), Some(State::Runnable))
                    });
                    if self.l2.is_empty() {
                        return None;
                    }
                }
            }
        }
    }

    /// Select the next process to run without mutating process state.
    /// The caller is responsible for transitioning the winner to `Running`.
    pub fn pick_next<A: AddressSpace>(&mut self, table: &ProcTable<A>) -> Option<Pid> {
        if let Some(pid) = self.locked_pid {
            if matches!(table.get(pid).map(|p| p.state), Some(State::Runnable)) {
                return Some(pid);
            }
        }
        if let Some(pid) = Self::pop_fifo(&mut self.l0, table) {
            return Some(pid);
        }
        if let Some(pid) = Self::pop_fifo(&mut self.l1, table) {
            return Some(pid);
        }
        self.pop_l2(table)
    }

    /// Mark `pid` as the process now occupying the CPU. It must already be
    /// off every ready queue (either just returned by `pick_next`, or it is
    /// the lock holder, which is never enqueued).
    pub fn begin_running(&mut self, pid: Pid) {
        self.remove_from_queues(pid);
        self.current = Some(pid);
    }

    /// One clock interrupt. Charges the running process's quantum, performs
    /// demotion on exhaustion, and fires a priority boost every
    /// `BOOST_INTERVAL` ticks. Returns `true` if the running process must be
    /// preempted (quantum exhausted or boost fired).
    pub fn tick<A: AddressSpace>(&mut self, table: &mut ProcTable<A>) -> bool {
        self.ticks += 1;
        self.ticks_since_boost += 1;
        if self.ticks_since_boost >= BOOST_INTERVAL {
            self.boost(table);
            return true;
        }
        let Some(pid) = self.current else { return false };
        let Some(idx) = table.index_of(pid) else { return false };
        let proc = &mut table.slots[idx];
        proc.quantum_used += 1;
        proc.total_in_level += 1;
        let quantum = QUANTUM[proc.level as usize];
        if proc.quantum_used < quantum {
            return false;
        }
        proc.quantum_used = 0;
        if proc.locked {
            // the lock holder never demotes; it simply restarts its quantum.
            return false;
        }
        if (proc.level as usize) < QUANTUM.len() - 1 {
            proc.level += 1;
        } else if proc.priority > 0 {
            proc.priority -= 1;
        }
        true
    }

    /// Reset every non-`Unused` process to L0, clear the scheduler lock, and
    /// rebuild the ready queues. Fires every `BOOST_INTERVAL` ticks.
    fn boost<A: AddressSpace>(&mut self, table: &mut ProcTable<A>) {
        self.l0.clear();
        self.l1.clear();
        self.l2.clear();
        self.locked_pid = None;
        self.ticks_since_boost = 0;
        for proc in table.slots.iter_mut() {
            if proc.is_unused() {
                continue;
            }
            proc.level = 0;
            proc.quantum_used = 0;
            proc.total_in_level = 0;
            proc.locked = false;
            proc.password_verified = false;
        }
        let runnable: Vec<Pid> = table
            .slots
            .iter()
            .filter(|p| matches!(p.state, State::Runnable))
            .filter_map(|p| p.pid)
            .collect();
        for pid in runnable {
            self.l0.push_back(pid);
        }
    }

    /// Voluntary yield: re-queue at the tail of the *current* level, with
    /// no quantum or priority change.
    pub fn yield_now<A: AddressSpace>(&mut self, table: &ProcTable<A>, pid: Pid) {
        if self.current == Some(pid) {
            self.current = None;
        }
        if self.locked_pid == Some(pid) {
            return;
        }
        self.enqueue(table, pid);
    }

    pub fn on_blocked(&mut self, pid: Pid) {
        if self.current == Some(pid) {
            self.current = None;
        }
    }

    pub fn on_exited(&mut self, pid: Pid) {
        self.remove_from_queues(pid);
        if self.current == Some(pid) {
            self.current = None;
        }
        if self.locked_pid == Some(pid) {
            self.locked_pid = None;
        }
    }

    /// `schedulerLock`: only succeeds with the compile-time password, while
    /// no other process already holds the lock.
    pub fn lock<A: AddressSpace>(
        &mut self,
        table: &mut ProcTable<A>,
        pid: Pid,
        password: u64,
    ) -> KernelResult<()> {
        if password != PASSWORD {
            return Err(diag!(KernelError::BadPassword));
        }
        if self.locked_pid.is_some() {
            return Err(diag!(KernelError::Duplicated));
        }
        let proc = table.get_mut(pid).ok_or_else(|| diag!(KernelError::NoSuchPid))?;
        proc.level = 0;
        proc.priority = L2_START_PRIORITY;
        proc.quantum_used = 0;
        proc.total_in_level = 0;
        proc.locked = true;
        proc.password_verified = true;
        self.remove_from_queues(pid);
        self.locked_pid = Some(pid);
        self.ticks_since_boost = 0;
        Ok(())
    }

    /// `schedulerUnlock`: only the holder may release; the process rejoins
    /// L2 with the boosted priority the lock granted.
    pub fn unlock<A: AddressSpace>(
        &mut self,
        table: &mut ProcTable<A>,
        pid: Pid,
    ) -> KernelResult<()> {
        if self.locked_pid != Some(pid) {
            return Err(diag!(KernelError::NotLocked));
        }
        self.locked_pid = None;
        let proc = table.get_mut(pid).ok_or_else(|| diag!(KernelError::NoSuchPid))?;
        proc.locked = false;
        proc.level = 2;
        proc.priority = L2_START_PRIORITY;
        proc.quantum_used = 0;
        if matches!(proc.state, State::Runnable) {
            self.enqueue(table, pid);
        }
        Ok(())
    }

    /// `setPriority`: only meaningful for an L2 process; out-of-range
    /// values are rejected rather than clamped.
    pub fn set_priority<A: AddressSpace>(
        &mut self,
        table: &mut ProcTable<A>,
        pid: Pid,
        priority: u8,
    ) -> KernelResult<()> {
        if priority > MAX_PRIORITY {
            return Err(diag!(KernelError::BadArg));
        }
        let proc = table.get_mut(pid).ok_or_else(|| diag!(KernelError::NoSuchPid))?;
        proc.priority = priority;
        Ok(())
    }

    pub fn get_level<A: AddressSpace>(&self, table: &ProcTable<A>, pid: Pid) -> KernelResult<u8> {
        table
            .get(pid)
            .map(|p| p.level)
            .ok_or_else(|| diag!(KernelError::NoSuchPid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::SimAddressSpace;

    fn fresh_runnable(table: &mut ProcTable<SimAddressSpace>) -> Pid {
        let (idx, pid) = table.alloc_slot().unwrap();
        table.slots[idx].state = State::Runnable;
        pid
    }

    #[test]
    fn l0_is_fifo() {
        let mut table = ProcTable::<SimAddressSpace>::new();
        let mut sched = Scheduler::new();
        let a = fresh_runnable(&mut table);
        let b = fresh_runnable(&mut table);
        sched.enqueue(&table, a);
        sched.enqueue(&table, b);
        assert_eq!(sched.pick_next(&table), Some(a));
    }

    #[test]
    fn l2_breaks_ties_by_arrival() {
        let mut table = ProcTable::<SimAddressSpace>::new();
        let mut sched = Scheduler::new();
        let a = fresh_runnable(&mut table);
        let b = fresh_runnable(&mut table);
        table.get_mut(a).unwrap().level = 2;
        table.get_mut(b).unwrap().level = 2;
        table.get_mut(a).unwrap().priority = 1;
        table.get_mut(b).unwrap().priority = 1;
        sched.enqueue(&table, a);
        sched.enqueue(&table, b);
        assert_eq!(sched.pick_next(&table), Some(a));
    }

    #[test]
    fn l2_picks_highest_priority_regardless_of_arrival() {
        let mut table = ProcTable::<SimAddressSpace>::new();
        let mut sched = Scheduler::new();
        let a = fresh_runnable(&mut table);
        let b = fresh_runnable(&mut table);
        table.get_mut(a).unwrap().level = 2;
        table.get_mut(b).unwrap().level = 2;
        table.get_mut(a).unwrap().priority = 0;
        table.get_mut(b).unwrap().priority = 3;
        sched.enqueue(&table, a);
        sched.enqueue(&table, b);
        assert_eq!(sched.pick_next(&table), Some(b));
    }

    #[test]
    fn quantum_exhaustion_demotes_l0_to_l1() {
        let mut table = ProcTable::<SimAddressSpace>::new();
        let mut sched = Scheduler::new();
        let a = fresh_runnable(&mut table);
        sched.begin_running(a);
        for _ in 0..QUANTUM[0] {
            sched.tick(&mut table);
        }
        assert_eq!(table.get(a).unwrap().level, 1);
        assert_eq!(table.get(a).unwrap().quantum_used, 0);
    }

    #[test]
    fn quantum_exhaustion_on_l2_lowers_priority_not_level() {
        let mut table = ProcTable::<SimAddressSpace>::new();
        let mut sched = Scheduler::new();
        let a = fresh_runnable(&mut table);
        table.get_mut(a).unwrap().level = 2;
        table.get_mut(a).unwrap().priority = 3;
        sched.begin_running(a);
        for _ in 0..QUANTUM[2] {
            sched.tick(&mut table);
        }
        assert_eq!(table.get(a).unwrap().level, 2);
        assert_eq!(table.get(a).unwrap().priority, 2);
    }

    #[test]
    fn boost_resets_every_process_to_l0() {
        let mut table = ProcTable::<SimAddressSpace>::new();
        let mut sched = Scheduler::new();
        let a = fresh_runnable(&mut table);
        table.get_mut(a).unwrap().level = 2;
        table.get_mut(a).unwrap().priority = 1;
        sched.enqueue(&table, a);
        for _ in 0..BOOST_INTERVAL {
            sched.tick(&mut table);
        }
        assert_eq!(table.get(a).unwrap().level, 0);
        assert_eq!(table.get(a).unwrap().priority, 1, "boost must not touch priority");
        assert_eq!(sched.pick_next(&table), Some(a));
    }

    #[test]
    fn lock_requires_correct_password() {
        let mut table = ProcTable::<SimAddressSpace>::new();
        let mut sched = Scheduler::new();
        let a = fresh_runnable(&mut table);
        assert_eq!(
            sched.lock(&mut table, a, PASSWORD - 1),
            Err(KernelError::BadPassword)
        );
        assert!(sched.lock(&mut table, a, PASSWORD).is_ok());
        assert_eq!(sched.lock_holder(), Some(a));
    }

    #[test]
    fn second_process_cannot_acquire_held_lock() {
        let mut table = ProcTable::<SimAddressSpace>::new();
        let mut sched = Scheduler::new();
        let a = fresh_runnable(&mut table);
        let b = fresh_runnable(&mut table);
        sched.lock(&mut table, a, PASSWORD).unwrap();
        assert_eq!(
            sched.lock(&mut table, b, PASSWORD),
            Err(KernelError::Duplicated)
        );
    }

    #[test]
    fn unlock_by_non_holder_fails() {
        let mut table = ProcTable::<SimAddressSpace>::new();
        let mut sched = Scheduler::new();
        let a = fresh_runnable(&mut table);
        let b = fresh_runnable(&mut table);
        sched.lock(&mut table, a, PASSWORD).unwrap();
        assert_eq!(sched.unlock(&mut table, b), Err(KernelError::NotLocked));
    }

    #[test]
    fn locked_process_is_selected_over_l0_queue() {
        let mut table = ProcTable::<SimAddressSpace>::new();
        let mut sched = Scheduler::new();
        let a = fresh_runnable(&mut table);
        let b = fresh_runnable(&mut table);
        sched.lock(&mut table, a, PASSWORD).unwrap();
        sched.enqueue(&table, b);
        assert_eq!(sched.pick_next(&table), Some(a));
    }
}
