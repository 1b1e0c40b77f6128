//! The kernel object: owns the process table and the scheduler behind a
//! single lock, and implements allocation/lifecycle (C2) and the
//! suspension primitives (C4).
//!
//! Every public method here is the equivalent of acquiring the table lock,
//! doing the minimal amount of work, and releasing it — the same
//! `without_interrupts(|| SCHEDULER.lock().method())` shape, but collapsed
//! into a single `Mutex<Kernel>` since the whole engine (table + scheduler +
//! collaborators) forms one coherent critical section here.

use crate::contracts::{AddressSpace, BumpStackPool, Cpu, IrqGuard, KernelStackPool, NullCpu,
    SimAddressSpace};
use crate::error::{diag, KernelError, KernelResult};
use crate::proc::{wait_chan, Chan, Pid, State};
use crate::scheduler::Scheduler;
use crate::table::ProcTable;

pub struct Kernel<A = SimAddressSpace, K = BumpStackPool, C = NullCpu>
where
    A: AddressSpace,
    K: KernelStackPool,
    C: Cpu,
{
    pub(crate) table: ProcTable<A>,
    pub(crate) scheduler: Scheduler,
    pub(crate) stacks: K,
    pub(crate) cpu: C,
    pub(crate) irq: IrqGuard,
}

impl Default for Kernel<SimAddressSpace, BumpStackPool, NullCpu> {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel<SimAddressSpace, BumpStackPool, NullCpu> {
    pub fn new() -> Self {
        Kernel {
            table: ProcTable::new(),
            scheduler: Scheduler::new(),
            stacks: BumpStackPool::default(),
            cpu: NullCpu,
            irq: IrqGuard::default(),
        }
    }
}

lazy_static::lazy_static! {
    /// The single running kernel instance: one global spinlock, acquired
    /// for the duration of each syscall-shaped operation.
    pub static ref KERNEL: spin::Mutex<Kernel> = spin::Mutex::new(Kernel::new());
}

impl<A, K, C> Kernel<A, K, C>
where
    A: AddressSpace,
    K: KernelStackPool,
    C: Cpu,
{
    pub fn with_collaborators(stacks: K, cpu: C) -> Self {
        Kernel {
            table: ProcTable::new(),
            scheduler: Scheduler::new(),
            stacks,
            cpu,
            irq: IrqGuard::default(),
        }
    }

    /// `allocproc` + the first-process bootstrap: mint a pid, allocate a
    /// kernel stack for the main thread, and leave the process `Embryo`.
    /// The caller (`init` creation or `fork`) finishes populating the slot.
    fn alloc_embryo(&mut self) -> KernelResult<Pid> {
        let (idx, pid) = self.table.alloc_slot()?;
        match self.stacks.alloc() {
            Ok(stack) => {
                self.table.slots[idx].main_thread_mut().kstack = Some(stack);
                Ok(pid)
            }
            Err(e) => {
                self.table.slots[idx].clear_to_unused();
                Err(diag!(e))
            }
        }
    }

    /// Create the first process in the system (`userinit`): no parent, a
    /// fresh empty address space, main thread runnable from tid 0.
    pub fn boot_init_process(&mut self, name: &str) -> KernelResult<Pid> {
        self.irq.push();
        let result = (|| {
            let pid = self.alloc_embryo()?;
            let idx = self.table.index_of(pid).unwrap();
            let proc = &mut self.table.slots[idx];
            proc.name = name.to_string();
            proc.sz = crate::proc::PGSIZE;
            proc.pgdir.grow(0, proc.sz).map_err(|e| diag!(e))?;
            proc.state = State::Runnable;
            proc.main_thread_mut().state = State::Runnable;
            self.scheduler.enqueue(&self.table, pid);
            Ok(pid)
        })();
        self.irq.pop();
        result
    }

    /// `fork`: duplicate the calling process's address space, open files,
    /// and current-thread register state into a new child; the child's
    /// main thread resumes as if `fork` just returned 0 to it.
    pub fn fork(&mut self, parent: Pid) -> KernelResult<Pid> {
        self.irq.push();
        let result = (|| {
            let parent_idx = self
                .table
                .index_of(parent)
                .ok_or_else(|| diag!(KernelError::NoSuchPid))?;
            let (parent_sz, parent_name, parent_cwd, parent_ofile, parent_limit) = {
                let p = &self.table.slots[parent_idx];
                (p.sz, p.name.clone(), p.cwd, p.ofile, p.sz_limit)
            };
            let pgdir = self.table.slots[parent_idx]
                .pgdir
                .fork_copy(parent_sz)
                .map_err(|e| diag!(e))?;
            let child_pid = match self.alloc_embryo() {
                Ok(pid) => pid,
                Err(e) => return Err(e),
            };
            let child_idx = self.table.index_of(child_pid).unwrap();
            {
                let child = &mut self.table.slots[child_idx];
                child.pgdir = pgdir;
                child.sz = parent_sz;
                child.sz_limit = parent_limit;
                child.name = parent_name;
                child.cwd = parent_cwd;
                child.ofile = parent_ofile;
                child.parent = Some(parent);
                child.state = State::Runnable;
                child.main_thread_mut().tf.eax = 0;
                child.main_thread_mut().state = State::Runnable;
            }
            self.scheduler.enqueue(&self.table, child_pid);
            Ok(child_pid)
        })();
        self.irq.pop();
        result
    }

    /// `exit`: tear down every thread's stack, reparent children to pid 1
    /// if present, wake the parent, and park the caller as a `Zombie`.
    /// The slot is reaped later by the parent's `wait`.
    pub fn exit(&mut self, pid: Pid, init_pid: Option<Pid>) -> KernelResult<()> {
        self.irq.push();
        let result = (|| {
            let idx = self
                .table
                .index_of(pid)
                .ok_or_else(|| diag!(KernelError::NoSuchPid))?;
            let parent = self.table.slots[idx].parent;
            for t in self.table.slots[idx].ttable.iter_mut() {
                if let Some(stack) = t.kstack.take() {
                    self.stacks.free(stack);
                }
                t.state = State::Unused;
            }
            self.table.slots[idx].state = State::Zombie;
            self.scheduler.on_exited(pid);

            let reparent_target = init_pid.filter(|&i| i != pid);
            for other in self.table.slots.iter_mut() {
                if other.parent == Some(pid) {
                    other.parent = reparent_target;
                }
            }
            if let Some(target) = reparent_target {
                self.wakeup_locked(wait_chan(target));
            }
            if let Some(parent_pid) = parent {
                self.wakeup_locked(wait_chan(parent_pid));
            }
            Ok(())
        })();
        self.irq.pop();
        result
    }

    /// `wait`: block until a child becomes `Zombie`, reap it, and return
    /// its pid. Fails `NoChildren` immediately if the caller has none.
    pub fn wait(&mut self, parent: Pid) -> KernelResult<Pid> {
        self.irq.push();
        loop {
            if !self.table.slots.iter().any(|p| p.parent == Some(parent)) {
                self.irq.pop();
                return Err(diag!(KernelError::NoChildren));
            }
            if let Some(idx) = self
                .table
                .slots
                .iter()
                .position(|p| p.parent == Some(parent) && matches!(p.state, State::Zombie))
            {
                let child_pid = self.table.slots[idx].pid.unwrap();
                self.table.slots[idx].clear_to_unused();
                self.irq.pop();
                return Ok(child_pid);
            }
            self.sleep_locked(parent, wait_chan(parent));
        }
    }

    /// `sleep`: park `pid` on `chan` until a matching `wakeup`.
    pub fn sleep(&mut self, pid: Pid, chan: Chan) -> KernelResult<()> {
        self.irq.push();
        self.sleep_locked(pid, chan);
        self.irq.pop();
        Ok(())
    }

    pub(crate) fn sleep_locked(&mut self, pid: Pid, chan: Chan) {
        if let Some(proc) = self.table.get_mut(pid) {
            proc.current_thread_mut().chan = Some(chan);
            proc.current_thread_mut().state = State::Sleeping;
            if proc.all_non_unused_sleeping() {
                proc.state = State::Sleeping;
            }
        }
        self.scheduler.on_blocked(pid);
    }

    /// `wakeup`: every thread (in any process) sleeping on `chan` becomes
    /// runnable again; if that makes its owning process runnable, it
    /// rejoins the ready queue at its current level.
    pub fn wakeup(&mut self, chan: Chan) {
        self.irq.push();
        self.wakeup_locked(chan);
        self.irq.pop();
    }

    pub(crate) fn wakeup_locked(&mut self, chan: Chan) {
        let pids: Vec<Pid> = self.table.slots.iter().filter_map(|p| p.pid).collect();
        for pid in pids {
            let mut woke = false;
            if let Some(proc) = self.table.get_mut(pid) {
                for t in proc.ttable.iter_mut() {
                    if matches!(t.state, State::Sleeping) && t.chan == Some(chan) {
                        t.state = State::Runnable;
                        t.chan = None;
                        woke = true;
                    }
                }
                if woke && matches!(proc.state, State::Sleeping) {
                    proc.state = State::Runnable;
                }
            }
            if woke {
                self.scheduler.enqueue(&self.table, pid);
            }
        }
    }

    /// `yield`: the calling process gives up the remainder of its quantum
    /// voluntarily; it is re-queued at the tail of its current level.
    pub fn yield_now(&mut self, pid: Pid) {
        self.irq.push();
        self.scheduler.yield_now(&self.table, pid);
        self.irq.pop();
    }

    /// One clock interrupt. See [`Scheduler::tick`].
    pub fn tick(&mut self) -> bool {
        self.irq.push();
        let preempt = self.scheduler.tick(&mut self.table);
        if preempt {
            if let Some(pid) = self.scheduler.current() {
                if let Some(proc) = self.table.get_mut(pid) {
                    if matches!(proc.state, State::Running) {
                        proc.state = State::Runnable;
                    }
                }
                self.scheduler.yield_now(&self.table, pid);
            }
        }
        self.irq.pop();
        preempt
    }

    /// `scheduler`/`schedule_once`: pick the next runnable process, if any,
    /// and transition it to `Running`.
    pub fn schedule(&mut self) -> Option<Pid> {
        self.irq.push();
        let picked = self.scheduler.pick_next(&self.table);
        if let Some(pid) = picked {
            self.scheduler.begin_running(pid);
            if let Some(proc) = self.table.get_mut(pid) {
                proc.state = State::Running;
                if !matches!(proc.current_thread().state, State::Runnable) {
                    if let Some(i) = proc.ttable.iter().position(|t| matches!(t.state, State::Runnable)) {
                        proc.cur_thread = i;
                    }
                }
                proc.current_thread_mut().state = State::Running;
            }
        }
        self.irq.pop();
        picked
    }

    /// `kill`: mark the target killed and wake every sleeping thread of
    /// theirs so they notice on their next scheduling point.
    pub fn kill(&mut self, pid: Pid) -> KernelResult<()> {
        self.irq.push();
        let result = (|| {
            let proc = self
                .table
                .get_mut(pid)
                .ok_or_else(|| diag!(KernelError::NoSuchPid))?;
            proc.killed = true;
            let was_sleeping = matches!(proc.state, State::Sleeping);
            for t in proc.ttable.iter_mut() {
                if matches!(t.state, State::Sleeping) {
                    t.state = State::Runnable;
                    t.chan = None;
                }
            }
            if was_sleeping {
                proc.state = State::Runnable;
                self.scheduler.enqueue(&self.table, pid);
            }
            Ok(())
        })();
        self.irq.pop();
        result
    }

    pub fn table(&self) -> &ProcTable<A> {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut ProcTable<A> {
        &mut self.table
    }

    pub fn scheduler_state(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_lock(&mut self, pid: Pid, password: u64) -> KernelResult<()> {
        self.irq.push();
        let r = self.scheduler.lock(&mut self.table, pid, password);
        self.irq.pop();
        r
    }

    pub fn scheduler_unlock(&mut self, pid: Pid) -> KernelResult<()> {
        self.irq.push();
        let r = self.scheduler.unlock(&mut self.table, pid);
        self.irq.pop();
        r
    }

    pub fn set_priority(&mut self, pid: Pid, priority: u8) -> KernelResult<()> {
        self.scheduler.set_priority(&mut self.table, pid, priority)
    }

    pub fn get_level(&self, pid: Pid) -> KernelResult<u8> {
        self.scheduler.get_level(&self.table, pid)
    }

}
