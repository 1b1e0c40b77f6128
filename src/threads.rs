//! The per-process kernel-thread engine (component C5): `thread_create`,
//! `thread_exit`, `thread_join`, and the user-stack recycling pool.

use crate::contracts::{AddressSpace, Context, Cpu, KernelStackPool};
use crate::error::{diag, KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::proc::{join_chan, Pid, State, PGSIZE};

impl<A, K, C> Kernel<A, K, C>
where
    A: AddressSpace,
    K: KernelStackPool,
    C: Cpu,
{
    /// Must be called from the process's current main thread (tid 0).
    pub fn thread_create(&mut self, pid: Pid, start_routine: usize, arg: usize) -> KernelResult<usize> {
        self.irq.push();
        let result = (|| {
            let idx = self
                .table
                .index_of(pid)
                .ok_or_else(|| diag!(KernelError::NoSuchPid))?;
            if self.table.slots[idx].cur_thread != 0 {
                return Err(diag!(KernelError::NotMainCaller));
            }

            let free_tid = self.table.slots[idx]
                .ttable
                .iter()
                .skip(1)
                .position(|t| matches!(t.state, State::Unused))
                .map(|i| i + 1);
            let tid = match free_tid {
                Some(tid) => tid,
                None => {
                    let main_free = matches!(self.table.slots[idx].ttable[0].state, State::Unused);
                    return Err(diag!(if main_free {
                        KernelError::MainThreadSlotBusy
                    } else {
                        KernelError::ThreadTableFull
                    }));
                }
            };

            let kstack = self.stacks.alloc().map_err(|e| diag!(e))?;

            let reused_start = self.table.slots[idx]
                .thread_pool
                .iter_mut()
                .find(|slot| slot.is_some())
                .and_then(|slot| slot.take());

            let start = match reused_start {
                Some(start) => start,
                None => match self.alloc_user_stack(idx) {
                    Ok(start) => start,
                    Err(e) => {
                        self.stacks.free(kstack);
                        return Err(e);
                    }
                },
            };

            let caller_tf = self.table.slots[idx].main_thread().tf;
            let t = &mut self.table.slots[idx].ttable[tid];
            t.tid = tid;
            t.state = State::Embryo;
            t.kstack = Some(kstack);
            t.tf = caller_tf;
            t.tf.eax = 0;
            t.tf.eip = start_routine;
            t.tf.esp = start.saturating_sub(2 * std::mem::size_of::<usize>());
            t.context = Context::for_trampoline(start_routine, t.tf.esp);
            t.chan = None;
            t.start = Some(start);
            t.retval = 0;
            // fake-return frame: [fake_return_pc = 0xffffffff, arg], esp already
            // backed off by two words to hold it.
            t.arg = arg;
            t.state = State::Runnable;

            if matches!(self.table.slots[idx].state, State::Sleeping) {
                self.table.slots[idx].state = State::Runnable;
            }
            self.scheduler.enqueue(&self.table, pid);
            Ok(tid)
        })();
        self.irq.pop();
        result
    }

    /// Round `sz` up, check the memory limit, grow by two pages, clear the
    /// guard page's user bit, and return the new stack's top address.
    fn alloc_user_stack(&mut self, idx: usize) -> KernelResult<usize> {
        let proc = &self.table.slots[idx];
        let old_sz = crate::contracts::page_round_up(proc.sz);
        let new_sz = old_sz + 2 * PGSIZE;
        if proc.sz_limit != 0 && new_sz / PGSIZE > proc.sz_limit {
            return Err(diag!(KernelError::MemoryLimit));
        }
        let proc = &mut self.table.slots[idx];
        let grown = proc.pgdir.grow(old_sz, new_sz).map_err(|e| diag!(e))?;
        proc.pgdir.clear_user_bit(old_sz);
        proc.sz = grown;
        Ok(grown)
    }

    /// Never returns success to the caller: the thread is immediately
    /// rescheduled away. `CannotExitMain` is returned instead of panicking
    /// so a misbehaving caller can be reported through the syscall layer.
    pub fn thread_exit(&mut self, pid: Pid, retval: usize) -> KernelResult<()> {
        self.irq.push();
        let result = (|| {
            let idx = self
                .table
                .index_of(pid)
                .ok_or_else(|| diag!(KernelError::NoSuchPid))?;
            let cur = self.table.slots[idx].cur_thread;
            if cur == 0 {
                return Err(diag!(KernelError::CannotExitMain));
            }
            {
                let t = &mut self.table.slots[idx].ttable[cur];
                t.retval = retval;
                t.state = State::Zombie;
            }
            self.table.slots[idx].state = State::Runnable;
            // wakes the main thread's slot address: thread_join always sleeps
            // on join_chan(pid, 0), regardless of which tid it is reaping.
            self.wakeup_locked(join_chan(pid, 0));
            Ok(())
        })();
        self.irq.pop();
        result
    }

    /// Only callable from the main thread. Blocks until `tid` has called
    /// `thread_exit`, then reaps its slot and recycles its user stack.
    pub fn thread_join(&mut self, pid: Pid, tid: usize) -> KernelResult<usize> {
        self.irq.push();
        loop {
            let idx = match self.table.index_of(pid) {
                Some(idx) => idx,
                None => {
                    self.irq.pop();
                    return Err(diag!(KernelError::NoSuchPid));
                }
            };
            if self.table.slots[idx].cur_thread != 0 {
                self.irq.pop();
                return Err(diag!(KernelError::NotMainCaller));
            }
            if tid == 0 || tid >= self.table.slots[idx].ttable.len() {
                self.irq.pop();
                return Err(diag!(KernelError::NoSuchTid));
            }
            let state = self.table.slots[idx].ttable[tid].state;
            match state {
                State::Unused => {
                    self.irq.pop();
                    return Err(diag!(KernelError::NoSuchTid));
                }
                State::Zombie => {
                    let (retval, start) = {
                        let t = &mut self.table.slots[idx].ttable[tid];
                        if let Some(stack) = t.kstack.take() {
                            self.stacks.free(stack);
                        }
                        let retval = t.retval;
                        let start = t.start.take();
                        *t = crate::proc::Thread::unused(tid);
                        (retval, start)
                    };
                    if let Some(start) = start {
                        let proc = &mut self.table.slots[idx];
                        if let Some(slot) = proc.thread_pool.iter_mut().find(|s| s.is_none()) {
                            *slot = Some(start);
                        }
                    }
                    self.irq.pop();
                    return Ok(retval);
                }
                _ => {
                    self.sleep_locked(pid, join_chan(pid, 0));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;
    use crate::proc::{State, THREADS_PER_PROC};

    fn booted() -> (Kernel, Pid) {
        let mut kernel = Kernel::new();
        let pid = kernel.boot_init_process("init").unwrap();
        (kernel, pid)
    }

    #[test]
    fn thread_create_requires_main_caller() {
        let (mut kernel, pid) = booted();
        let tid = kernel.thread_create(pid, 0x1000, 0).unwrap();
        kernel.table_mut().get_mut(pid).unwrap().cur_thread = tid;
        assert_eq!(
            kernel.thread_create(pid, 0x2000, 0),
            Err(KernelError::NotMainCaller)
        );
    }

    #[test]
    fn tenth_thread_create_fails_table_full() {
        let (mut kernel, pid) = booted();
        for _ in 1..THREADS_PER_PROC {
            kernel.thread_create(pid, 0x1000, 0).unwrap();
        }
        assert_eq!(
            kernel.thread_create(pid, 0x1000, 0),
            Err(KernelError::ThreadTableFull)
        );
    }

    #[test]
    fn join_returns_exit_value_and_recycles_stack() {
        let (mut kernel, pid) = booted();
        let tid = kernel.thread_create(pid, 0x1000, 0).unwrap();
        // thread_exit operates on the *current* thread of the slot; drive it
        // by switching cur_thread to simulate that thread being scheduled.
        kernel.table_mut().get_mut(pid).unwrap().cur_thread = tid;
        kernel.thread_exit(pid, 42).unwrap();
        kernel.table_mut().get_mut(pid).unwrap().cur_thread = 0;
        let retval = kernel.thread_join(pid, tid).unwrap();
        assert_eq!(retval, 42);
        assert!(matches!(
            kernel.table().get(pid).unwrap().ttable[tid].state,
            State::Unused
        ));
        assert!(kernel
            .table()
            .get(pid)
            .unwrap()
            .thread_pool
            .iter()
            .any(Option::is_some));
    }

    #[test]
    fn recycled_stack_is_reused_on_next_create() {
        let (mut kernel, pid) = booted();
        let tid = kernel.thread_create(pid, 0x1000, 0).unwrap();
        kernel.table_mut().get_mut(pid).unwrap().cur_thread = tid;
        kernel.thread_exit(pid, 7).unwrap();
        kernel.table_mut().get_mut(pid).unwrap().cur_thread = 0;
        kernel.thread_join(pid, tid).unwrap();
        let start_before = kernel.table().get(pid).unwrap().sz;
        kernel.thread_create(pid, 0x2000, 0).unwrap();
        let start_after = kernel.table().get(pid).unwrap().sz;
        assert_eq!(start_before, start_after, "reused stack must not grow sz");
    }
}
