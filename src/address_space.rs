//! Address-space operations (component C6): `growproc`, `setmemorylimit`,
//! and `exec2`'s image replacement plus sibling-thread collapse.

use crate::contracts::{AddressSpace, Cpu, KernelStackPool};
use crate::error::{diag, KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::proc::{Pid, State, PGSIZE};

/// `exec`'s stack size in pages when the caller does not specify one.
pub const DEFAULT_STACKSIZE: usize = 1;
pub const MAX_STACKSIZE: usize = 100;

impl<A, K, C> Kernel<A, K, C>
where
    A: AddressSpace,
    K: KernelStackPool,
    C: Cpu,
{
    /// `sbrk`'s underlying primitive: grow (`n > 0`) or shrink (`n < 0`)
    /// the calling process's address space by `n` bytes.
    pub fn growproc(&mut self, pid: Pid, n: isize) -> KernelResult<usize> {
        self.irq.push();
        let result = (|| {
            let idx = self
                .table
                .index_of(pid)
                .ok_or_else(|| diag!(KernelError::NoSuchPid))?;
            let old_sz = self.table.slots[idx].sz;
            let new_sz = if n >= 0 {
                old_sz + n as usize
            } else {
                old_sz.saturating_sub((-n) as usize)
            };
            let limit = self.table.slots[idx].sz_limit;
            if n > 0 && limit != 0 && new_sz / PGSIZE > limit {
                return Err(diag!(KernelError::MemoryLimit));
            }
            let proc = &mut self.table.slots[idx];
            let result_sz = if n > 0 {
                proc.pgdir.grow(old_sz, new_sz).map_err(|e| diag!(e))?
            } else if n < 0 {
                proc.pgdir.shrink(old_sz, new_sz)
            } else {
                old_sz
            };
            proc.sz = result_sz;
            Ok(old_sz)
        })();
        self.irq.pop();
        result
    }

    /// `setmemorylimit`: store a page-count budget, rejecting a limit
    /// already exceeded by the process's current size.
    pub fn setmemorylimit(&mut self, pid: Pid, limit: isize) -> KernelResult<()> {
        self.irq.push();
        let result = (|| {
            if limit < 0 {
                return Err(diag!(KernelError::BadArg));
            }
            let limit = limit as usize;
            let proc = self
                .table
                .get_mut(pid)
                .ok_or_else(|| diag!(KernelError::NoSuchPid))?;
            if limit != 0 && proc.page_count() > limit {
                return Err(diag!(KernelError::AlreadyExceeded));
            }
            proc.sz_limit = limit;
            Ok(())
        })();
        self.irq.pop();
        result
    }

    /// `exec2`: load a new image of `image_size` bytes with a
    /// `stacksize`-page user stack plus one guard page, replacing the
    /// calling process's address space and collapsing its thread table
    /// down to a single main thread.
    pub fn exec2(
        &mut self,
        pid: Pid,
        image_size: usize,
        stacksize: usize,
    ) -> KernelResult<()> {
        self.irq.push();
        let result = (|| {
            if stacksize < 1 || stacksize > MAX_STACKSIZE {
                return Err(diag!(KernelError::BadArg));
            }
            let idx = self
                .table
                .index_of(pid)
                .ok_or_else(|| diag!(KernelError::NoSuchPid))?;
            let image_sz = crate::contracts::page_round_up(image_size);
            let total_sz = image_sz + (stacksize + 1) * PGSIZE;
            let limit = self.table.slots[idx].sz_limit;
            if limit != 0 && total_sz / PGSIZE > limit {
                return Err(diag!(KernelError::MemoryLimit));
            }

            let mut new_space = A::new();
            let grown = new_space.grow(0, image_sz).map_err(|e| diag!(e))?;
            let stack_top = new_space
                .grow(grown, grown + (stacksize + 1) * PGSIZE)
                .map_err(|e| diag!(e))?;
            new_space.clear_user_bit(grown);

            let caller_tid = self.table.slots[idx].cur_thread;
            for (tid, t) in self.table.slots[idx].ttable.iter_mut().enumerate() {
                if tid != caller_tid && !matches!(t.state, State::Unused) {
                    if let Some(stack) = t.kstack.take() {
                        self.stacks.free(stack);
                    }
                    *t = crate::proc::Thread::unused(tid);
                }
            }
            if caller_tid != 0 {
                let moved = std::mem::replace(
                    &mut self.table.slots[idx].ttable[caller_tid],
                    crate::proc::Thread::unused(caller_tid),
                );
                self.table.slots[idx].ttable[0] = crate::proc::Thread {
                    tid: 0,
                    ..moved
                };
            }
            self.table.slots[idx].cur_thread = 0;
            self.table.slots[idx].ttable[0].state = State::Runnable;
            self.table.slots[idx].ttable[0].tf.esp = stack_top;
            self.table.slots[idx].ttable[0].start = Some(stack_top);
            self.table.slots[idx].thread_pool = Default::default();
            self.table.slots[idx].pgdir = new_space;
            self.table.slots[idx].sz = stack_top;
            Ok(())
        })();
        self.irq.pop();
        result
    }

    pub fn exec(&mut self, pid: Pid, image_size: usize) -> KernelResult<()> {
        self.exec2(pid, image_size, DEFAULT_STACKSIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;

    #[test]
    fn growproc_rejects_over_limit() {
        let mut kernel = Kernel::new();
        let pid = kernel.boot_init_process("init").unwrap();
        kernel.setmemorylimit(pid, 2).unwrap();
        assert_eq!(
            kernel.growproc(pid, 10 * PGSIZE as isize),
            Err(KernelError::MemoryLimit)
        );
    }

    #[test]
    fn setmemorylimit_rejects_already_exceeded() {
        let mut kernel = Kernel::new();
        let pid = kernel.boot_init_process("init").unwrap();
        kernel.growproc(pid, 10 * PGSIZE as isize).unwrap();
        assert_eq!(
            kernel.setmemorylimit(pid, 2),
            Err(KernelError::AlreadyExceeded)
        );
    }

    #[test]
    fn exec2_rejects_out_of_range_stacksize() {
        let mut kernel = Kernel::new();
        let pid = kernel.boot_init_process("init").unwrap();
        assert_eq!(kernel.exec2(pid, 4096, 0), Err(KernelError::BadArg));
        assert_eq!(kernel.exec2(pid, 4096, 101), Err(KernelError::BadArg));
    }

    #[test]
    fn exec2_collapses_sibling_threads() {
        let mut kernel = Kernel::new();
        let pid = kernel.boot_init_process("init").unwrap();
        kernel.thread_create(pid, 0x1000, 0).unwrap();
        kernel.thread_create(pid, 0x2000, 0).unwrap();
        kernel.exec2(pid, 4096, 2).unwrap();
        let proc = kernel.table().get(pid).unwrap();
        assert_eq!(proc.cur_thread, 0);
        assert!(matches!(proc.ttable[0].state, State::Runnable));
        for t in proc.ttable[1..].iter() {
            assert!(matches!(t.state, State::Unused));
        }
    }
}
