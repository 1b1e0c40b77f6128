//! The process/thread table (component C1): a single fixed-capacity
//! structure whose every scheduling-relevant field is only ever touched
//! while the owning [`Kernel`](crate::kernel::Kernel) holds its table lock.

use crate::contracts::AddressSpace;
use crate::error::{diag, KernelError, KernelResult};
use crate::proc::{Pid, Process, NPROC};

pub struct ProcTable<A: AddressSpace> {
    pub slots: [Process<A>; NPROC],
    next_pid: u64,
}

impl<A: AddressSpace> ProcTable<A> {
    pub fn new() -> Self {
        ProcTable {
            slots: core::array::from_fn(|_| Process::empty()),
            next_pid: 1,
        }
    }

    pub fn index_of(&self, pid: Pid) -> Option<usize> {
        self.slots.iter().position(|p| p.pid == Some(pid))
    }

    pub fn get(&self, pid: Pid) -> Option<&Process<A>> {
        self.index_of(pid).map(|i| &self.slots[i])
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process<A>> {
        self.index_of(pid).map(move |i| &mut self.slots[i])
    }

    /// `allocproc`: scan for an `Unused` slot, mint a pid, mark `Embryo`.
    pub fn alloc_slot(&mut self) -> KernelResult<(usize, Pid)> {
        let idx = self
            .slots
            .iter()
            .position(Process::is_unused)
            .ok_or_else(|| diag!(KernelError::NoSlot))?;
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        self.slots[idx].reset_for_embryo(pid);
        Ok((idx, pid))
    }

    pub fn children_of(&self, pid: Pid) -> impl Iterator<Item = &Process<A>> {
        self.slots.iter().filter(move |p| p.parent == Some(pid))
    }
}

impl<A: AddressSpace> Default for ProcTable<A> {
    fn default() -> Self {
        Self::new()
    }
}
