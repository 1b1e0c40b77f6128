//! External collaborator contracts (component C8).
//!
//! The boot path, the virtual-memory allocator, the page-frame allocator and
//! the low-level CPU context-switch primitive are treated as collaborators
//! outside the core engine, defined only by contract. This module is that
//! contract, expressed as traits, with a lightweight in-process
//! implementation standing in for the hardware so the scheduler and thread
//! engine in this crate are directly testable.
//!
//! A bare-metal frontend would implement [`AddressSpace`] over real page
//! tables, [`KernelStackPool`] over the page-frame allocator, and [`Cpu`]
//! over an `swtch`-style naked-asm routine; none of that wiring belongs here.

use crate::error::{KernelError, KernelResult};
use crate::proc::PGSIZE;

/// Processor-state snapshot stored per thread slot (the "trapframe").
///
/// Trimmed to the handful of fields the scheduler and thread engine actually
/// read or write: the resume address, the stack pointer, and the
/// return-value register cleared on `fork`/`thread_create`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub eip: usize,
    pub esp: usize,
    pub eax: usize,
}

/// Callee-saved context a real `swtch` would save/restore.
///
/// `entry` doubles as the fork-return trampoline address for freshly
/// allocated slots; `stack_top` is the kernel-stack pointer at the moment of
/// the last switch away from this thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    pub entry: usize,
    pub stack_top: usize,
}

impl Context {
    pub fn for_trampoline(entry: usize, stack_top: usize) -> Self {
        Context { entry, stack_top }
    }
}

/// Owned kernel-stack handle. Freed by returning it to the
/// [`KernelStackPool`] that issued it; never cloned.
#[derive(Debug, PartialEq, Eq)]
pub struct KernelStack {
    id: u64,
}

/// Stands in for `kalloc`/`kfree` restricted to kernel-stack-sized pages.
pub trait KernelStackPool {
    fn alloc(&mut self) -> KernelResult<KernelStack>;
    fn free(&mut self, stack: KernelStack);
}

/// Monotonic-handle kernel-stack pool used by every test and the demo binary.
///
/// Allocates a fresh synthetic id per task rather than real memory, since
/// this crate never executes the stack it stands for.
#[derive(Debug, Default)]
pub struct BumpStackPool {
    next_id: u64,
    live: usize,
    pub fail_next: bool,
}

impl KernelStackPool for BumpStackPool {
    fn alloc(&mut self) -> KernelResult<KernelStack> {
        if self.fail_next {
            self.fail_next = false;
            return Err(KernelError::OutOfMemory);
        }
        self.next_id += 1;
        self.live += 1;
        Ok(KernelStack { id: self.next_id })
    }

    fn free(&mut self, stack: KernelStack) {
        let _ = stack;
        self.live = self.live.saturating_sub(1);
    }
}

impl BumpStackPool {
    pub fn live_count(&self) -> usize {
        self.live
    }
}

/// Stands in for `setupkvm`/`copyuvm`/`allocuvm`/`deallocuvm`/`freevm`.
///
/// Implementors own exactly one process's address space and track only what
/// the scheduler and memory-limit logic need: the mapped page count.
pub trait AddressSpace: Sized {
    fn new() -> Self;
    /// `copyuvm`: deep-copy a `sz`-byte address space.
    fn fork_copy(&self, sz: usize) -> KernelResult<Self>;
    /// `allocuvm`: extend the mapping from `old_sz` to `new_sz` bytes, both
    /// already page-rounded by the caller. Returns the new size.
    fn grow(&mut self, old_sz: usize, new_sz: usize) -> KernelResult<usize>;
    /// `deallocuvm`: shrink the mapping. Returns the new size.
    fn shrink(&mut self, old_sz: usize, new_sz: usize) -> usize;
    /// `clearpteu`: clear the user-access bit on the guard page at `page_base`.
    fn clear_user_bit(&mut self, page_base: usize);
}

/// Page-count-only address space used by every test and the demo binary.
#[derive(Debug, Clone, Default)]
pub struct SimAddressSpace {
    pub mapped_bytes: usize,
    pub guard_pages: usize,
    pub fail_next: bool,
}

impl AddressSpace for SimAddressSpace {
    fn new() -> Self {
        Self::default()
    }

    fn fork_copy(&self, sz: usize) -> KernelResult<Self> {
        if self.fail_next {
            return Err(KernelError::OutOfMemory);
        }
        Ok(SimAddressSpace {
            mapped_bytes: sz,
            guard_pages: self.guard_pages,
            fail_next: false,
        })
    }

    fn grow(&mut self, _old_sz: usize, new_sz: usize) -> KernelResult<usize> {
        if self.fail_next {
            self.fail_next = false;
            return Err(KernelError::OutOfMemory);
        }
        self.mapped_bytes = new_sz;
        Ok(new_sz)
    }

    fn shrink(&mut self, _old_sz: usize, new_sz: usize) -> usize {
        self.mapped_bytes = new_sz;
        new_sz
    }

    fn clear_user_bit(&mut self, _page_base: usize) {
        self.guard_pages += 1;
    }
}

pub fn page_round_up(sz: usize) -> usize {
    (sz + PGSIZE - 1) & !(PGSIZE - 1)
}

/// Stands in for the naked-asm `swtch`/`restore_context` pair.
///
/// This crate only ever needs to make *scheduling decisions* over thread
/// slots, never to actually run arbitrary thread bodies, so the default
/// implementation performs no real register transfer — there is nothing to
/// execute in a hosted test. A bare-metal frontend supplies a real one.
pub trait Cpu {
    fn switch(&mut self, from: &mut Context, to: &Context);
    /// `getcallerpcs`: a capped walk of the saved frame-pointer chain, used
    /// only by `procdump` for a sleeping thread. Capped at `max` entries.
    fn caller_pcs(&self, ctx: &Context, max: usize) -> Vec<usize>;
}

#[derive(Debug, Default)]
pub struct NullCpu;

impl Cpu for NullCpu {
    fn switch(&mut self, from: &mut Context, to: &Context) {
        let _ = from;
        let _ = to;
    }

    fn caller_pcs(&self, _ctx: &Context, _max: usize) -> Vec<usize> {
        Vec::new()
    }
}

/// Per-CPU interrupt-disable nesting counter (`pushcli`/`popcli`).
///
/// The table lock's acquire/release wrap a push/pop pair so that nested
/// critical sections only restore the enable state on the outermost release.
#[derive(Debug, Default)]
pub struct IrqGuard {
    depth: u32,
}

impl IrqGuard {
    pub fn push(&mut self) {
        self.depth += 1;
    }

    pub fn pop(&mut self) {
        self.depth = self
            .depth
            .checked_sub(1)
            .expect("popcli: interrupt-disable nesting underflow");
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}
