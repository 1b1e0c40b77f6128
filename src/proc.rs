//! Data model shared by the process table, the scheduler and the thread
//! engine (component C1).

use crate::contracts::{AddressSpace, Context, KernelStack, TrapFrame};

/// Process-table capacity. The 101st `allocate_process` call fails `NoSlot`.
pub const NPROC: usize = 100;
/// Thread slots per process; slot 0 is always the main thread.
pub const THREADS_PER_PROC: usize = 10;
/// Stack-pool capacity: every slot but the main thread's can recycle a stack.
pub const THREAD_POOL_SIZE: usize = THREADS_PER_PROC - 1;
/// Maximum `exec`/`exec2` argv entries.
pub const MAXARG: usize = 32;
/// Page size in bytes.
pub const PGSIZE: usize = 4096;
/// Kernel-stack size in bytes (two pages, a `TASK_STACK_SIZE`-style sizing
/// convention).
pub const KSTACKSIZE: usize = 2 * PGSIZE;
/// Open-file-table slots per process.
pub const NOFILE: usize = 16;
/// Compile-time scheduler-lock password.
pub const PASSWORD: u64 = 2_019_030_991;

/// Unique process identifier. `None` in a slot means the slot is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

/// Unified state machine shared by process slots and thread slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unused,
    Embryo,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

/// Opaque wait-channel identifier passed to `sleep`/`wakeup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chan(pub usize);

/// Canonical wait channel for "a child of this process changed state",
/// used by `exit`/`wait`. One per process slot, so it is just the slot's pid
/// reinterpreted as a channel id — matching the source kernel's
/// `sleep(curproc, ...)` / `wakeup1(curproc->parent)` idiom of using the
/// `proc` pointer itself as the channel.
pub fn wait_chan(pid: Pid) -> Chan {
    Chan(0x5741_4954_0000_0000 ^ pid.0 as usize)
}

/// Canonical wait channel `thread_join` blocks on while the target thread
/// (`tid`, within the calling process `pid`) is still alive: the thread
/// slot's address, reinterpreted.
pub fn join_chan(pid: Pid, tid: usize) -> Chan {
    Chan(0x4a4f_494e_0000_0000 ^ ((pid.0 as usize) << 8) ^ tid)
}

/// A single kernel thread within a process.
#[derive(Debug)]
pub struct Thread {
    pub tid: usize,
    pub state: State,
    pub kstack: Option<KernelStack>,
    pub tf: TrapFrame,
    pub context: Context,
    pub chan: Option<Chan>,
    /// Virtual base of this thread's user-stack region (tid > 0 only).
    pub start: Option<usize>,
    pub retval: usize,
    /// `start_routine`'s argument, pushed onto the fake-return frame
    /// alongside the `0xffffffff` sentinel return address so the thread
    /// receives it on its first dispatch.
    pub arg: usize,
}

impl Thread {
    pub fn unused(tid: usize) -> Self {
        Thread {
            tid,
            state: State::Unused,
            kstack: None,
            tf: TrapFrame::default(),
            context: Context::default(),
            chan: None,
            start: None,
            retval: 0,
            arg: 0,
        }
    }
}

/// A single process slot.
pub struct Process<A: AddressSpace> {
    pub pid: Option<Pid>,
    pub state: State,
    pub parent: Option<Pid>,
    pub pgdir: A,
    pub sz: usize,
    /// 0 = unlimited; otherwise a page-count budget.
    pub sz_limit: usize,
    pub name: String,
    /// Opaque handle standing in for the filesystem's inode layer.
    pub cwd: Option<u64>,
    pub ofile: [Option<u64>; NOFILE],
    pub killed: bool,
    pub ttable: [Thread; THREADS_PER_PROC],
    pub cur_thread: usize,
    pub thread_pool: [Option<usize>; THREAD_POOL_SIZE],
    pub level: u8,
    pub priority: u8,
    pub quantum_used: u32,
    pub total_in_level: u32,
    pub locked: bool,
    pub password_verified: bool,
}

impl<A: AddressSpace> Process<A> {
    pub fn empty() -> Self {
        Process {
            pid: None,
            state: State::Unused,
            parent: None,
            pgdir: A::new(),
            sz: 0,
            sz_limit: 0,
            name: String::new(),
            cwd: None,
            ofile: [None; NOFILE],
            killed: false,
            ttable: core::array::from_fn(Thread::unused),
            cur_thread: 0,
            thread_pool: [None; THREAD_POOL_SIZE],
            level: 0,
            priority: 0,
            quantum_used: 0,
            total_in_level: 0,
            locked: false,
            password_verified: false,
        }
    }

    pub fn is_unused(&self) -> bool {
        matches!(self.state, State::Unused)
    }

    pub fn main_thread(&self) -> &Thread {
        &self.ttable[0]
    }

    pub fn main_thread_mut(&mut self) -> &mut Thread {
        &mut self.ttable[0]
    }

    pub fn current_thread(&self) -> &Thread {
        &self.ttable[self.cur_thread]
    }

    pub fn current_thread_mut(&mut self) -> &mut Thread {
        &mut self.ttable[self.cur_thread]
    }

    /// A process is runnable iff at least one thread slot is runnable.
    pub fn has_runnable_thread(&self) -> bool {
        self.ttable.iter().any(|t| matches!(t.state, State::Runnable))
    }

    pub fn all_non_unused_sleeping(&self) -> bool {
        self.ttable
            .iter()
            .filter(|t| !matches!(t.state, State::Unused))
            .all(|t| matches!(t.state, State::Sleeping))
    }

    pub fn page_count(&self) -> usize {
        self.sz / PGSIZE
    }

    fn reset_scheduling_attrs(&mut self) {
        self.level = 0;
        self.priority = 0;
        self.quantum_used = 0;
        self.total_in_level = 0;
        self.locked = false;
        self.password_verified = false;
    }

    /// Reinitialize a freshly-scanned `Unused` slot into `Embryo`, as
    /// `allocproc` does under the table lock before releasing it to go
    /// allocate a kernel stack.
    pub(crate) fn reset_for_embryo(&mut self, pid: Pid) {
        self.pid = Some(pid);
        self.state = State::Embryo;
        self.parent = None;
        self.sz = 0;
        self.sz_limit = 0;
        self.name = String::new();
        self.cwd = None;
        self.ofile = [None; NOFILE];
        self.killed = false;
        self.cur_thread = 0;
        self.thread_pool = [None; THREAD_POOL_SIZE];
        self.reset_scheduling_attrs();
        for (i, t) in self.ttable.iter_mut().enumerate() {
            *t = Thread::unused(i);
        }
    }

    pub(crate) fn clear_to_unused(&mut self) {
        self.pid = None;
        self.state = State::Unused;
        self.parent = None;
        self.name.clear();
        self.cwd = None;
        self.ofile = [None; NOFILE];
        self.killed = false;
        self.thread_pool = [None; THREAD_POOL_SIZE];
        self.reset_scheduling_attrs();
    }
}
