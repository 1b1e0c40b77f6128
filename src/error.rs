use std::fmt;

/// Every fallible operation in the process/thread engine returns one of these.
///
/// A flat `enum` with a manual `Display`, no `thiserror`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Process or thread table full.
    NoSlot,
    /// Address-space or kernel-stack contract reported allocation failure.
    OutOfMemory,
    /// Per-process memory limit would be exceeded.
    MemoryLimit,
    /// No process with the given pid exists.
    NoSuchPid,
    /// No thread with the given tid exists in the calling process.
    NoSuchTid,
    /// `wait` called by a process with no children.
    NoChildren,
    /// Argument out of its documented range.
    BadArg,
    /// Scheduler-lock password mismatch.
    BadPassword,
    /// Scheduler lock already held by another process.
    Duplicated,
    /// Scheduler unlock attempted by a process that is not the lock holder.
    NotLocked,
    /// Thread operation invoked from a non-main thread.
    NotMainCaller,
    /// `thread_exit` called from the main thread.
    CannotExitMain,
    /// `thread_create` found no free slot at all.
    ThreadTableFull,
    /// `thread_create` found only the main slot free (index 0).
    MainThreadSlotBusy,
    /// `setmemorylimit` would set a limit already exceeded by current usage.
    AlreadyExceeded,
    /// The calling process has been killed and must unwind instead of completing.
    Killed,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelError::NoSlot => write!(f, "process table full"),
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::MemoryLimit => write!(f, "memory limit exceeded"),
            KernelError::NoSuchPid => write!(f, "no such pid"),
            KernelError::NoSuchTid => write!(f, "no such tid"),
            KernelError::NoChildren => write!(f, "no children"),
            KernelError::BadArg => write!(f, "invalid argument"),
            KernelError::BadPassword => write!(f, "scheduler lock: wrong password"),
            KernelError::Duplicated => write!(f, "scheduler lock already held"),
            KernelError::NotLocked => write!(f, "scheduler lock not held by caller"),
            KernelError::NotMainCaller => write!(f, "caller is not the main thread"),
            KernelError::CannotExitMain => write!(f, "attempted to exit the main thread"),
            KernelError::ThreadTableFull => write!(f, "thread table full"),
            KernelError::MainThreadSlotBusy => write!(f, "only the main thread slot is free"),
            KernelError::AlreadyExceeded => write!(f, "memory limit already exceeded by current size"),
            KernelError::Killed => write!(f, "process was killed"),
        }
    }
}

impl std::error::Error for KernelError {}

pub type KernelResult<T> = Result<T, KernelError>;

/// Logs `$err` as a single-line `EXCEPTION: ...` diagnostic and returns it,
/// so call sites read as `return diag!(KernelError::NoSlot);`.
macro_rules! diag {
    ($err:expr) => {{
        let e = $err;
        log::warn!("EXCEPTION: {}", e);
        e
    }};
}

pub(crate) use diag;
