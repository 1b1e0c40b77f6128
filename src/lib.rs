//! A multi-level feedback-queue process scheduler and per-process
//! kernel-thread engine, hosted over a small set of trait contracts so the
//! whole engine runs and is tested without real hardware underneath it.

pub mod address_space;
pub mod contracts;
pub mod error;
pub mod introspect;
pub mod kernel;
pub mod proc;
pub mod scheduler;
pub mod table;
pub mod threads;

pub use contracts::{AddressSpace, BumpStackPool, Cpu, KernelStackPool, NullCpu, SimAddressSpace};
pub use error::{KernelError, KernelResult};
pub use kernel::{Kernel, KERNEL};
pub use proc::{Pid, State, PASSWORD};
