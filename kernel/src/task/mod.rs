//! Process table, lifecycle and scheduling.
//!
//! Lock order, outermost first:
//!
//! 1. `tickslock`
//! 2. a parent's process lock, then its child's
//! 3. container locks, lower slot first
//! 4. per-process data locks (leaves)
//!
//! A process lock is never taken while a container lock is held.

pub(crate) mod context;
mod fd;
mod lifecycle;
mod pid;
mod processor;
mod scheduler;
mod sleep;
mod task;
mod task_manager;

pub use context::Task;
pub use pid::{INIT_PID, PidAllocator};
pub use processor::Processor;
pub use task::{Channel, Proc, ProcData, ProcFlags, ProcInner, ProcState};

pub(crate) use task::NO_SLOT;
