/// Multi-core synchronization primitives
///
/// Every lock the process and container tables use is a [`SpinLock`]
/// that knows its holder CPU, so a guard can be handed from a process to
/// the per-CPU scheduler and back across a context switch.
pub mod spinlock;

pub use spinlock::{CpuLocal, SpinLock, SpinLockGuard};
