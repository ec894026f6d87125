//! Process and container lifecycle core of a small multi-core teaching kernel.
//!
//! The crate owns the process table, the per-CPU container-fair scheduler,
//! sleep/wakeup, fork/exit/wait/kill, container quotas and the
//! suspend/resume checkpoint protocol. Page tables, the filesystem and the
//! user trap path are reached through the [`hal::Hal`] collaborator traits.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub mod console;

pub mod arch;
pub mod checkpoint;
pub mod config;
pub mod container;
pub mod diagnostics;
pub mod error;
pub mod fs;
pub mod hal;
pub mod kernel;
pub mod logging;
pub mod memory;
pub mod name;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod timer;
pub mod trap;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::KernelConfig;
pub use container::{ContainerId, ContainerState, Limits};
pub use error::{KResult, KernelError, Quota};
pub use hal::Hal;
pub use kernel::Kernel;
pub use task::{Channel, ProcState};
