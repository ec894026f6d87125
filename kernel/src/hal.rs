use alloc::boxed::Box;
use core::future::Future;
use core::pin::Pin;

use crate::{arch::Arch, fs::FileSystem, kernel::Kernel, memory::AddressSpace};

/// User-mode execution of the current process. Completes with the exit
/// status once the program asks to exit.
pub type UserTask = Pin<Box<dyn Future<Output = i32> + Send + 'static>>;

/// Everything the process core borrows from the rest of the kernel.
pub trait Hal: Arch + AddressSpace + FileSystem + Send + Sync + Sized + 'static {
    /// Return to user mode for the current process and keep servicing its
    /// traps. Every blocking point inside must go through the kernel's
    /// sleep or yield paths.
    fn enter_user(&self, kernel: &'static Kernel<Self>) -> UserTask;
}
