//! CPU identity and interrupt control.

use crate::console::ConsoleSink;

#[cfg(target_arch = "riscv64")]
pub mod riscv64;

/// Architecture hooks used by the locks and the scheduler.
///
/// All of these act on the calling CPU only.
pub trait Arch {
    /// Index of the calling CPU, below [`crate::config::NCPU`].
    fn cpu_id() -> usize;
    fn intr_on();
    fn intr_off();
    fn intr_get() -> bool;
    /// Idle until the next interrupt.
    fn wait_for_interrupt() {
        core::hint::spin_loop();
    }

    /// Request the next timer interrupt one quantum from now.
    fn arm_timer() {}

    /// Console usable before any driver is up; installed by
    /// [`crate::Kernel::init`].
    fn early_console() -> Option<&'static dyn ConsoleSink> {
        None
    }
}
