pub mod sbi;

use core::arch::asm;

use riscv::register::{sstatus, time};

use self::sbi::SbiConsole;
use super::Arch;
use crate::{config::TIMER_INTERVAL, console::ConsoleSink};

/// Supervisor-mode RISC-V hart. The boot code leaves each hart's id in `tp`.
pub struct Riscv64;

impl Arch for Riscv64 {
    #[inline(always)]
    fn cpu_id() -> usize {
        let id: usize;
        unsafe { asm!("mv {}, tp", out(reg) id) };
        id
    }

    fn intr_on() {
        unsafe { sstatus::set_sie() };
    }

    fn intr_off() {
        unsafe { sstatus::clear_sie() };
    }

    fn intr_get() -> bool {
        sstatus::read().sie()
    }

    fn wait_for_interrupt() {
        unsafe { asm!("wfi") };
    }

    fn arm_timer() {
        let next = time::read64() + TIMER_INTERVAL;
        let _ = sbi::set_timer(next);
    }

    fn early_console() -> Option<&'static dyn ConsoleSink> {
        Some(&SbiConsole)
    }
}
