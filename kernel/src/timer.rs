//! Clock ticks and tick-based sleeping.
//!
//! CPU 0 owns the tick counter. Every CPU charges the process it
//! interrupts and gives up the CPU on each timer interrupt.

use core::sync::atomic::Ordering;

use log::trace;

use crate::{
    arch::Arch,
    error::{KResult, KernelError},
    hal::Hal,
    kernel::Kernel,
    task::Channel,
};

impl<H: Hal> Kernel<H> {
    /// 时钟前进一拍，并唤醒等待 ticks 的进程
    pub fn clock_tick(&self) {
        let _g = self.tickslock.lock(self);
        self.ticks.fetch_add(1, Ordering::AcqRel);
        self.wakeup(self.ticks_channel());
    }

    /// Timer interrupt taken while the current process was in user mode.
    pub async fn timer_interrupt(&'static self) {
        H::arm_timer();
        let slot = self.current();
        self.proc(slot).lock.lock(self).cpu_tokens += 1;
        if H::cpu_id() == 0 {
            self.clock_tick();
        }
        self.exit_if_killed().await;
        // 让出 CPU
        self.yield_now().await;
        self.exit_if_killed().await;
    }

    /// Block the current process for `n` ticks. Fails early if it is
    /// killed meanwhile.
    pub async fn sleep_ticks(&'static self, n: u64) -> KResult<()> {
        let mut g = self.tickslock.lock(self);
        let ticks0 = self.ticks();
        while self.ticks().wrapping_sub(ticks0) < n {
            if self.killed() {
                return Err(KernelError::Killed);
            }
            g = self.sleep(self.ticks_channel(), g).await;
        }
        drop(g);
        trace!("sleep_ticks: slept {} ticks", n);
        Ok(())
    }

    /// Ticks since boot, read under the tick lock.
    pub fn uptime(&self) -> u64 {
        let _g = self.tickslock.lock(self);
        self.ticks()
    }

    fn ticks_channel(&self) -> Channel {
        Channel::of(&self.ticks)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use crate::testutil::{boot, program, run_until, timer_arms};

    #[test]
    fn sleep_lasts_at_least_the_requested_ticks() {
        let k = boot(vec![program(|k| async move {
            let start = k.uptime();
            k.sleep_ticks(10).await.unwrap();
            k.hal.record(format!("slept {}", k.uptime() - start >= 10));
            0
        })]);
        assert!(run_until(k, 100, || k.hal.saw("slept true")));
        assert!(k.ticks() >= 10);
    }

    #[test]
    fn timer_interrupt_charges_and_ticks_on_cpu0() {
        let k = boot(vec![program(|k| async move {
            let before = k.uptime();
            let armed = timer_arms();
            k.timer_interrupt().await;
            let tokens = k.proc(k.current()).lock.lock(k).cpu_tokens;
            k.hal.record(format!(
                "{} {} {}",
                tokens,
                k.uptime() > before,
                timer_arms() - armed
            ));
            0
        })]);
        assert!(run_until(k, 20, || k.hal.saw("1 true 1")));
    }
}
