use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{
    arch::Arch,
    hal::Hal,
    kernel::Kernel,
    sync::{CpuLocal, SpinLockGuard},
    task::{NO_SLOT, ProcInner, ProcState, context::Switch},
};

/// Per-CPU state.
///
/// Only the owning CPU writes these fields, with interrupts off; they are
/// atomics so the record can be shared through `&Kernel`.
pub struct Processor {
    /// The process running on this cpu, or none.
    proc: AtomicUsize,
    /// Depth of push_off() nesting.
    noff: AtomicUsize,
    /// Were interrupts enabled before push_off()?
    intena: AtomicBool,
}

impl Processor {
    pub(crate) fn new() -> Self {
        Self {
            proc: AtomicUsize::new(NO_SLOT),
            noff: AtomicUsize::new(0),
            intena: AtomicBool::new(false),
        }
    }

    pub(crate) fn current(&self) -> Option<usize> {
        match self.proc.load(Ordering::Relaxed) {
            NO_SLOT => None,
            slot => Some(slot),
        }
    }

    pub(crate) fn set_current(&self, slot: Option<usize>) {
        self.proc.store(slot.unwrap_or(NO_SLOT), Ordering::Relaxed);
    }

    pub(crate) fn noff(&self) -> usize {
        self.noff.load(Ordering::Relaxed)
    }

    pub(crate) fn clear_intena(&self) {
        self.intena.store(false, Ordering::Relaxed);
    }
}

impl<H: Hal> CpuLocal for Kernel<H> {
    fn cpu_id(&self) -> usize {
        H::cpu_id()
    }

    fn push_off(&self) {
        let old = H::intr_get();
        H::intr_off();
        let c = self.mycpu();
        if c.noff.load(Ordering::Relaxed) == 0 {
            c.intena.store(old, Ordering::Relaxed);
        }
        c.noff.fetch_add(1, Ordering::Relaxed);
    }

    fn pop_off(&self) {
        let c = self.mycpu();
        if H::intr_get() {
            panic!("pop_off - interruptible");
        }
        if c.noff.load(Ordering::Relaxed) < 1 {
            panic!("pop_off");
        }
        let left = c.noff.fetch_sub(1, Ordering::Relaxed) - 1;
        if left == 0 && c.intena.load(Ordering::Relaxed) {
            H::intr_on();
        }
    }
}

impl<H: Hal> Kernel<H> {
    /// This CPU's record. Interrupts should be off, or the caller must not
    /// care about migrating right after the call.
    pub(crate) fn mycpu(&self) -> &Processor {
        &self.cpus[H::cpu_id()]
    }

    /// Switch to the scheduler.
    ///
    /// The caller must hold only its own process lock and must already
    /// have moved the process out of `Running`. The lock is carried
    /// across the switch: the scheduler releases it, and re-acquires it
    /// before this thread is resumed.
    pub(crate) async fn sched<'a>(
        &'a self,
        p: SpinLockGuard<'a, ProcInner>,
    ) -> SpinLockGuard<'a, ProcInner> {
        if !p.lock_ref().holding(self) {
            panic!("sched p->lock");
        }
        if self.mycpu().noff() != 1 {
            panic!("sched locks");
        }
        if p.state == ProcState::Running {
            panic!("sched running");
        }
        if H::intr_get() {
            panic!("sched interruptible");
        }

        let intena = self.mycpu().intena.load(Ordering::Relaxed);
        let lock = p.leak();
        Switch::new().await;
        // Possibly a different CPU from here on.
        let p = unsafe { lock.adopt(self) };
        self.mycpu().intena.store(intena, Ordering::Relaxed);
        p
    }
}
