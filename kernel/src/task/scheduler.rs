use log::trace;

use crate::{
    arch::Arch,
    config::{NCONTAINERS, NPROC},
    container::{ContainerId, ContainerState},
    hal::Hal,
    kernel::Kernel,
    sync::SpinLockGuard,
    task::{ProcInner, ProcState, context},
};

impl<H: Hal> Kernel<H> {
    /// Per-CPU process scheduler. Each CPU calls this after setting
    /// itself up; it never returns.
    pub fn scheduler(&self) -> ! {
        self.mycpu().set_current(None);
        H::arm_timer();
        loop {
            // Avoid deadlock by giving devices a chance to interrupt.
            H::intr_on();
            if !self.dispatch_pass() {
                H::wait_for_interrupt();
            }
        }
    }

    /// One scheduling round.
    ///
    /// The first sweep matches every slot against the least-charged
    /// container. If that container has nothing runnable, a second sweep
    /// serves the least-charged started container that does, so an idle
    /// container cannot stall the CPU and busy ones still share it evenly.
    /// Returns whether any process ran.
    pub fn dispatch_pass(&self) -> bool {
        self.sweep() || self.sweep_waiting()
    }

    fn sweep(&self) -> bool {
        let mut ran = false;
        for slot in 0..NPROC {
            let p = self.proc(slot).lock.lock(self);
            let target = p.container.filter(|&c| self.select_container() == c);
            ran |= self.try_run(slot, target, p);
        }
        ran
    }

    /// Sweep restricted to containers with a runnable member. Each slot is
    /// matched against whichever of them is least charged at that moment,
    /// starting after the slot the first pick ran last.
    fn sweep_waiting(&self) -> bool {
        let waiting = self.waiting_containers();
        let Some(first) = self.least_charged(&waiting) else {
            return false;
        };
        let start = self.container(first).last_slot() + 1;
        let mut ran = false;
        for i in 0..NPROC {
            let slot = (start + i) % NPROC;
            let p = self.proc(slot).lock.lock(self);
            let target = p
                .container
                .filter(|&c| self.least_charged(&waiting) == Some(c));
            ran |= self.try_run(slot, target, p);
        }
        ran
    }

    fn try_run<'a>(
        &'a self,
        slot: usize,
        target: Option<ContainerId>,
        mut p: SpinLockGuard<'a, ProcInner>,
    ) -> bool {
        let mut ran = false;
        if let Some(cid) = target
            && p.state == ProcState::Runnable
            && self.container(cid).lock.lock(self).state == ContainerState::Started
        {
            p = self.run(slot, cid, p);
            ran = true;
        }
        // Interrupt state belongs to the kernel thread that just ran,
        // not to this CPU; don't let release() turn interrupts on.
        self.mycpu().clear_intena();
        drop(p);
        ran
    }

    /// Containers that had a runnable member when the table was scanned.
    fn waiting_containers(&self) -> [bool; NCONTAINERS] {
        let mut waiting = [false; NCONTAINERS];
        for slot in 0..NPROC {
            let p = self.proc(slot).lock.lock(self);
            if p.state == ProcState::Runnable
                && let Some(c) = p.container
            {
                waiting[c.index()] = true;
            }
        }
        waiting
    }

    /// The started container in `among` with the fewest tokens; ties keep
    /// the lower slot.
    fn least_charged(&self, among: &[bool; NCONTAINERS]) -> Option<ContainerId> {
        let mut best: Option<(ContainerId, u64)> = None;
        for (i, _) in among.iter().enumerate().filter(|(_, w)| **w) {
            let id = ContainerId(i);
            let c = self.container(id);
            if c.lock.lock(self).state != ContainerState::Started {
                continue;
            }
            let tokens = c.tokens();
            if best.is_none_or(|(_, t)| tokens < t) {
                best = Some((id, tokens));
            }
        }
        best.map(|(id, _)| id)
    }

    /// The started container with the fewest scheduler tokens, ignoring
    /// containers that have never been charged. Defaults to root.
    pub fn select_container(&self) -> ContainerId {
        let mut smallest = ContainerId::ROOT;
        for i in 0..NCONTAINERS {
            let id = ContainerId(i);
            let c = self.container(id);
            if c.lock.lock(self).state != ContainerState::Started {
                continue;
            }
            let tokens = c.tokens();
            if tokens != 0 && self.container(smallest).tokens() > tokens {
                smallest = id;
            }
        }
        smallest
    }

    /// Charge `cid`, switch to the process in `slot` and account for the
    /// ticks it ran once it switches back.
    fn run<'a>(
        &'a self,
        slot: usize,
        cid: ContainerId,
        mut p: SpinLockGuard<'a, ProcInner>,
    ) -> SpinLockGuard<'a, ProcInner> {
        let c = self.container(cid);
        c.add_tokens(1);
        p.state = ProcState::Running;
        self.mycpu().set_current(Some(slot));
        let start = self.ticks();

        let mut p = self.switch_to(p);

        self.mycpu().set_current(None);
        c.add_tokens(self.ticks().wrapping_sub(start));
        c.lock.lock(self).last_pid = p.pid;
        c.set_last_slot(slot);
        if p.state == ProcState::Zombie {
            // The thread finished in exit(); nothing left to resume.
            p.task = None;
        }
        trace!("ran pid {} ({}), now {}", p.pid, slot, p.state);
        p
    }

    /// Resume the kernel thread owning `p` until it calls `sched()`. The
    /// process lock travels with the switch in both directions.
    fn switch_to<'a>(
        &'a self,
        mut p: SpinLockGuard<'a, ProcInner>,
    ) -> SpinLockGuard<'a, ProcInner> {
        let Some(mut task) = p.task.take() else {
            panic!("scheduler: pid {} has no kernel thread", p.pid);
        };
        let lock = p.leak();
        let finished = context::resume(&mut task);
        if finished {
            panic!("scheduler: kernel thread returned");
        }
        // sched() handed the lock back.
        let mut p = unsafe { lock.adopt(self) };
        p.task = Some(task);
        p
    }
}
