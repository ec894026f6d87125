use crate::{
    config::NPROC,
    hal::Hal,
    kernel::Kernel,
    sync::SpinLockGuard,
    task::{Channel, ProcInner, ProcState},
};

impl<H: Hal> Kernel<H> {
    /// Atomically release `lk` and sleep on `chan`. Reacquires `lk` when
    /// awakened.
    ///
    /// `lk` must not be the caller's own process lock; use
    /// [`Kernel::sleep_locked`] for that.
    pub async fn sleep<'a, T: Send>(
        &'a self,
        chan: Channel,
        lk: SpinLockGuard<'a, T>,
    ) -> SpinLockGuard<'a, T> {
        let p = self.proc(self.current());

        // Once we hold p->lock we can't miss any wakeup (wakeup locks
        // p->lock), so it's okay to release lk.
        let mut g = p.lock.lock(self);
        let lk = {
            let lock = lk.lock_ref();
            drop(lk);
            lock
        };

        g.chan = Some(chan);
        g.state = ProcState::Sleeping;
        let mut g = self.sched(g).await;

        // Tidy up.
        g.chan = None;
        drop(g);

        lk.lock(self)
    }

    /// Sleep on `chan` when the lock to release is the caller's own
    /// process lock.
    pub(crate) async fn sleep_locked<'a>(
        &'a self,
        mut g: SpinLockGuard<'a, ProcInner>,
        chan: Channel,
    ) -> SpinLockGuard<'a, ProcInner> {
        g.chan = Some(chan);
        g.state = ProcState::Sleeping;
        let mut g = self.sched(g).await;
        g.chan = None;
        g
    }

    /// Wake up all processes sleeping on `chan`. Must be called without
    /// any process lock held.
    pub fn wakeup(&self, chan: Channel) {
        for slot in 0..NPROC {
            let mut p = self.proc(slot).lock.lock(self);
            self.wake_waiter(&mut p, chan);
        }
    }

    /// Wake `p` if it is sleeping on `chan`. For callers that already
    /// hold the process's lock, such as exit() notifying its parent.
    pub(crate) fn wake_waiter(&self, p: &mut SpinLockGuard<'_, ProcInner>, chan: Channel) {
        if !p.lock_ref().holding(self) {
            panic!("wakeup1");
        }
        if p.state == ProcState::Sleeping && p.chan == Some(chan) {
            p.state = ProcState::Runnable;
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use crate::{
        task::Channel,
        testutil::{boot, fork_into, program, run_until, state_of},
    };

    #[test]
    fn wakeup_reaches_a_sleeper_and_is_not_remembered() {
        let k = boot(vec![
            program(|k| async move {
                let chan = Channel::of(&k.hal.cond);
                let waiter = fork_into(k, 2).unwrap();
                // Nobody is asleep yet: this wakeup is lost on purpose.
                k.wakeup(chan);
                for _ in 0..3 {
                    k.yield_now().await;
                }
                k.hal.record(format!("before {:?}", state_of(k, waiter)));
                *k.hal.cond.lock(k) = 1;
                k.wakeup(chan);
                k.wait(None).await.unwrap();
                k.hal.record("done");
                0
            }),
            program(|k| async move {
                let mut g = k.hal.cond.lock(k);
                while *g == 0 {
                    g = k.sleep(Channel::of(&k.hal.cond), g).await;
                }
                drop(g);
                k.hal.record("woke");
                0
            }),
        ]);
        assert!(run_until(k, 100, || k.hal.saw("done")));
        assert_eq!(
            k.hal.events(),
            ["before Some(Sleeping)", "woke", "done"].map(String::from)
        );
        assert_eq!(state_of(k, 3), None);
        assert!(!k.hal.cond.is_locked());
    }

    #[test]
    fn wakeup_only_touches_its_channel() {
        let k = boot(vec![
            program(|k| async move {
                let other = 0u8;
                let waiter = fork_into(k, 2).unwrap();
                k.yield_now().await;
                k.wakeup(Channel::of(&other));
                k.hal.record(format!("{:?}", state_of(k, waiter)));
                k.kill(waiter).unwrap();
                k.wait(None).await.unwrap();
                0
            }),
            program(|k| async move {
                let mut g = k.hal.cond.lock(k);
                while *g == 0 && !k.killed() {
                    g = k.sleep(Channel::of(&k.hal.cond), g).await;
                }
                drop(g);
                k.exit_if_killed().await;
                0
            }),
        ]);
        assert!(run_until(k, 100, || k.hal.saw("reaped 2 status 0")));
        assert!(k.hal.saw("Some(Sleeping)"));
    }
}
