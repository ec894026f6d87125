use alloc::vec::Vec;
use core::convert::Infallible;

use log::{debug, trace};

use crate::{
    config::NPROC,
    error::{KResult, KernelError},
    fs::FileSystem,
    hal::Hal,
    kernel::Kernel,
    memory::{AddressSpace, pages_for},
    sync::SpinLockGuard,
    task::{Channel, ProcFlags, ProcInner, ProcState},
};

impl<H: Hal> Kernel<H> {
    /// Create a new process, copying the caller. Returns the child's pid;
    /// the child sees 0 in `a0`.
    pub fn fork(&'static self) -> KResult<i32> {
        let me = self.current();
        let p = self.proc(me);
        let (cid, mypid) = {
            let g = p.lock.lock(self);
            match g.container {
                Some(c) => (c, g.pid),
                None => panic!("fork: no container"),
            }
        };
        let sz = p.data.lock().sz;
        let pages = pages_for(sz);
        {
            let c = self.container(cid).lock.lock(self);
            c.check_memory(pages)?;
            c.check_process()?;
        }

        let (child, mut np) = self.allocproc(cid)?;

        // Copy user memory from parent to child.
        let copied = {
            let pd = p.data.lock();
            let mut cd = self.proc(child).data.lock();
            let cd = &mut *cd;
            match (pd.pagetable.as_ref(), cd.pagetable.as_mut()) {
                (Some(from), Some(to)) => self.hal.copy(from, to, pd.sz).map(|()| cd.sz = pd.sz),
                _ => panic!("fork: missing page table"),
            }
        };
        if let Err(e) = copied {
            self.freeproc(child, &mut np);
            return Err(e.into());
        }

        // Charge the copy; re-checked since other members may have grown.
        let charged = {
            let mut c = self.container(cid).lock.lock(self);
            c.check_memory(pages).map(|()| c.mem_usage += pages)
        };
        if let Err(e) = charged {
            self.freeproc(child, &mut np);
            return Err(e);
        }

        {
            let pd = p.data.lock();
            let mut cd = self.proc(child).data.lock();
            cd.charged = pages;
            if let (Some(src), Some(dst)) = (pd.trapframe.as_deref(), cd.trapframe.as_deref_mut()) {
                *dst = *src;
                // Cause fork to return 0 in the child.
                dst.a0 = 0;
            }
            // increment reference counts on open file descriptors.
            for (fd, f) in pd.ofile.iter().enumerate() {
                cd.ofile[fd] = f.as_ref().map(|f| self.hal.file_dup(f));
            }
            cd.cwd = pd.cwd.as_ref().map(|ip| self.hal.idup(ip));
            cd.name = pd.name;
        }

        self.proc(child).set_parent(Some(me));
        let pid = np.pid;
        np.state = ProcState::Runnable;
        debug!("fork: pid {} -> child pid {} (slot {})", mypid, pid, child);
        Ok(pid)
    }

    /// Pass the abandoned children of `me` to init. Caller holds `me`'s
    /// lock, so none of them can be reaped or reparented meanwhile.
    fn reparent(&self, me: usize) {
        let Some(init) = self.initproc() else {
            panic!("reparent: no init");
        };
        for slot in 0..NPROC {
            // The parent field is read without the child's lock: only the
            // parent changes it, and the parent is us.
            if self.proc(slot).parent() == Some(me) {
                let _child = self.proc(slot).lock.lock(self);
                self.proc(slot).set_parent(Some(init));
            }
        }
    }

    /// Lock a parent and then its child.
    fn lock_family(
        &self,
        parent: usize,
        child: usize,
    ) -> (SpinLockGuard<'_, ProcInner>, SpinLockGuard<'_, ProcInner>) {
        let pg = self.proc(parent).lock.lock(self);
        let cg = self.proc(child).lock.lock(self);
        (pg, cg)
    }

    /// Exit the current process. Does not return. The process stays a
    /// zombie until its parent calls `wait()`.
    pub async fn exit(&'static self, status: i32) -> Infallible {
        let me = self.current();
        let init = self.initproc();
        if init == Some(me) {
            panic!("init exiting");
        }
        let p = self.proc(me);

        // Close all open files.
        let (files, cwd) = {
            let mut data = p.data.lock();
            let files: Vec<_> = data.ofile.iter_mut().filter_map(Option::take).collect();
            (files, data.cwd.take())
        };
        for f in files {
            self.hal.file_close(f);
        }
        self.hal.begin_op();
        if let Some(cwd) = cwd {
            self.hal.iput(cwd);
        }
        self.hal.end_op();

        // We may re-parent a child to init and cannot take init's lock
        // once we hold any other process lock, so wake it up now whether
        // that is needed or not.
        if let Some(init) = init {
            let mut ig = self.proc(init).lock.lock(self);
            self.wake_waiter(&mut ig, Channel::of(self.proc(init)));
        }

        // Snapshot the parent so the same one is unlocked that was locked,
        // even if it hands us to init meanwhile.
        let original_parent = {
            let _g = p.lock.lock(self);
            p.parent()
        };
        let Some(parent) = original_parent else {
            panic!("exit: no parent");
        };
        let (mut pp, mut g) = self.lock_family(parent, me);

        self.reparent(me);

        // Parent might be sleeping in wait().
        self.wake_waiter(&mut pp, Channel::of(self.proc(parent)));

        g.xstate = status;
        g.state = ProcState::Zombie;
        debug!("exit: pid {} status {}", g.pid, status);

        drop(pp);

        // Jump into the scheduler, never to return.
        let _g = self.sched(g).await;
        panic!("zombie exit");
    }

    /// Wait for a child process to exit. Returns its pid and exit status,
    /// and stores the status as a little-endian `i32` at user address
    /// `addr` when given.
    pub async fn wait(&'static self, addr: Option<usize>) -> KResult<(i32, i32)> {
        let me = self.current();
        let p = self.proc(me);

        // Hold our lock for the whole time to avoid lost wakeups from a
        // child's exit().
        let mut g = p.lock.lock(self);
        loop {
            let mut havekids = false;
            for slot in 0..NPROC {
                let np = self.proc(slot);
                if np.parent() != Some(me) {
                    continue;
                }
                let mut ng = np.lock.lock(self);
                havekids = true;
                if ng.state != ProcState::Zombie {
                    continue;
                }
                let pid = ng.pid;
                let xstate = ng.xstate;
                if let Some(addr) = addr {
                    let mut data = p.data.lock();
                    let copied = match data.pagetable.as_mut() {
                        Some(pt) => self.hal.copy_out(pt, addr, &xstate.to_le_bytes()),
                        None => panic!("wait: no page table"),
                    };
                    copied?;
                }
                self.freeproc(slot, &mut ng);
                return Ok((pid, xstate));
            }

            // No point waiting if we don't have any children.
            if !havekids {
                return Err(KernelError::NoChildren);
            }
            if g.killed() {
                return Err(KernelError::Killed);
            }

            g = self.sleep_locked(g, Channel::of(p)).await;
        }
    }

    /// Kill the process with the given pid. The victim won't exit until
    /// it next heads back toward user mode.
    pub fn kill(&self, pid: i32) -> KResult<()> {
        let viewer = self.viewer();
        for slot in 0..NPROC {
            let mut p = self.proc(slot).lock.lock(self);
            if p.state == ProcState::Unused || p.pid != pid {
                continue;
            }
            if !viewer.can_see(p.container) {
                return Err(KernelError::PermissionDenied);
            }
            // Wakes it from sleep() or suspension too.
            p.mark_killed();
            debug!("kill: pid {}", pid);
            return Ok(());
        }
        Err(KernelError::NoSuchProcess)
    }

    /// Whether the current process has been killed.
    pub fn killed(&self) -> bool {
        self.proc(self.current()).lock.lock(self).killed()
    }

    /// Exit with status -1 if the current process has been killed. Called
    /// on the way back to user mode, where a kill takes effect.
    pub async fn exit_if_killed(&'static self) {
        if self.killed() {
            match self.exit(-1).await {}
        }
    }

    /// Give up the CPU for one scheduling round.
    pub async fn yield_now(&'static self) {
        let mut g = self.proc(self.current()).lock.lock(self);
        g.state = ProcState::Runnable;
        let _g = self.sched(g).await;
    }

    /// Grow or shrink user memory by `n` bytes, charging the container.
    /// Returns the previous size.
    pub fn growproc(&self, n: isize) -> KResult<usize> {
        let me = self.current();
        let p = self.proc(me);
        let cid = match p.lock.lock(self).container {
            Some(c) => c,
            None => panic!("growproc: no container"),
        };
        let old = p.data.lock().sz;

        if n >= 0 {
            let new = old + n as usize;
            let pages = pages_for(new) - pages_for(old);
            {
                let mut c = self.container(cid).lock.lock(self);
                c.check_memory(pages)?;
                c.mem_usage += pages;
            }
            let grown = {
                let mut data = p.data.lock();
                let data = &mut *data;
                let Some(pt) = data.pagetable.as_mut() else {
                    panic!("growproc: no page table");
                };
                self.hal.grow(pt, old, new).map(|sz| {
                    data.sz = sz;
                    data.charged += pages;
                })
            };
            if let Err(e) = grown {
                self.container(cid).lock.lock(self).uncharge(0, pages);
                return Err(e.into());
            }
        } else {
            let new = old.saturating_sub(n.unsigned_abs());
            let pages = pages_for(old) - pages_for(new);
            {
                let mut data = p.data.lock();
                let data = &mut *data;
                let Some(pt) = data.pagetable.as_mut() else {
                    panic!("growproc: no page table");
                };
                data.sz = self.hal.shrink(pt, old, new);
                data.charged = data.charged.saturating_sub(pages);
            }
            self.container(cid).lock.lock(self).uncharge(0, pages);
        }
        trace!("growproc: {} -> {} bytes", old, p.data.lock().sz);
        Ok(old)
    }

    /// Turn system call tracing on or off for the current process.
    pub fn set_tracing(&self, on: bool) {
        let mut g = self.proc(self.current()).lock.lock(self);
        g.flags.set(ProcFlags::TRACED, on);
    }

    pub fn tracing(&self) -> bool {
        self.proc(self.current())
            .lock
            .lock(self)
            .flags
            .contains(ProcFlags::TRACED)
    }

    /// Rename the current process, as a program loader does.
    pub fn set_name(&self, name: &str) {
        self.proc(self.current()).data.lock().name.set(name);
    }
}
