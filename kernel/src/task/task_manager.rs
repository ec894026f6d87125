use alloc::boxed::Box;
use core::sync::atomic::Ordering;

use log::{debug, info};

use crate::{
    config::{NPROC, PROC_OVERHEAD_PAGES},
    container::ContainerId,
    error::{KResult, KernelError},
    hal::Hal,
    kernel::Kernel,
    memory::{AddressSpace, PAGE_SIZE, pages_for},
    fs::FileSystem,
    sync::SpinLockGuard,
    task::{NO_SLOT, ProcFlags, ProcInner, ProcState},
    trap::TrapFrame,
};

impl<H: Hal> Kernel<H> {
    /// Look in the process table for an unused slot and set it up to run
    /// in the kernel, charged to `container`.
    ///
    /// Returns with the slot's lock held and its state still `Unused`, so
    /// the scheduler cannot see it until the caller finishes.
    pub(crate) fn allocproc(
        &'static self,
        container: ContainerId,
    ) -> KResult<(usize, SpinLockGuard<'static, ProcInner>)> {
        for slot in 0..NPROC {
            let mut p = self.proc(slot).lock.lock(self);
            if p.state != ProcState::Unused {
                continue;
            }

            {
                let mut c = self.container(container).lock.lock(self);
                c.check_memory(PROC_OVERHEAD_PAGES)?;
                c.check_process()?;
                c.proc_count += 1;
            }

            p.pid = self.pids.alloc();
            let trapframe = Box::new(TrapFrame::default());
            let pagetable = match self.proc_pagetable(&trapframe) {
                Ok(pt) => pt,
                Err(e) => {
                    self.container(container).lock.lock(self).uncharge(1, 0);
                    p.pid = 0;
                    return Err(e);
                }
            };
            {
                let mut data = self.proc(slot).data.lock();
                data.sz = 0;
                data.charged = 0;
                data.pagetable = Some(pagetable);
                data.trapframe = Some(trapframe);
            }

            p.container = Some(container);
            p.flags = ProcFlags::empty();
            p.chan = None;
            p.xstate = 0;
            p.cpu_tokens = 0;
            p.task = Some(Box::pin(self.process_main(slot)));
            return Ok((slot, p));
        }
        Err(KernelError::NoFreeProc)
    }

    /// An empty user page table with the trampoline and `tf` mapped.
    pub(crate) fn proc_pagetable(&self, tf: &TrapFrame) -> KResult<H::PageTable> {
        let mut pt = self.hal.create()?;
        if let Err(e) = self.hal.map_trapframe(&mut pt, tf) {
            self.hal.free(pt, 0);
            return Err(e.into());
        }
        Ok(pt)
    }

    /// Free a process slot and the data hanging from it, including user
    /// pages, and return its charge to its container. The slot's lock
    /// must be held; open files and the working directory must already
    /// have been released.
    pub(crate) fn freeproc(&self, slot: usize, p: &mut SpinLockGuard<'_, ProcInner>) {
        let proc = self.proc(slot);
        let (pagetable, sz, charged, trapframe) = {
            let mut data = proc.data.lock();
            let out = (
                data.pagetable.take(),
                data.sz,
                data.charged,
                data.trapframe.take(),
            );
            data.sz = 0;
            data.charged = 0;
            data.name.clear();
            out
        };

        if let Some(cid) = p.container.take() {
            self.container(cid).lock.lock(self).uncharge(1, charged);
        }
        if let Some(pt) = pagetable {
            self.hal.free(pt, sz);
        }
        drop(trapframe);

        proc.set_parent(None);
        p.pid = 0;
        p.chan = None;
        p.flags = ProcFlags::empty();
        p.xstate = 0;
        p.cpu_tokens = 0;
        p.task = None;
        p.state = ProcState::Unused;
    }

    /// Set up the first user process in the root container.
    pub fn userinit(&'static self) -> KResult<()> {
        let cwd = self.hal.namei("/").ok_or(KernelError::NoSuchPath)?;
        let (slot, mut p) = match self.allocproc(ContainerId::ROOT) {
            Ok(found) => found,
            Err(e) => {
                self.hal.iput(cwd);
                return Err(e);
            }
        };
        self.initproc.store(slot, Ordering::Release);

        // One zeroed page for the program; the loader behind
        // `enter_user` decides what runs at address 0.
        let grown = {
            let mut data = self.proc(slot).data.lock();
            let data = &mut *data;
            match data.pagetable.as_mut() {
                Some(pt) => self.hal.grow(pt, 0, PAGE_SIZE),
                None => panic!("userinit: no page table"),
            }
        };
        if let Err(e) = grown {
            self.freeproc(slot, &mut p);
            drop(p);
            self.hal.iput(cwd);
            self.initproc.store(NO_SLOT, Ordering::Release);
            return Err(e.into());
        }
        self.container(ContainerId::ROOT)
            .lock
            .lock(self)
            .mem_usage += pages_for(PAGE_SIZE);

        {
            let mut data = self.proc(slot).data.lock();
            data.sz = PAGE_SIZE;
            data.charged = pages_for(PAGE_SIZE);
            if let Some(tf) = data.trapframe.as_deref_mut() {
                // prepare for the very first "return" from kernel to user.
                tf.epc = 0;
                tf.sp = PAGE_SIZE as u64;
            }
            data.name.set("initcode");
            data.cwd = Some(cwd);
        }

        p.state = ProcState::Runnable;
        info!("userinit: pid {} in slot {}", p.pid, slot);
        Ok(())
    }

    /// Slot of the init process.
    pub(crate) fn initproc(&self) -> Option<usize> {
        match self.initproc.load(Ordering::Acquire) {
            NO_SLOT => None,
            slot => Some(slot),
        }
    }

    /// Body of every kernel thread.
    async fn process_main(&'static self, slot: usize) {
        self.forkret(slot);
        let status = self.hal.enter_user(self).await;
        match self.exit(status).await {}
    }

    /// A new process's very first scheduling lands here. The scheduler
    /// handed over the process lock, which is released first.
    fn forkret(&self, slot: usize) {
        drop(unsafe { self.proc(slot).lock.adopt(self) });

        // File system initialization must be run in the context of a
        // regular process because it may sleep.
        if !self.fs_ready.swap(true, Ordering::AcqRel) {
            debug!("forkret: initializing file system");
            self.hal.init();
        }
    }

    /// Slot of the live process with this pid.
    pub(crate) fn slot_of(&self, pid: i32) -> Option<usize> {
        (0..NPROC).find(|&slot| {
            let p = self.proc(slot).lock.lock(self);
            p.state != ProcState::Unused && p.pid == pid
        })
    }
}
