use alloc::vec::Vec;

use log::{debug, info, warn};

use crate::{
    config::{CSTART_PAGES, NCONTAINERS, NPROC},
    container::{ContainerId, ContainerState, Limits},
    error::{KResult, KernelError},
    fs::FileSystem,
    hal::Hal,
    kernel::Kernel,
    task::ProcState,
};

impl<H: Hal> Kernel<H> {
    /// Reserve the first reusable container slot, skipping root. The slot
    /// comes back Started with zeroed usage and a fresh token count.
    pub fn create_container(&self) -> KResult<ContainerId> {
        for i in 1..NCONTAINERS {
            let id = ContainerId(i);
            let c = self.container(id);
            let mut g = c.lock.lock(self);
            if !g.state.is_reusable() {
                continue;
            }
            g.state = ContainerState::Started;
            g.limits = self.config.container_limits;
            g.proc_count = 0;
            g.mem_usage = 0;
            g.disk_usage = 0;
            g.cpu_tokens = 0;
            g.last_pid = 0;
            g.root_access = false;
            c.reset_tokens();
            c.set_last_slot(0);
            return Ok(id);
        }
        Err(KernelError::NoFreeContainer)
    }

    /// Container carrying `name`.
    pub fn find_container(&self, name: &str) -> KResult<ContainerId> {
        (0..NCONTAINERS)
            .map(ContainerId)
            .find(|&id| {
                let c = self.container(id).lock.lock(self);
                !c.name.is_empty() && c.name == *name
            })
            .ok_or(KernelError::NoSuchContainer)
    }

    /// Whether the calling process belongs to a root-access container.
    pub fn root_access(&self) -> bool {
        self.viewer().root_access()
    }

    /// Find `name` and check the caller may operate on it.
    fn control(&self, name: &str) -> KResult<ContainerId> {
        let id = self.find_container(name)?;
        if !self.viewer().can_see(Some(id)) {
            return Err(KernelError::PermissionDenied);
        }
        Ok(id)
    }

    /// Make the calling process the first member of a new container named
    /// `cname`, rooted at `rootpath`.
    ///
    /// The caller's process slot and its memory charge (at least
    /// [`CSTART_PAGES`]) move from its current container to the new one,
    /// its working directory becomes the new root and, when
    /// `console_fd` is given, descriptors 0-2 are redirected to that open
    /// file. Nothing changes unless every step succeeds.
    pub fn cstart(
        &self,
        console_fd: Option<usize>,
        vc_name: &str,
        cname: &str,
        rootpath: &str,
        program: &str,
    ) -> KResult<ContainerId> {
        let me = self.current();
        let p = self.proc(me);
        if let Some(fd) = console_fd {
            self.fd_check(fd)?;
        }

        let ip = self.hal.namei(rootpath).ok_or_else(|| {
            warn!("cstart: cannot resolve root path {}", rootpath);
            KernelError::NoSuchPath
        })?;
        let id = match self.create_container() {
            Ok(id) => id,
            Err(e) => {
                warn!("cstart: no free container for {}", cname);
                self.hal.iput(ip);
                return Err(e);
            }
        };
        let rootdir = self.hal.idup(&ip);

        let moved = {
            let mut g = p.lock.lock(self);
            let Some(src) = g.container else {
                panic!("cstart: no container");
            };
            let (mut dst, mut from) = self.lock_container_pair(id, src);
            let mut data = p.data.lock();
            let charge = data.charged.max(CSTART_PAGES);
            match dst.check_process().and_then(|()| dst.check_memory(charge)) {
                Ok(()) => {
                    from.uncharge(1, data.charged);
                    dst.proc_count += 1;
                    dst.mem_usage += charge;
                    data.charged = charge;
                    data.name.set(program);

                    dst.name.set(cname);
                    dst.vc_name.set(vc_name);
                    dst.rootpath.set(rootpath);
                    dst.rootdir = Some(rootdir);
                    g.container = Some(id);
                    Ok(())
                }
                Err(e) => {
                    dst.state = ContainerState::Free;
                    Err((e, rootdir))
                }
            }
        };
        if let Err((e, rootdir)) = moved {
            self.hal.iput(rootdir);
            self.hal.iput(ip);
            return Err(e);
        }
        self.container(id).add_tokens(1);

        // Attach the standard descriptors to the virtual console.
        let mut stale = Vec::new();
        let old_cwd = {
            let mut data = p.data.lock();
            if let Some(fd) = console_fd {
                for std in 0..3 {
                    if std == fd {
                        continue;
                    }
                    let console = data.ofile[fd].as_ref().map(|f| self.hal.file_dup(f));
                    if let Some(old) = core::mem::replace(&mut data.ofile[std], console) {
                        stale.push(old);
                    }
                }
            }
            data.cwd.replace(ip)
        };
        for f in stale {
            self.hal.file_close(f);
        }
        self.hal.begin_op();
        if let Some(cwd) = old_cwd {
            self.hal.iput(cwd);
        }
        self.hal.end_op();

        info!(
            "cstart: container {} ({}) on {} at {} running {}",
            cname,
            id.index(),
            vc_name,
            rootpath,
            program
        );
        Ok(id)
    }

    /// Stop dispatching the members of `name`. They keep their state and
    /// continue where they were on [`Kernel::cresume`].
    pub fn cpause(&self, name: &str) -> KResult<()> {
        let id = self.control(name)?;
        if id == ContainerId::ROOT {
            return Err(KernelError::PermissionDenied);
        }
        let mut c = self.container(id).lock.lock(self);
        if c.state != ContainerState::Started {
            return Err(KernelError::InvalidState);
        }
        c.state = ContainerState::Paused;
        debug!("cpause: {}", name);
        Ok(())
    }

    pub fn cresume(&self, name: &str) -> KResult<()> {
        let id = self.control(name)?;
        let mut c = self.container(id).lock.lock(self);
        if c.state != ContainerState::Paused {
            return Err(KernelError::InvalidState);
        }
        c.state = ContainerState::Started;
        debug!("cresume: {}", name);
        Ok(())
    }

    /// Kill every member of `name`, wait for them to unwind, then release
    /// the container.
    ///
    /// Members that are left as zombies are handed to the root container
    /// for accounting so their parents can still reap them. On return the
    /// container is Stopped with no members and no root directory.
    pub async fn cstop(&'static self, name: &str) -> KResult<()> {
        let id = self.control(name)?;
        if id == ContainerId::ROOT || self.my_container() == Some(id) {
            return Err(KernelError::PermissionDenied);
        }
        {
            let mut c = self.container(id).lock.lock(self);
            match c.state {
                ContainerState::Started => {}
                // Members must run to notice they were killed.
                ContainerState::Paused => c.state = ContainerState::Started,
                _ => return Err(KernelError::InvalidState),
            }
        }

        while self.doom_members(id) > 0 {
            self.yield_now().await;
        }
        self.adopt_zombies(id);

        let rootdir = {
            let mut c = self.container(id).lock.lock(self);
            c.name.clear();
            c.vc_name.clear();
            c.rootpath.clear();
            c.proc_count = 0;
            c.mem_usage = 0;
            c.disk_usage = 0;
            c.cpu_tokens = 0;
            c.state = ContainerState::Stopped;
            c.rootdir.take()
        };
        self.container(id).reset_tokens();
        if let Some(ip) = rootdir {
            self.hal.begin_op();
            self.hal.iput(ip);
            self.hal.end_op();
        }
        info!("cstop: {}", name);
        Ok(())
    }

    /// Mark every live member of `id` killed; returns how many have not
    /// finished exiting yet.
    fn doom_members(&self, id: ContainerId) -> usize {
        let mut live = 0;
        for slot in 0..NPROC {
            let mut p = self.proc(slot).lock.lock(self);
            if p.container != Some(id) || matches!(p.state, ProcState::Unused | ProcState::Zombie) {
                continue;
            }
            p.mark_killed();
            live += 1;
        }
        live
    }

    /// Move the zombies of `id`, together with their charge, to root.
    fn adopt_zombies(&self, id: ContainerId) {
        for slot in 0..NPROC {
            let mut p = self.proc(slot).lock.lock(self);
            if p.container != Some(id) || p.state != ProcState::Zombie {
                continue;
            }
            let charged = self.proc(slot).data.lock().charged;
            let (mut root, mut c) = self.lock_container_pair(ContainerId::ROOT, id);
            c.uncharge(1, charged);
            root.proc_count += 1;
            root.mem_usage += charged;
            p.container = Some(ContainerId::ROOT);
        }
    }

    /// Replace the quotas of `name`. Root access only.
    pub fn set_limits(&self, name: &str, limits: Limits) -> KResult<()> {
        if !self.root_access() {
            return Err(KernelError::PermissionDenied);
        }
        let id = self.find_container(name)?;
        self.container(id).lock.lock(self).limits = limits;
        debug!("set_limits: {} -> {:?}", name, limits);
        Ok(())
    }

    /// Charge `blocks` newly allocated disk blocks to the caller's
    /// container, failing if that would exceed its disk quota.
    pub fn charge_disk(&self, blocks: usize) -> KResult<()> {
        let Some(id) = self.my_container() else {
            return Ok(());
        };
        let mut c = self.container(id).lock.lock(self);
        c.check_disk(blocks)?;
        c.disk_usage += blocks;
        Ok(())
    }

    pub fn release_disk(&self, blocks: usize) {
        if let Some(id) = self.my_container() {
            let mut c = self.container(id).lock.lock(self);
            c.disk_usage = c.disk_usage.saturating_sub(blocks);
        }
    }
}
