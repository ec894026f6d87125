use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use log::info;

use crate::{
    config::{KernelConfig, NCONTAINERS, NCPU, NPROC},
    console,
    container::{Container, ContainerId, ContainerInner},
    hal::Hal,
    logging,
    sync::{CpuLocal, SpinLock, SpinLockGuard},
    task::{NO_SLOT, PidAllocator, Proc, Processor},
};

/// The process and container tables plus the per-CPU records.
///
/// One instance lives for the whole run; operations that create kernel
/// threads take `&'static self`.
pub struct Kernel<H: Hal> {
    pub hal: H,
    pub config: KernelConfig,
    pub(crate) procs: [Proc<H>; NPROC],
    pub(crate) containers: [Container<H>; NCONTAINERS],
    pub(crate) cpus: [Processor; NCPU],
    pub(crate) pids: PidAllocator,
    /// Serializes tick updates against tick sleepers.
    pub(crate) tickslock: SpinLock<()>,
    pub(crate) ticks: AtomicU64,
    pub(crate) initproc: AtomicUsize,
    pub(crate) fs_ready: AtomicBool,
}

/// Who is asking, for the cross-container visibility rule.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Viewer {
    container: Option<ContainerId>,
    root_access: bool,
}

impl Viewer {
    /// Members see their own container; root-access containers and kernel
    /// context (no current process) see everything.
    pub(crate) fn can_see(&self, target: Option<ContainerId>) -> bool {
        match self.container {
            None => true,
            Some(_) if self.root_access => true,
            Some(c) => target == Some(c),
        }
    }

    pub(crate) fn root_access(&self) -> bool {
        self.container.is_none() || self.root_access
    }
}

impl<H: Hal> Kernel<H> {
    pub fn new(hal: H, config: KernelConfig) -> Self {
        Self {
            hal,
            config,
            procs: core::array::from_fn(|_| Proc::new()),
            containers: core::array::from_fn(|i| {
                if i == ContainerId::ROOT.index() {
                    Container::new(true, config.root_limits)
                } else {
                    Container::new(false, config.container_limits)
                }
            }),
            cpus: core::array::from_fn(|_| Processor::new()),
            pids: PidAllocator::new(),
            tickslock: SpinLock::new("time", ()),
            ticks: AtomicU64::new(0),
            initproc: AtomicUsize::new(NO_SLOT),
            fs_ready: AtomicBool::new(false),
        }
    }

    /// Install the logger and give the root container its root directory.
    /// Call once before [`Kernel::userinit`].
    pub fn init(&self) {
        if let Some(sink) = H::early_console() {
            console::set_sink(sink);
        }
        logging::init(self.config.log_level, H::cpu_id);
        let root = self.container(ContainerId::ROOT);
        let rootdir = self.hal.namei("/");
        {
            let mut c = root.lock.lock(self);
            c.rootdir = rootdir;
            c.rootpath.set("/");
        }
        root.add_tokens(1);
        info!(
            "kernel up: {} proc slots, {} containers, {} cpus",
            NPROC, NCONTAINERS, NCPU
        );
    }

    pub(crate) fn proc(&self, slot: usize) -> &Proc<H> {
        &self.procs[slot]
    }

    pub(crate) fn container(&self, id: ContainerId) -> &Container<H> {
        &self.containers[id.index()]
    }

    /// Ticks since boot.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Fair-share charge accumulated by a container.
    pub fn container_tokens(&self, id: ContainerId) -> u64 {
        self.container(id).tokens()
    }

    /// Slot of the process running on this CPU, if any.
    pub fn myproc(&self) -> Option<usize> {
        self.push_off();
        let slot = self.mycpu().current();
        self.pop_off();
        slot
    }

    /// Slot of the calling process. Only valid in process context.
    pub(crate) fn current(&self) -> usize {
        match self.myproc() {
            Some(slot) => slot,
            None => panic!("no current process"),
        }
    }

    /// Pid of the calling process.
    pub fn getpid(&self) -> i32 {
        self.proc(self.current()).lock.lock(self).pid
    }

    /// Container of the calling process, `None` outside process context.
    pub fn my_container(&self) -> Option<ContainerId> {
        let slot = self.myproc()?;
        self.proc(slot).lock.lock(self).container
    }

    pub(crate) fn viewer(&self) -> Viewer {
        let container = self.my_container();
        let root_access = match container {
            Some(c) => self.container(c).lock.lock(self).root_access,
            None => true,
        };
        Viewer {
            container,
            root_access,
        }
    }

    /// Lock two distinct containers, lower slot first.
    pub(crate) fn lock_container_pair(
        &self,
        a: ContainerId,
        b: ContainerId,
    ) -> (
        SpinLockGuard<'_, ContainerInner<H>>,
        SpinLockGuard<'_, ContainerInner<H>>,
    ) {
        if a == b {
            panic!("lock_container_pair: same container");
        }
        if a < b {
            let ga = self.container(a).lock.lock(self);
            let gb = self.container(b).lock.lock(self);
            (ga, gb)
        } else {
            let gb = self.container(b).lock.lock(self);
            let ga = self.container(a).lock.lock(self);
            (ga, gb)
        }
    }
}
