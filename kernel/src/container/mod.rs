//! Container table.
//!
//! A container groups processes under one name, root directory and set of
//! quotas. Slot 0 is the root container: always started, exempt from
//! quotas, and allowed to see and signal every process.

mod ops;

use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::{
    config::{CNAME, MAXPATH},
    error::{KResult, KernelError, Quota},
    fs::FileSystem,
    hal::Hal,
    name::FixedName,
    sync::SpinLock,
};

/// Index of a container slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerId(pub(crate) usize);

impl ContainerId {
    pub const ROOT: ContainerId = ContainerId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Free,
    Created,
    Started,
    Paused,
    Stopped,
}

impl ContainerState {
    /// Slots in these states may be claimed by a new container.
    pub fn is_reusable(self) -> bool {
        matches!(
            self,
            ContainerState::Free | ContainerState::Created | ContainerState::Stopped
        )
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Free => "free",
            ContainerState::Created => "created",
            ContainerState::Started => "started",
            ContainerState::Paused => "paused",
            ContainerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Resource quotas of one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub procs: usize,
    pub mem_pages: usize,
    pub disk_blocks: usize,
}

/// Fields guarded by the container lock.
pub struct ContainerInner<H: Hal> {
    pub state: ContainerState,
    pub name: FixedName<CNAME>,
    /// Virtual console the container's first process was attached to.
    pub vc_name: FixedName<CNAME>,
    pub rootpath: FixedName<MAXPATH>,
    pub rootdir: Option<<H as FileSystem>::Inode>,
    pub root_access: bool,
    pub limits: Limits,
    pub proc_count: usize,
    pub mem_usage: usize,
    pub disk_usage: usize,
    /// Listing-only CPU counter; folded from member processes by `cinfo`.
    pub cpu_tokens: u64,
    /// Pid most recently dispatched from this container.
    pub last_pid: i32,
}

impl<H: Hal> ContainerInner<H> {
    /// Fail unless `pages` more pages fit in the memory quota.
    pub fn check_memory(&self, pages: usize) -> KResult<()> {
        if !self.root_access && self.mem_usage + pages > self.limits.mem_pages {
            return Err(KernelError::QuotaExceeded(Quota::Memory));
        }
        Ok(())
    }

    /// Fail unless one more process fits in the process quota.
    pub fn check_process(&self) -> KResult<()> {
        if !self.root_access && self.proc_count + 1 > self.limits.procs {
            return Err(KernelError::QuotaExceeded(Quota::Processes));
        }
        Ok(())
    }

    pub fn check_disk(&self, blocks: usize) -> KResult<()> {
        if !self.root_access && self.disk_usage + blocks > self.limits.disk_blocks {
            return Err(KernelError::QuotaExceeded(Quota::Disk));
        }
        Ok(())
    }

    pub(crate) fn uncharge(&mut self, procs: usize, pages: usize) {
        self.proc_count = self.proc_count.saturating_sub(procs);
        self.mem_usage = self.mem_usage.saturating_sub(pages);
    }
}

/// One slot of the container table.
pub struct Container<H: Hal> {
    pub(crate) lock: SpinLock<ContainerInner<H>>,
    /// Cumulative CPU charge used for fair selection. Read without the
    /// lock by the scheduler.
    scheduler_tokens: AtomicU64,
    /// Process slot this container last ran; where its next sweep starts.
    last_slot: AtomicUsize,
}

impl<H: Hal> Container<H> {
    pub(crate) fn new(root: bool, limits: Limits) -> Self {
        let mut name = FixedName::new();
        if root {
            name.set("root");
        }
        Self {
            lock: SpinLock::new(
                "container",
                ContainerInner {
                    state: if root {
                        ContainerState::Started
                    } else {
                        ContainerState::Free
                    },
                    name,
                    vc_name: FixedName::new(),
                    rootpath: FixedName::new(),
                    rootdir: None,
                    root_access: root,
                    limits,
                    proc_count: 0,
                    mem_usage: 0,
                    disk_usage: 0,
                    cpu_tokens: 0,
                    last_pid: 0,
                },
            ),
            scheduler_tokens: AtomicU64::new(0),
            last_slot: AtomicUsize::new(0),
        }
    }

    pub fn tokens(&self) -> u64 {
        self.scheduler_tokens.load(Ordering::Relaxed)
    }

    pub(crate) fn add_tokens(&self, n: u64) {
        self.scheduler_tokens.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn last_slot(&self) -> usize {
        self.last_slot.load(Ordering::Relaxed)
    }

    pub(crate) fn set_last_slot(&self, slot: usize) {
        self.last_slot.store(slot, Ordering::Relaxed);
    }

    pub(crate) fn reset_tokens(&self) {
        self.scheduler_tokens.store(0, Ordering::Relaxed);
    }
}
