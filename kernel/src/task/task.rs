use alloc::boxed::Box;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use bitflags::bitflags;
use spin::Mutex;

use crate::{
    config::{NOFILE, PROC_NAME_LEN},
    container::ContainerId,
    fs::FileSystem,
    hal::Hal,
    memory::AddressSpace,
    name::FixedName,
    sync::SpinLock,
    task::context::Task,
    trap::TrapFrame,
};

/// Marker for "no slot" in atomically stored slot indices.
pub(crate) const NO_SLOT: usize = usize::MAX;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    Sleeping,
    Runnable,
    Running,
    Zombie,
    Suspended,
}

impl ProcState {
    /// Fixed-width label used by the listings.
    pub fn label(self) -> &'static str {
        match self {
            ProcState::Unused => "unused",
            ProcState::Sleeping => "sleep ",
            ProcState::Runnable => "runble",
            ProcState::Running => "run   ",
            ProcState::Zombie => "zombie",
            ProcState::Suspended => "suspended",
        }
    }
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProcFlags: u32 {
        /// Terminate at the next return toward user mode.
        const KILLED = 1 << 0;
        /// Echo every system call to the console.
        const TRACED = 1 << 1;
    }
}

/// Identity a sleeper waits on. Any kernel object's address will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel(usize);

impl Channel {
    pub fn of<T: ?Sized>(obj: &T) -> Self {
        Channel(obj as *const T as *const () as usize)
    }
}

/// Fields guarded by the process lock.
pub struct ProcInner {
    /// 进程状态
    pub state: ProcState,
    /// 所属容器，state != Unused 时必然存在
    pub container: Option<ContainerId>,
    /// 睡眠等待的通道
    pub chan: Option<Channel>,
    pub flags: ProcFlags,
    /// 退出码，供父进程 wait 取回
    pub xstate: i32,
    pub pid: i32,
    /// Timer ticks observed while running, for the listings.
    pub cpu_tokens: u64,
    /// 内核线程；运行中由调度器暂时取走
    pub(crate) task: Option<Task>,
}

impl ProcInner {
    const fn new() -> Self {
        Self {
            state: ProcState::Unused,
            container: None,
            chan: None,
            flags: ProcFlags::empty(),
            xstate: 0,
            pid: 0,
            cpu_tokens: 0,
            task: None,
        }
    }

    pub fn killed(&self) -> bool {
        self.flags.contains(ProcFlags::KILLED)
    }

    /// Flag the process as killed and make sure it gets to run so it can
    /// notice.
    pub(crate) fn mark_killed(&mut self) {
        self.flags.insert(ProcFlags::KILLED);
        if matches!(self.state, ProcState::Sleeping | ProcState::Suspended) {
            self.state = ProcState::Runnable;
        }
    }
}

/// Fields private to the process itself, or to whoever holds it
/// exclusively (its parent during fork and reaping). The lock is a leaf:
/// nothing else is acquired while it is held.
pub struct ProcData<H: Hal> {
    /// 用户内存大小（字节）
    pub sz: usize,
    /// Pages currently charged to the owning container for this process.
    pub charged: usize,
    pub pagetable: Option<<H as AddressSpace>::PageTable>,
    pub trapframe: Option<Box<TrapFrame>>,
    pub ofile: [Option<<H as FileSystem>::File>; NOFILE],
    pub cwd: Option<<H as FileSystem>::Inode>,
    pub name: FixedName<PROC_NAME_LEN>,
}

impl<H: Hal> ProcData<H> {
    fn new() -> Self {
        Self {
            sz: 0,
            charged: 0,
            pagetable: None,
            trapframe: None,
            ofile: core::array::from_fn(|_| None),
            cwd: None,
            name: FixedName::new(),
        }
    }
}

/// One slot of the process table.
pub struct Proc<H: Hal> {
    pub(crate) lock: SpinLock<ProcInner>,
    /// Parent slot. Written with both the parent's and this process's
    /// locks held, or by the parent alone while reparenting; read by
    /// scans without a lock.
    parent: AtomicUsize,
    pub(crate) data: Mutex<ProcData<H>>,
}

impl<H: Hal> Proc<H> {
    pub(crate) fn new() -> Self {
        Self {
            lock: SpinLock::new("proc", ProcInner::new()),
            parent: AtomicUsize::new(NO_SLOT),
            data: Mutex::new(ProcData::new()),
        }
    }

    pub(crate) fn parent(&self) -> Option<usize> {
        match self.parent.load(Ordering::Acquire) {
            NO_SLOT => None,
            slot => Some(slot),
        }
    }

    pub(crate) fn set_parent(&self, parent: Option<usize>) {
        self.parent.store(parent.unwrap_or(NO_SLOT), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_identity_is_address() {
        let a = 1u32;
        let b = 1u32;
        assert_eq!(Channel::of(&a), Channel::of(&a));
        assert_ne!(Channel::of(&a), Channel::of(&b));
    }

    #[test]
    fn state_labels_are_fixed_width() {
        for s in [
            ProcState::Unused,
            ProcState::Sleeping,
            ProcState::Runnable,
            ProcState::Running,
            ProcState::Zombie,
        ] {
            assert_eq!(s.label().len(), 6);
        }
        assert_eq!(ProcState::Suspended.to_string(), "suspended");
    }
}
