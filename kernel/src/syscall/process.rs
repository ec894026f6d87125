use log::debug;

use crate::{hal::Hal, kernel::Kernel};

impl<H: Hal> Kernel<H> {
    pub async fn sys_exit(&'static self, n: i32) -> isize {
        self.strace(format_args!("sys_exit({})", n));
        match self.exit(n).await {}
    }

    pub async fn sys_getpid(&'static self) -> isize {
        self.strace(format_args!("sys_getpid(void)"));
        let pid = self.getpid();
        self.ret(pid as isize).await
    }

    pub async fn sys_fork(&'static self) -> isize {
        self.strace(format_args!("sys_fork(void)"));
        let pid = match self.fork() {
            Ok(pid) => pid as isize,
            Err(e) => {
                debug!("sys_fork: {}", e);
                -1
            }
        };
        self.ret(pid).await
    }

    /// Reap a child; its status is stored at `addr` unless that is 0.
    pub async fn sys_wait(&'static self, addr: usize) -> isize {
        self.strace(format_args!("sys_wait({:#x})", addr));
        let addr = (addr != 0).then_some(addr);
        let pid = match self.wait(addr).await {
            Ok((pid, _)) => pid as isize,
            Err(_) => -1,
        };
        self.ret(pid).await
    }

    /// Grow memory by `n` bytes; returns the old break.
    pub async fn sys_sbrk(&'static self, n: isize) -> isize {
        self.strace(format_args!("sys_sbrk({})", n));
        let old = match self.growproc(n) {
            Ok(old) => old as isize,
            Err(e) => {
                debug!("sys_sbrk: {}", e);
                -1
            }
        };
        self.ret(old).await
    }

    pub async fn sys_sleep(&'static self, n: i64) -> isize {
        self.strace(format_args!("sys_sleep({})", n));
        let r = match self.sleep_ticks(n.max(0) as u64).await {
            Ok(()) => 0,
            Err(_) => -1,
        };
        self.ret(r).await
    }

    pub async fn sys_kill(&'static self, pid: i32) -> isize {
        self.strace(format_args!("sys_kill({})", pid));
        let r = match self.kill(pid) {
            Ok(()) => 0,
            Err(_) => -1,
        };
        self.ret(r).await
    }

    /// How many clock tick interrupts have occurred since start.
    pub async fn sys_uptime(&'static self) -> isize {
        self.strace(format_args!("sys_uptime(void)"));
        let t = self.uptime();
        self.ret(t as isize).await
    }

    pub async fn sys_ticks(&'static self) -> isize {
        let t = self.uptime();
        self.ret(t as isize).await
    }

    pub async fn sys_close(&'static self, fd: usize) -> isize {
        self.strace(format_args!("sys_close({})", fd));
        let r = match self.fd_close(fd) {
            Ok(()) => 0,
            Err(_) => -1,
        };
        self.ret(r).await
    }

    pub async fn sys_strace_on(&'static self) -> isize {
        self.set_tracing(true);
        self.ret(0).await
    }

    pub async fn sys_strace_off(&'static self) -> isize {
        self.set_tracing(false);
        self.ret(0).await
    }
}
