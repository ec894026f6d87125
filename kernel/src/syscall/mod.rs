//! System call entry points.
//!
//! Every `sys_*` returns what the user sees in `a0`: -1 on failure. When
//! the caller is traced each call is echoed as ` [pid] sys_name(args)`.
//! A kill takes effect on the way out of any of them.

mod container;
mod process;

use core::fmt;

use log::warn;

use crate::{
    config::{CNAME, MAXPATH},
    error::{KResult, KernelError},
    hal::Hal,
    kernel::Kernel,
    memory::AddressSpace,
    name::FixedName,
};

pub const SYSCALL_FORK: usize = 1;
pub const SYSCALL_EXIT: usize = 2;
pub const SYSCALL_WAIT: usize = 3;
pub const SYSCALL_KILL: usize = 6;
pub const SYSCALL_GETPID: usize = 11;
pub const SYSCALL_SBRK: usize = 12;
pub const SYSCALL_SLEEP: usize = 13;
pub const SYSCALL_UPTIME: usize = 14;
pub const SYSCALL_CLOSE: usize = 21;
pub const SYSCALL_STRACE_ON: usize = 22;
pub const SYSCALL_STRACE_OFF: usize = 23;
pub const SYSCALL_PSINFO: usize = 24;
pub const SYSCALL_CINFO: usize = 25;
pub const SYSCALL_CPAUSE: usize = 26;
pub const SYSCALL_CRESUME: usize = 27;
pub const SYSCALL_CSTART: usize = 28;
pub const SYSCALL_CSTOP: usize = 29;
pub const SYSCALL_ROOT_ACCESS: usize = 30;
pub const SYSCALL_TICKS: usize = 31;
pub const SYSCALL_FREEMEMORY: usize = 32;
pub const SYSCALL_SUSPEND: usize = 33;
pub const SYSCALL_RESUME: usize = 34;

/// 1 on success, -1 on failure: the convention of the container calls.
fn status(r: KResult<()>) -> isize {
    match r {
        Ok(()) => 1,
        Err(_) => -1,
    }
}

impl<H: Hal> Kernel<H> {
    /// Run the system call the current process trapped with: number in
    /// `a7`, arguments in `a0`-`a5`. The result goes back in `a0`.
    pub async fn syscall(&'static self) {
        let (id, args) = {
            let data = self.proc(self.current()).data.lock();
            let Some(tf) = data.trapframe.as_deref() else {
                panic!("syscall: no trapframe");
            };
            (tf.a7 as usize, [tf.a0, tf.a1, tf.a2, tf.a3, tf.a4, tf.a5].map(|a| a as usize))
        };
        let ret = match self.dispatch(id, args).await {
            Ok(ret) => ret,
            Err(e) => {
                warn!("syscall {}: {}", id, e);
                -1
            }
        };
        let mut data = self.proc(self.current()).data.lock();
        if let Some(tf) = data.trapframe.as_deref_mut() {
            tf.a0 = ret as u64;
        }
    }

    async fn dispatch(&'static self, id: usize, args: [usize; 6]) -> KResult<isize> {
        Ok(match id {
            SYSCALL_FORK => self.sys_fork().await,
            SYSCALL_EXIT => self.sys_exit(args[0] as i32).await,
            SYSCALL_WAIT => self.sys_wait(args[0]).await,
            SYSCALL_KILL => self.sys_kill(args[0] as i32).await,
            SYSCALL_GETPID => self.sys_getpid().await,
            SYSCALL_SBRK => self.sys_sbrk(args[0] as isize).await,
            SYSCALL_SLEEP => self.sys_sleep(args[0] as i64).await,
            SYSCALL_UPTIME => self.sys_uptime().await,
            SYSCALL_CLOSE => self.sys_close(args[0]).await,
            SYSCALL_STRACE_ON => self.sys_strace_on().await,
            SYSCALL_STRACE_OFF => self.sys_strace_off().await,
            SYSCALL_PSINFO => self.sys_psinfo().await,
            SYSCALL_CINFO => self.sys_cinfo().await,
            SYSCALL_CPAUSE => {
                let name = self.fetch_str::<CNAME>(args[0])?;
                self.sys_cpause(name.as_str()).await
            }
            SYSCALL_CRESUME => {
                let name = self.fetch_str::<CNAME>(args[0])?;
                self.sys_cresume(name.as_str()).await
            }
            SYSCALL_CSTART => {
                let vc_name = self.fetch_str::<CNAME>(args[1])?;
                let cname = self.fetch_str::<CNAME>(args[2])?;
                let rootpath = self.fetch_str::<MAXPATH>(args[3])?;
                let program = self.fetch_str::<MAXPATH>(args[4])?;
                self.sys_cstart(
                    args[0] as isize,
                    vc_name.as_str(),
                    cname.as_str(),
                    rootpath.as_str(),
                    program.as_str(),
                )
                .await
            }
            SYSCALL_CSTOP => {
                let name = self.fetch_str::<CNAME>(args[0])?;
                self.sys_cstop(name.as_str()).await
            }
            SYSCALL_ROOT_ACCESS => self.sys_root_access().await,
            SYSCALL_TICKS => self.sys_ticks().await,
            SYSCALL_FREEMEMORY => self.sys_freememory().await,
            SYSCALL_SUSPEND => self.sys_suspend(args[0] as i32, args[1]).await,
            SYSCALL_RESUME => {
                let path = self.fetch_str::<MAXPATH>(args[0])?;
                self.sys_resume(path.as_str()).await
            }
            _ => {
                warn!("pid {}: unknown sys call {}", self.getpid(), id);
                self.ret(-1).await
            }
        })
    }

    /// Copy a NUL-terminated string of at most `N - 1` bytes from the
    /// current process's memory.
    fn fetch_str<const N: usize>(&self, addr: usize) -> KResult<FixedName<N>> {
        let data = self.proc(self.current()).data.lock();
        let Some(pt) = data.pagetable.as_ref() else {
            panic!("fetch_str: no page table");
        };
        let mut buf = [0u8; N];
        for (i, b) in buf.iter_mut().enumerate() {
            let mut byte = [0u8; 1];
            self.hal
                .copy_in(pt, &mut byte, addr + i)
                .map_err(|_| KernelError::BadArgument)?;
            if byte[0] == 0 {
                return Ok(FixedName::from_padded(&buf));
            }
            *b = byte[0];
        }
        Err(KernelError::BadArgument)
    }

    /// Echo a call of a traced process.
    fn strace(&self, call: fmt::Arguments) {
        if self.tracing() {
            println!(" [{}] {}", self.getpid(), call);
        }
    }

    /// Leave the kernel with `value`, or exit here if killed meanwhile.
    async fn ret(&'static self, value: isize) -> isize {
        self.exit_if_killed().await;
        value
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::testutil::{MockHal, boot, poke, program, run_until, with_trapframe};

    async fn call(k: &'static Kernel<MockHal>, id: usize, args: [u64; 3]) -> i64 {
        with_trapframe(k, |tf| {
            tf.a7 = id as u64;
            tf.a0 = args[0];
            tf.a1 = args[1];
            tf.a2 = args[2];
        });
        k.syscall().await;
        with_trapframe(k, |tf| tf.a0 as i64)
    }

    #[test]
    fn calls_read_arguments_from_the_trapframe() {
        let k = boot(vec![program(|k| async move {
            poke(k, 100, b"vc0\0");
            poke(k, 200, b"box\0");
            poke(k, 300, b"/c1\0");
            poke(k, 400, b"sh\0");
            poke(k, 4090, b"abcdef");

            let pid = call(k, SYSCALL_GETPID, [0; 3]).await;
            let before = call(k, SYSCALL_ROOT_ACCESS, [0; 3]).await;
            with_trapframe(k, |tf| {
                tf.a3 = 300;
                tf.a4 = 400;
            });
            let started = call(k, SYSCALL_CSTART, [-1i64 as u64, 100, 200]).await;
            let after = call(k, SYSCALL_ROOT_ACCESS, [0; 3]).await;
            let unterminated = call(k, SYSCALL_CPAUSE, [4090, 0, 0]).await;
            let unknown = call(k, 99, [0; 3]).await;
            let no_child = call(k, SYSCALL_WAIT, [0; 3]).await;
            k.hal.record(format!(
                "{} {} {} {} {} {} {}",
                pid, before, started, after, unterminated, unknown, no_child
            ));
            0
        })]);
        assert!(run_until(k, 50, || k.hal.saw("2 1 1 0 -1 -1 -1")), "{:?}", k.hal.events());
    }

    #[test]
    fn killed_caller_exits_on_the_way_out() {
        let k = boot(vec![program(|k| async move {
            let me = k.getpid();
            k.kill(me).unwrap();
            call(k, SYSCALL_GETPID, [0; 3]).await;
            k.hal.record("returned");
            0
        })]);
        assert!(run_until(k, 50, || k.hal.saw("reaped 2 status -1")));
        assert!(!k.hal.saw("returned"));
    }
}
