use super::status;
use crate::{hal::Hal, kernel::Kernel};

impl<H: Hal> Kernel<H> {
    /// Print the processes the caller may see.
    pub async fn sys_psinfo(&'static self) -> isize {
        self.strace(format_args!("sys_psinfo()"));
        println!("PID\tMEM\tNAME\tSTATE\tCONTAINER");
        for p in self.ps() {
            println!("{}", p);
        }
        self.ret(1).await
    }

    pub async fn sys_cinfo(&'static self) -> isize {
        let info = self.cinfo();
        println!("{}", info);
        self.ret(1).await
    }

    pub async fn sys_cpause(&'static self, name: &str) -> isize {
        let r = status(self.cpause(name));
        self.ret(r).await
    }

    pub async fn sys_cresume(&'static self, name: &str) -> isize {
        let r = status(self.cresume(name));
        self.ret(r).await
    }

    /// Start container `cname` with the caller as its first process.
    /// A negative `vcfd` leaves the standard descriptors alone.
    pub async fn sys_cstart(
        &'static self,
        vcfd: isize,
        vc_name: &str,
        cname: &str,
        rootpath: &str,
        program: &str,
    ) -> isize {
        let console = usize::try_from(vcfd).ok();
        let r = match self.cstart(console, vc_name, cname, rootpath, program) {
            Ok(_) => 1,
            Err(e) => {
                println!("cstart {}: {}", cname, e);
                -1
            }
        };
        self.ret(r).await
    }

    pub async fn sys_cstop(&'static self, name: &str) -> isize {
        let r = status(self.cstop(name).await);
        self.ret(r).await
    }

    pub async fn sys_root_access(&'static self) -> isize {
        let r = self.root_access() as isize;
        self.ret(r).await
    }

    pub async fn sys_freememory(&'static self) -> isize {
        println!("{}", self.freememory());
        self.ret(1).await
    }

    /// Checkpoint process `pid` into the file open at `fd`.
    pub async fn sys_suspend(&'static self, pid: i32, fd: usize) -> isize {
        self.strace(format_args!("sys_suspend({}, {})", pid, fd));
        let r = status(self.suspend(pid, fd));
        self.ret(r).await
    }

    /// Replace the caller with the image at `path`. On success the
    /// restored `a0` is handed back so the image resumes untouched.
    pub async fn sys_resume(&'static self, path: &str) -> isize {
        self.strace(format_args!("sys_resume({})", path));
        let r = match self.resume(path) {
            Ok(()) => {
                let data = self.proc(self.current()).data.lock();
                data.trapframe.as_deref().map_or(0, |tf| tf.a0 as isize)
            }
            Err(_) => -1,
        };
        self.ret(r).await
    }
}
