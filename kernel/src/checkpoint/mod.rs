//! Process checkpoint and restore.
//!
//! An image is `[ResumeHeader][TrapFrame][code + data][stack page]`. The
//! user memory it describes is laid out as code and data from address 0,
//! then a guard page, then one stack page.

mod header;

pub use header::ResumeHeader;

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, info, warn};

use crate::{
    config::NPROC,
    error::{KResult, KernelError},
    fs::{FileSystem, FileSystemError},
    hal::Hal,
    kernel::{Kernel, Viewer},
    memory::{AddressSpace, PAGE_SIZE, page_round_up, pages_for},
    task::{Proc, ProcFlags, ProcState},
    trap::TrapFrame,
};

/// Everything read out of a suspended process.
struct Image {
    header: ResumeHeader,
    trapframe: TrapFrame,
    code: Vec<u8>,
    stack: Vec<u8>,
}

impl<H: Hal> Kernel<H> {
    /// Checkpoint process `pid` into the file open at descriptor `fd`.
    ///
    /// The target must be visible to the caller and neither running nor
    /// exiting. It is left Suspended and still allocated; killing it is up
    /// to the caller. If the image cannot be taken it goes back to
    /// Runnable.
    pub fn suspend(&self, pid: i32, fd: usize) -> KResult<()> {
        let f = self.fd_dup(fd)?;
        let viewer = self.viewer();
        let result = self.mark_suspended(pid, viewer).and_then(|slot| {
            let written = self.snapshot(slot).and_then(|image| {
                self.hal.begin_op();
                let r = self.write_image(&f, &image);
                self.hal.end_op();
                r.map(|()| image.header.memory_size)
            });
            match written {
                Ok(size) => {
                    info!("suspend: pid {} checkpointed, {} bytes of memory", pid, size);
                    Ok(())
                }
                Err(e) => {
                    warn!("suspend: pid {} failed: {}", pid, e);
                    self.unsuspend(slot);
                    Err(e)
                }
            }
        });
        self.hal.file_close(f);
        result
    }

    fn mark_suspended(&self, pid: i32, viewer: Viewer) -> KResult<usize> {
        for slot in 0..NPROC {
            let mut p = self.proc(slot).lock.lock(self);
            if p.state == ProcState::Unused || p.pid != pid {
                continue;
            }
            if !viewer.can_see(p.container) {
                return Err(KernelError::PermissionDenied);
            }
            if matches!(p.state, ProcState::Running | ProcState::Zombie) {
                return Err(KernelError::InvalidState);
            }
            p.state = ProcState::Suspended;
            debug!("suspend: pid {} suspended", pid);
            return Ok(slot);
        }
        Err(KernelError::NoSuchProcess)
    }

    /// A sleeper put back this way just sees a spurious wakeup.
    fn unsuspend(&self, slot: usize) {
        let mut p = self.proc(slot).lock.lock(self);
        if p.state == ProcState::Suspended {
            p.state = ProcState::Runnable;
        }
    }

    fn snapshot(&self, slot: usize) -> KResult<Image> {
        let proc = self.proc(slot);
        let tracing = proc.lock.lock(self).flags.contains(ProcFlags::TRACED);

        let data = proc.data.lock();
        let Some(code_len) = data.sz.checked_sub(2 * PAGE_SIZE) else {
            return Err(KernelError::BadImage);
        };
        let (Some(pt), Some(tf)) = (data.pagetable.as_ref(), data.trapframe.as_deref()) else {
            panic!("suspend: pid without address space");
        };
        let mut code = vec![0u8; code_len];
        self.hal.copy_in(pt, &mut code, 0)?;
        let mut stack = vec![0u8; PAGE_SIZE];
        self.hal.copy_in(pt, &mut stack, code_len + PAGE_SIZE)?;

        let as_i32 = |n: usize| i32::try_from(n).map_err(|_| KernelError::BadImage);
        Ok(Image {
            header: ResumeHeader {
                memory_size: as_i32(data.sz)?,
                code_size: as_i32(code_len)?,
                stack_size: as_i32(PAGE_SIZE)?,
                tracing: tracing as i32,
                name: data.name,
            },
            trapframe: *tf,
            code,
            stack,
        })
    }

    fn write_image(&self, f: &<H as FileSystem>::File, image: &Image) -> KResult<()> {
        self.write_all(f, &image.header.to_bytes())?;
        self.write_all(f, &image.trapframe.to_bytes())?;
        self.write_all(f, &image.code)?;
        self.write_all(f, &image.stack)
    }

    fn write_all(&self, f: &<H as FileSystem>::File, bytes: &[u8]) -> KResult<()> {
        match self.hal.file_write(f, bytes)? {
            n if n == bytes.len() => Ok(()),
            _ => Err(FileSystemError::NoSpace.into()),
        }
    }

    /// Replace the calling process's image with the checkpoint at `path`.
    ///
    /// The new address space is built completely before anything of the
    /// caller changes; on failure it is freed and the caller is left as it
    /// was. On success the caller continues from the saved registers.
    pub fn resume(&self, path: &str) -> KResult<()> {
        let p = self.proc(self.current());

        self.hal.begin_op();
        let Some(ip) = self.hal.namei(path) else {
            self.hal.end_op();
            return Err(KernelError::NoSuchPath);
        };
        let loaded = self.load_image(p, &ip);
        self.hal.iput(ip);
        self.hal.end_op();
        let (header, trapframe, pagetable, sz) = loaded?;

        let pages = pages_for(sz);
        let mut g = p.lock.lock(self);
        let Some(cid) = g.container else {
            panic!("resume: no container");
        };
        let mut c = self.container(cid).lock.lock(self);
        let mut data = p.data.lock();
        if let Err(e) = c.check_memory(pages.saturating_sub(data.charged)) {
            drop(data);
            drop(c);
            drop(g);
            self.hal.free(pagetable, sz);
            return Err(e);
        }

        // Commit to the new image.
        c.uncharge(0, data.charged);
        c.mem_usage += pages;
        data.charged = pages;
        g.flags.set(ProcFlags::TRACED, header.tracing != 0);
        data.name = header.name;
        let old_sz = core::mem::replace(&mut data.sz, header.memory_size as usize);
        let old = data.pagetable.replace(pagetable);
        if let Some(tf) = data.trapframe.as_deref_mut() {
            *tf = trapframe;
        }
        let name = data.name;
        drop(data);
        drop(c);
        drop(g);

        if let Some(old) = old {
            self.hal.free(old, old_sz);
        }
        info!("resume: {} restored from {}, {} bytes", name, path, sz);
        Ok(())
    }

    /// Read the header and registers and build a fresh address space
    /// holding the saved memory. Returns the new table and its size.
    fn load_image(
        &self,
        p: &Proc<H>,
        ip: &<H as FileSystem>::Inode,
    ) -> KResult<(ResumeHeader, TrapFrame, <H as AddressSpace>::PageTable, usize)> {
        let mut raw = [0u8; ResumeHeader::SIZE];
        self.read_exact(ip, 0, &mut raw)?;
        let header = ResumeHeader::from_bytes(&raw)?;
        let mut raw = [0u8; TrapFrame::SIZE];
        self.read_exact(ip, ResumeHeader::SIZE, &mut raw)?;
        let trapframe = TrapFrame::from_bytes(&raw).ok_or(KernelError::BadImage)?;

        let mut pagetable = {
            let data = p.data.lock();
            let Some(tf) = data.trapframe.as_deref() else {
                panic!("resume: no trapframe");
            };
            self.proc_pagetable(tf)?
        };
        let mut sz = 0;
        let off = ResumeHeader::SIZE + TrapFrame::SIZE;
        match self.fill_image(&mut pagetable, &mut sz, ip, &header, off) {
            Ok(()) => Ok((header, trapframe, pagetable, sz)),
            Err(e) => {
                self.hal.free(pagetable, sz);
                Err(e)
            }
        }
    }

    fn fill_image(
        &self,
        pt: &mut <H as AddressSpace>::PageTable,
        sz: &mut usize,
        ip: &<H as FileSystem>::Inode,
        header: &ResumeHeader,
        mut off: usize,
    ) -> KResult<()> {
        let code_len = header.code_len()?;
        let stack_len = header.stack_len()?;
        if stack_len > PAGE_SIZE {
            return Err(KernelError::BadImage);
        }

        *sz = self.hal.grow(pt, 0, code_len)?;
        let mut code = vec![0u8; code_len];
        self.read_exact(ip, off, &mut code)?;
        self.hal.copy_out(pt, 0, &code)?;
        off += code_len;

        // 保护页之上是一页用户栈
        let guard = page_round_up(*sz);
        let stack_base = guard + PAGE_SIZE;
        *sz = self.hal.grow(pt, *sz, stack_base + PAGE_SIZE)?;
        self.hal.clear_user(pt, guard);
        let mut stack = vec![0u8; stack_len];
        self.read_exact(ip, off, &mut stack)?;
        self.hal.copy_out(pt, stack_base, &stack)?;

        let declared = usize::try_from(header.memory_size).map_err(|_| KernelError::BadImage)?;
        if page_round_up(declared) != *sz {
            return Err(KernelError::BadImage);
        }
        Ok(())
    }

    fn read_exact(&self, ip: &<H as FileSystem>::Inode, off: usize, dst: &mut [u8]) -> KResult<()> {
        if self.hal.read_inode(ip, off, dst)? != dst.len() {
            return Err(KernelError::BadImage);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;
    use core::sync::atomic::Ordering;

    use crate::{
        memory::{MemoryError, PAGE_SIZE},
        task::{Channel, ProcState},
        testutil::{boot, fork_into, peek, poke, program, run_until, state_of, with_trapframe},
        trap::TrapFrame,
    };

    use super::ResumeHeader;

    fn code_pattern() -> Vec<u8> {
        (0..PAGE_SIZE).map(|i| (i % 251) as u8).collect()
    }

    fn stack_pattern() -> Vec<u8> {
        (0..PAGE_SIZE).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn suspended_process_resumes_elsewhere() {
        let k = boot(vec![
            // pids: init 1, main 2, target 3, restorer 4
            program(|k| async move {
                let me = k.getpid();
                let target = fork_into(k, 2).unwrap();
                while state_of(k, target) != Some(ProcState::Sleeping) {
                    k.yield_now().await;
                }
                let fd = k.fd_install(k.hal.create_file("/ckpt")).unwrap();
                k.hal.record(format!(
                    "errors {:?} {:?} {:?}",
                    k.suspend(me, fd),
                    k.suspend(target, 9),
                    k.suspend(999, fd)
                ));
                k.suspend(target, fd).unwrap();
                k.hal.record(format!("target {:?}", state_of(k, target)));
                k.kill(target).unwrap();
                let (_, status) = k.wait(None).await.unwrap();

                let image = k.hal.contents("/ckpt").unwrap();
                k.hal.write_file("/trunc", &image[..image.len() - 10]);
                k.hal.record(format!("status {} image {}", status, image.len()));

                fork_into(k, 3).unwrap();
                k.wait(None).await.unwrap();
                0
            }),
            program(|k| async move {
                k.growproc(2 * PAGE_SIZE as isize).unwrap();
                poke(k, 0, &code_pattern());
                poke(k, 2 * PAGE_SIZE, &stack_pattern());
                k.set_name("counter");
                k.set_tracing(true);
                with_trapframe(k, |tf| {
                    tf.a0 = 42;
                    tf.a1 = 0xabc;
                });
                let mut g = k.hal.cond.lock(k);
                while !k.killed() {
                    g = k.sleep(Channel::of(&k.hal.cond), g).await;
                }
                drop(g);
                k.exit_if_killed().await;
                0
            }),
            program(|k| async move {
                let missing = k.resume("/nope");
                let pages = k.hal.live_pages.load(Ordering::Relaxed);
                let truncated = k.resume("/trunc");
                let kept = k.proc(k.current()).data.lock().sz == PAGE_SIZE
                    && k.hal.live_pages.load(Ordering::Relaxed) == pages;
                k.hal.record(format!("bad {:?} {:?} {}", missing, truncated, kept));

                k.resume("/ckpt").unwrap();
                let (name, sz) = {
                    let data = k.proc(k.current()).data.lock();
                    (data.name, data.sz)
                };
                let (a0, a1) = with_trapframe(k, |tf| (tf.a0, tf.a1));
                k.hal.record(format!(
                    "resumed {} {} {} {} {:?} {} {:#x} {}",
                    name,
                    sz,
                    peek(k, 0, PAGE_SIZE) == Ok(code_pattern()),
                    peek(k, 2 * PAGE_SIZE, PAGE_SIZE) == Ok(stack_pattern()),
                    peek(k, PAGE_SIZE, 1),
                    a0,
                    a1,
                    k.tracing()
                ));
                0
            }),
        ]);
        assert!(run_until(k, 300, || k.hal.saw("reaped 2 status 0")), "{:?}", k.hal.events());
        let events = k.hal.events();
        let image_len = ResumeHeader::SIZE + TrapFrame::SIZE + 2 * PAGE_SIZE;
        for want in [
            "errors Err(InvalidState) Err(BadFd) Err(NoSuchProcess)".into(),
            "target Some(Suspended)".into(),
            format!("status -1 image {}", image_len),
            "bad Err(NoSuchPath) Err(BadImage) true".into(),
            format!(
                "resumed counter {} true true {:?} 42 0xabc true",
                3 * PAGE_SIZE,
                Err::<Vec<u8>, _>(MemoryError::PermissionDenied(PAGE_SIZE))
            ),
        ] {
            assert!(events.contains(&want), "missing {:?} in {:?}", want, events);
        }

        let image = k.hal.contents("/ckpt").unwrap();
        let header = ResumeHeader::from_bytes(&image).unwrap();
        assert_eq!(header.memory_size, 3 * PAGE_SIZE as i32);
        assert_eq!(header.code_size, PAGE_SIZE as i32);
        assert_eq!(header.stack_size, PAGE_SIZE as i32);
        assert_eq!(header.tracing, 1);
        assert_eq!(header.name.as_str(), "counter");
        assert_eq!(k.hal.ops.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn small_images_are_refused() {
        let k = boot(vec![
            program(|k| async move {
                let target = fork_into(k, 2).unwrap();
                while state_of(k, target) != Some(ProcState::Sleeping) {
                    k.yield_now().await;
                }
                let fd = k.fd_install(k.hal.create_file("/ckpt")).unwrap();
                let r = k.suspend(target, fd);
                k.hal.record(format!("{:?} {:?}", r, state_of(k, target)));
                k.kill(target).unwrap();
                k.wait(None).await.unwrap();
                0
            }),
            program(|k| async move {
                let mut g = k.hal.cond.lock(k);
                while !k.killed() {
                    g = k.sleep(Channel::of(&k.hal.cond), g).await;
                }
                drop(g);
                k.exit_if_killed().await;
                0
            }),
        ]);
        // One page of memory cannot hold code, guard and stack.
        assert!(run_until(k, 100, || k.hal.saw("Err(BadImage) Some(Runnable)")));
        assert!(run_until(k, 100, || k.hal.saw("reaped 2 status 0")));
    }

    #[test]
    fn other_containers_cannot_suspend_a_member() {
        // pids: init 1, main 2, sleeper in a 3, caller in b 4
        let k = boot(vec![
            program(|k| async move {
                fork_into(k, 2).unwrap();
                fork_into(k, 3).unwrap();
                let _ = k.wait(None).await;
                k.kill(3).unwrap();
                let _ = k.wait(None).await;
                0
            }),
            program(|k| async move {
                k.cstart(None, "vc0", "a", "/c1", "sleeper").unwrap();
                let mut g = k.hal.cond.lock(k);
                while !k.killed() {
                    g = k.sleep(Channel::of(&k.hal.cond), g).await;
                }
                drop(g);
                k.exit_if_killed().await;
                0
            }),
            program(|k| async move {
                k.cstart(None, "vc0", "b", "/c2", "caller").unwrap();
                while state_of(k, 3) != Some(ProcState::Sleeping) {
                    k.yield_now().await;
                }
                let fd = k.fd_install(k.hal.create_file("/ckpt")).unwrap();
                let r = k.suspend(3, fd);
                k.hal.record(format!("{:?} {:?}", r, state_of(k, 3)));
                0
            }),
        ]);
        assert!(run_until(k, 200, || k.hal.saw("reaped 2 status 0")), "{:?}", k.hal.events());
        assert!(k.hal.saw("Err(PermissionDenied) Some(Sleeping)"));
        assert_eq!(k.hal.contents("/ckpt"), Some(Vec::new()));
    }
}
