//! The calling process's open-file table.

use crate::{
    config::NOFILE,
    error::{KResult, KernelError},
    fs::FileSystem,
    hal::Hal,
    kernel::Kernel,
};

impl<H: Hal> Kernel<H> {
    /// Give `f` the lowest free descriptor of the calling process.
    pub fn fd_install(&self, f: <H as FileSystem>::File) -> KResult<usize> {
        let mut data = self.proc(self.current()).data.lock();
        match data.ofile.iter().position(Option::is_none) {
            Some(fd) => {
                data.ofile[fd] = Some(f);
                Ok(fd)
            }
            None => {
                drop(data);
                self.hal.file_close(f);
                Err(KernelError::BadFd)
            }
        }
    }

    pub fn fd_close(&self, fd: usize) -> KResult<()> {
        let f = self
            .proc(self.current())
            .data
            .lock()
            .ofile
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(KernelError::BadFd)?;
        self.hal.file_close(f);
        Ok(())
    }

    /// A new reference to the file open at `fd`.
    pub(crate) fn fd_dup(&self, fd: usize) -> KResult<<H as FileSystem>::File> {
        let data = self.proc(self.current()).data.lock();
        match data.ofile.get(fd) {
            Some(Some(f)) => Ok(self.hal.file_dup(f)),
            _ => Err(KernelError::BadFd),
        }
    }

    pub(crate) fn fd_check(&self, fd: usize) -> KResult<()> {
        if fd < NOFILE && self.proc(self.current()).data.lock().ofile[fd].is_some() {
            Ok(())
        } else {
            Err(KernelError::BadFd)
        }
    }
}
