use core::fmt;

use crate::{fs::FileSystemError, memory::MemoryError};

/// The quota a request ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    Processes,
    Memory,
    Disk,
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quota::Processes => write!(f, "process count"),
            Quota::Memory => write!(f, "memory pages"),
            Quota::Disk => write!(f, "disk blocks"),
        }
    }
}

/// Recoverable failures of process and container operations.
///
/// Broken invariants (releasing a lock that is not held, the init process
/// exiting, a zombie being scheduled) are not represented here; those
/// halt the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    NoFreeProc,
    NoFreeContainer,
    QuotaExceeded(Quota),
    NoSuchProcess,
    NoSuchContainer,
    NoSuchPath,
    PermissionDenied,
    NoChildren,
    Killed,
    InvalidState,
    BadFd,
    /// A user pointer or string argument could not be read.
    BadArgument,
    BadImage,
    Memory(MemoryError),
    FileSystem(FileSystemError),
}

pub type KResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::NoFreeProc => write!(f, "process table full"),
            KernelError::NoFreeContainer => write!(f, "container table full"),
            KernelError::QuotaExceeded(q) => write!(f, "container quota exceeded: {}", q),
            KernelError::NoSuchProcess => write!(f, "no such process"),
            KernelError::NoSuchContainer => write!(f, "no such container"),
            KernelError::NoSuchPath => write!(f, "path not found"),
            KernelError::PermissionDenied => write!(f, "permission denied"),
            KernelError::NoChildren => write!(f, "no children"),
            KernelError::Killed => write!(f, "process killed"),
            KernelError::InvalidState => write!(f, "invalid state for operation"),
            KernelError::BadFd => write!(f, "bad file descriptor"),
            KernelError::BadArgument => write!(f, "bad system call argument"),
            KernelError::BadImage => write!(f, "malformed checkpoint image"),
            KernelError::Memory(e) => write!(f, "memory: {}", e),
            KernelError::FileSystem(e) => write!(f, "filesystem: {}", e),
        }
    }
}

impl From<MemoryError> for KernelError {
    fn from(e: MemoryError) -> Self {
        KernelError::Memory(e)
    }
}

impl From<FileSystemError> for KernelError {
    fn from(e: FileSystemError) -> Self {
        KernelError::FileSystem(e)
    }
}
