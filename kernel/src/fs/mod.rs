use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemError {
    NotFound,
    NotDirectory,
    IsDirectory,
    NoSpace,
    PermissionDenied,
    IoError,
}

impl fmt::Display for FileSystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSystemError::NotFound => write!(f, "not found"),
            FileSystemError::NotDirectory => write!(f, "not a directory"),
            FileSystemError::IsDirectory => write!(f, "is a directory"),
            FileSystemError::NoSpace => write!(f, "no space left"),
            FileSystemError::PermissionDenied => write!(f, "permission denied"),
            FileSystemError::IoError => write!(f, "I/O error"),
        }
    }
}

/// The file layer as seen by process management.
///
/// Inodes and open files are reference counted by the filesystem:
/// `idup`/`file_dup` take a reference and `iput`/`file_close` drop one.
/// Multi-block updates are wrapped in `begin_op`/`end_op`.
pub trait FileSystem {
    type Inode: Send + 'static;
    type File: Send + 'static;

    /// Runs once, from the first process to reach user mode, since it may
    /// need to sleep.
    fn init(&self) {}

    fn namei(&self, path: &str) -> Option<Self::Inode>;
    fn idup(&self, ip: &Self::Inode) -> Self::Inode;
    fn iput(&self, ip: Self::Inode);

    fn begin_op(&self);
    fn end_op(&self);

    /// Read from `ip` at byte offset `off`; returns the bytes read.
    fn read_inode(&self, ip: &Self::Inode, off: usize, dst: &mut [u8])
        -> Result<usize, FileSystemError>;

    fn file_dup(&self, f: &Self::File) -> Self::File;
    fn file_close(&self, f: Self::File);
    /// Append kernel bytes at the file's offset; returns the bytes written.
    fn file_write(&self, f: &Self::File, src: &[u8]) -> Result<usize, FileSystemError>;
}
