//! User address-space contract.
//!
//! The page-table code itself lives with the board support; the process
//! layer only needs the handful of operations below.

use core::fmt;

use crate::trap::TrapFrame;

pub const PAGE_SIZE: usize = 4096;

#[inline]
pub const fn page_round_up(sz: usize) -> usize {
    (sz + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

#[inline]
pub const fn page_round_down(sz: usize) -> usize {
    sz & !(PAGE_SIZE - 1)
}

/// Pages needed to back `sz` bytes.
#[inline]
pub const fn pages_for(sz: usize) -> usize {
    page_round_up(sz) / PAGE_SIZE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    AllocationFailed,
    NotMapped(usize),
    PermissionDenied(usize),
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "Memory allocation failed"),
            MemoryError::NotMapped(va) => write!(f, "Memory not mapped at {:#x}", va),
            MemoryError::PermissionDenied(va) => {
                write!(f, "Memory access permission denied at {:#x}", va)
            }
        }
    }
}

/// Operations on user page tables.
///
/// A page table maps user memory `[0, sz)` plus the trampoline and the
/// process's trapframe page at fixed high addresses.
pub trait AddressSpace {
    type PageTable: Send + 'static;

    /// An empty table with the trampoline already mapped.
    fn create(&self) -> Result<Self::PageTable, MemoryError>;

    /// Map the trapframe page below the trampoline.
    fn map_trapframe(&self, pt: &mut Self::PageTable, tf: &TrapFrame) -> Result<(), MemoryError>;

    /// Grow user memory from `old_sz` to `new_sz` with zeroed pages.
    /// Returns the new size. On failure nothing new stays mapped.
    fn grow(&self, pt: &mut Self::PageTable, old_sz: usize, new_sz: usize)
        -> Result<usize, MemoryError>;

    /// Shrink user memory from `old_sz` to `new_sz`; returns the new size.
    fn shrink(&self, pt: &mut Self::PageTable, old_sz: usize, new_sz: usize) -> usize;

    /// Copy `[0, sz)` of `from` into freshly allocated pages of `to`.
    fn copy(&self, from: &Self::PageTable, to: &mut Self::PageTable, sz: usize)
        -> Result<(), MemoryError>;

    /// Make the page at `va` inaccessible from user mode (stack guard).
    fn clear_user(&self, pt: &mut Self::PageTable, va: usize);

    /// Unmap everything and release the pages backing `[0, sz)`.
    fn free(&self, pt: Self::PageTable, sz: usize);

    fn copy_out(&self, pt: &mut Self::PageTable, dst_va: usize, src: &[u8])
        -> Result<(), MemoryError>;

    fn copy_in(&self, pt: &Self::PageTable, dst: &mut [u8], src_va: usize)
        -> Result<(), MemoryError>;
}
