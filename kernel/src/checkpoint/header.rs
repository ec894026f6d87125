use crate::{config::PROC_NAME_LEN, error::KernelError, name::FixedName};

/// Fixed header at the start of every checkpoint image.
///
/// On disk: four little-endian `i32`s followed by the NUL-padded process
/// name, 32 bytes in all. Images carry no magic or version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeHeader {
    /// Size of the whole user image: code and data, guard page, stack.
    pub memory_size: i32,
    pub code_size: i32,
    pub stack_size: i32,
    pub tracing: i32,
    pub name: FixedName<PROC_NAME_LEN>,
}

impl ResumeHeader {
    pub const SIZE: usize = 4 * 4 + PROC_NAME_LEN;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let fields = [self.memory_size, self.code_size, self.stack_size, self.tracing];
        for (chunk, v) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        out[16..].copy_from_slice(&self.name.padded());
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, KernelError> {
        let raw = raw.get(..Self::SIZE).ok_or(KernelError::BadImage)?;
        let field = |i: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&raw[i * 4..i * 4 + 4]);
            i32::from_le_bytes(b)
        };
        Ok(Self {
            memory_size: field(0),
            code_size: field(1),
            stack_size: field(2),
            tracing: field(3),
            name: FixedName::from_padded(&raw[16..]),
        })
    }

    pub fn code_len(&self) -> Result<usize, KernelError> {
        usize::try_from(self.code_size).map_err(|_| KernelError::BadImage)
    }

    pub fn stack_len(&self) -> Result<usize, KernelError> {
        usize::try_from(self.stack_size).map_err(|_| KernelError::BadImage)
    }
}
