//! Saved user registers.
//!
//! The layout is shared with the trampoline and with checkpoint images,
//! so field order and width are fixed: 36 little-endian `u64` words.

macro_rules! trap_frame {
    ($($(#[$doc:meta])* $field:ident),* $(,)?) => {
        /// Per-process page holding user registers across a trap.
        #[repr(C)]
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct TrapFrame {
            $($(#[$doc])* pub $field: u64,)*
        }

        impl TrapFrame {
            pub const WORDS: usize = [$(stringify!($field)),*].len();
            pub const SIZE: usize = Self::WORDS * 8;

            fn words(&self) -> [u64; Self::WORDS] {
                [$(self.$field),*]
            }

            fn from_words(words: [u64; Self::WORDS]) -> Self {
                let mut it = words.into_iter();
                Self {
                    $($field: it.next().unwrap_or(0),)*
                }
            }
        }
    };
}

trap_frame! {
    /// 内核页表
    kernel_satp,
    /// top of this process's kernel stack
    kernel_sp,
    /// usertrap()
    kernel_trap,
    /// saved user program counter
    epc,
    kernel_hartid,
    ra, sp, gp, tp,
    t0, t1, t2,
    s0, s1,
    a0, a1, a2, a3, a4, a5, a6, a7,
    s2, s3, s4, s5, s6, s7, s8, s9, s10, s11,
    t3, t4, t5, t6,
}

impl TrapFrame {
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(8).zip(self.words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Decode a trapframe; `None` if `raw` is shorter than [`Self::SIZE`].
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        let raw = raw.get(..Self::SIZE)?;
        let mut words = [0u64; Self::WORDS];
        for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(8)) {
            let mut b = [0u8; 8];
            b.copy_from_slice(chunk);
            *word = u64::from_le_bytes(b);
        }
        Some(Self::from_words(words))
    }
}
