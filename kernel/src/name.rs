use core::fmt;

/// A bounded, inline name buffer.
///
/// Holds at most `N - 1` bytes so the padded form always carries a NUL
/// terminator. Longer input is cut at the last character boundary that
/// fits.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedName<const N: usize> {
    bytes: [u8; N],
    len: usize,
}

impl<const N: usize> FixedName<N> {
    pub const fn new() -> Self {
        Self {
            bytes: [0; N],
            len: 0,
        }
    }

    pub fn from_str(name: &str) -> Self {
        let mut n = Self::new();
        n.set(name);
        n
    }

    /// Build from a NUL-padded buffer, stopping at the first NUL.
    pub fn from_padded(raw: &[u8]) -> Self {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let text = match core::str::from_utf8(&raw[..end]) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&raw[..e.valid_up_to()]).unwrap_or(""),
        };
        Self::from_str(text)
    }

    pub fn set(&mut self, name: &str) {
        let mut len = name.len().min(N.saturating_sub(1));
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        self.bytes = [0; N];
        self.bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        self.len = len;
    }

    pub fn clear(&mut self) {
        self.bytes = [0; N];
        self.len = 0;
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The whole buffer, zero filled past the name.
    pub fn padded(&self) -> [u8; N] {
        self.bytes
    }
}

impl<const N: usize> Default for FixedName<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PartialEq<str> for FixedName<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl<const N: usize> fmt::Display for FixedName<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> fmt::Debug for FixedName<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}
