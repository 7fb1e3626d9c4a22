//! NUL padded strings as exchanged with the GPIO uAPI (chip names, labels
//! and line consumers).

use std::ops::Deref;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedStr<const N: usize> {
    s: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    #[inline]
    pub const fn empty() -> Self {
        Self { s: [0; N] }
    }

    /// Copy `s` into a fixed buffer.
    ///
    /// One byte is always left for the terminating NUL the kernel expects.
    pub fn new(s: &str) -> Result<Self, FixedStrErr> {
        let bytes = s.as_bytes();
        if bytes.len() >= N {
            return Err(FixedStrErr::CapacityOverflow {
                capacity: N.saturating_sub(1),
                required: bytes.len(),
            });
        }
        if bytes.contains(&0) {
            return Err(FixedStrErr::InteriorNul);
        }

        let mut f = Self::empty();
        f.s[..bytes.len()].copy_from_slice(bytes);
        Ok(f)
    }

    /// Take a buffer filled in by the kernel, discarding anything after the
    /// first NUL.
    pub fn from_byte_array(mut bytes: [u8; N]) -> Result<Self, FixedStrErr> {
        let len = bytes.iter().position(|c| *c == 0).unwrap_or(N);
        core::str::from_utf8(&bytes[..len])?;
        bytes[len..].fill(0);
        Ok(Self { s: bytes })
    }

    pub const fn into_byte_array(self) -> [u8; N] {
        self.s
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.s.iter().position(|c| *c == 0).unwrap_or(N)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        N == 0 || self.s[0] == 0
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        // Contents are validated as UTF-8 on every construction path.
        core::str::from_utf8(&self.s[..self.len()]).unwrap_or_default()
    }
}

impl<const N: usize> Default for FixedStr<N> {
    #[inline(always)]
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> std::fmt::Debug for FixedStr<N> {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FixedStr").field(&self.as_str()).finish()
    }
}

impl<const N: usize> std::fmt::Display for FixedStr<N> {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

impl<const N: usize> Deref for FixedStr<N> {
    type Target = str;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum FixedStrErr {
    #[error(
        "Exceeded fixed string size: required {required} bytes with only {capacity} available"
    )]
    CapacityOverflow { capacity: usize, required: usize },
    #[error("String contains an interior NUL byte")]
    InteriorNul,
    #[error("UTF8 Error")]
    Utf8(#[from] core::str::Utf8Error),
}

impl From<FixedStrErr> for std::io::Error {
    fn from(value: FixedStrErr) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keeps_room_for_nul() {
        assert!(FixedStr::<8>::new("1234567").is_ok());
        assert!(matches!(
            FixedStr::<8>::new("12345678"),
            Err(FixedStrErr::CapacityOverflow {
                capacity: 7,
                required: 8
            })
        ));
    }

    #[test]
    fn kernel_buffer_is_truncated_at_nul() {
        let mut raw = [0u8; 16];
        raw[..11].copy_from_slice(b"pinctrl-rp1");
        raw[12] = b'x';
        let s = FixedStr::from_byte_array(raw).unwrap();
        assert_eq!(s.as_str(), "pinctrl-rp1");
        assert_eq!(s.into_byte_array()[12], 0);
    }

    #[test]
    fn empty() {
        let s = FixedStr::<4>::default();
        assert!(s.is_empty());
        assert_eq!(s.len(), 0);
        assert!(!FixedStr::<4>::new("a").unwrap().is_empty());
    }

    #[test]
    fn rejects_invalid_utf8() {
        let raw = [0xff, 0xfe, 0, 0];
        assert!(matches!(
            FixedStr::from_byte_array(raw),
            Err(FixedStrErr::Utf8(_))
        ));
    }
}
