use serde::{Deserialize, Serialize};

use super::{MrSlice, Slicing};
use crate::utils::serdes::{put_u32, put_u64, Reader};
use crate::verbs::types::RKey;

/// Remote registered memory.
///
/// This structure contains remote memory region information and does not hold
/// any RDMA resources locally. It is freely copyable, and can itself denote a
/// sub-range of the region some peer registered by letting `addr` and `len`
/// cover only part of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MrRemote {
    pub addr: u64,
    pub len: usize,
    pub rkey: RKey,
}

impl MrRemote {
    /// The wire size: 64-bit address, 32-bit length, 32-bit rkey. Fixed
    /// regardless of the host pointer width.
    pub const SERIALIZED_SIZE: usize = 16;

    /// Create a new piece of remote registered memory data.
    pub fn new(addr: u64, len: usize, rkey: RKey) -> Self {
        Self { addr, len, rkey }
    }

    /// Create a dummy `MrRemote` with all fields set to zero.
    pub fn dummy() -> Self {
        Self::new(0, 0, 0)
    }

    /// Get a pointer at the given offset.
    #[inline]
    pub fn at(&self, offset: usize) -> u64 {
        self.addr + offset as u64
    }

    /// The 16-byte wire form, big-endian.
    ///
    /// # Panics
    ///
    /// Panics if the length does not fit the wire's 32 bits.
    pub fn serialize(&self) -> [u8; Self::SERIALIZED_SIZE] {
        assert!(self.len <= u32::MAX as usize, "region too long for the wire");
        let mut buf = Vec::with_capacity(Self::SERIALIZED_SIZE);
        put_u64(&mut buf, self.addr);
        put_u32(&mut buf, self.len as u32);
        put_u32(&mut buf, self.rkey);
        buf.try_into().unwrap()
    }

    /// The inverse of [`serialize`](MrRemote::serialize).
    pub fn deserialize(buf: &[u8; Self::SERIALIZED_SIZE]) -> Self {
        let mut reader = Reader::new(buf);
        let addr = reader.get_u64().unwrap();
        let len = reader.get_u32().unwrap() as usize;
        let rkey = reader.get_u32().unwrap();
        Self { addr, len, rkey }
    }
}

impl Default for MrRemote {
    /// Create a dummy `MrRemote` with all fields set to zero.
    fn default() -> Self {
        Self::dummy()
    }
}

unsafe impl<'s> Slicing<'s> for MrRemote {
    type Output = Self;

    #[inline]
    fn addr(&'s self) -> *mut u8 {
        self.addr as _
    }

    #[inline]
    fn len(&'s self) -> usize {
        self.len
    }

    #[inline]
    unsafe fn slice_unchecked(&'s self, offset: usize, len: usize) -> Self::Output {
        Self::new(self.addr + offset as u64, len, self.rkey)
    }
}

/// Pack necessary information of a `MrSlice` into a `MrRemote` so that it can
/// be sent to the remote side. This is useful when you only want to expose a
/// specific part of a local memory region to the remote side.
impl From<MrSlice<'_>> for MrRemote {
    fn from(slice: MrSlice<'_>) -> Self {
        Self {
            addr: slice.addr() as u64,
            len: slice.len(),
            rkey: slice.mr().rkey(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_is_16_bytes_big_endian() {
        let remote = MrRemote::new(0x0102_0304_0506_0708, 0x0A0B_0C0D, 0x1122_3344);
        let wire = remote.serialize();
        assert_eq!(
            wire,
            [
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // addr
                0x0A, 0x0B, 0x0C, 0x0D, // len
                0x11, 0x22, 0x33, 0x44, // rkey
            ]
        );
        assert_eq!(MrRemote::deserialize(&wire), remote);
    }

    #[test]
    fn sub_slicing() {
        let remote = MrRemote::new(0x1000, 64, 7);
        let sub = remote.slice(8, 16).unwrap();
        assert_eq!(sub.addr, 0x1008);
        assert_eq!(sub.len, 16);
        assert_eq!(sub.rkey, 7);
        assert!(remote.slice(60, 16).is_none());
    }
}
