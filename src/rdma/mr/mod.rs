mod mr_slice;
mod remote;
mod slicing;

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;

pub use self::mr_slice::*;
pub use self::remote::*;
pub use self::slicing::*;
use super::pd::Pd;
use crate::error::{Error, Result};
use crate::verbs::types::{Access, LKey, RKey};
use crate::verbs::RawMr;

/// Local memory region.
///
/// A memory region is a virtual memory range registered with the RDMA device.
/// The registered memory itself does not belong to this type, but it must
/// outlive this type's lifetime (`'a`) or there can be dangling pointers.
/// The region keeps its protection domain alive and deregisters exactly once,
/// on drop.
///
/// **Subtyping:** [`Mr<'a>`] is *covariant* over `'a`.
pub struct Mr<'a> {
    pd: Pd,
    mr: Box<dyn RawMr>,
    _marker: PhantomData<&'a UnsafeCell<[u8]>>,
}

// SAFETY: the marker only records that registered memory may be mutated
// through the device; the handle itself is a plain owning wrapper.
unsafe impl Send for Mr<'_> {}
unsafe impl Sync for Mr<'_> {}

impl<'a> Mr<'a> {
    /// Register a memory region with the given protection domain.
    ///
    /// Note that receive-side and read-side operations write into the
    /// registered memory through the device even though `buf` is a shared
    /// slice here.
    pub fn reg(pd: &Pd, buf: &'a [u8], access: Access) -> Result<Self> {
        let mr = pd
            .raw()
            .reg_mr(buf.as_ptr() as *mut u8, buf.len(), access)
            .map_err(|e| Error::resource("failed to reg mr", e))?;
        log::trace!("reg mr addr={:p} len={}", buf.as_ptr(), buf.len());
        Ok(Self {
            pd: pd.clone(),
            mr,
            _marker: PhantomData,
        })
    }

    /// The protection domain this region is registered with.
    #[inline]
    pub fn pd(&self) -> &Pd {
        &self.pd
    }

    /// The local key of the memory region.
    #[inline]
    pub fn lkey(&self) -> LKey {
        self.mr.lkey()
    }

    /// The remote key of the memory region.
    #[inline]
    pub fn rkey(&self) -> RKey {
        self.mr.rkey()
    }

    /// View this region as remote memory, for transmission to peers that
    /// will access it with RDMA.
    #[inline]
    pub fn as_remote(&self) -> MrRemote {
        MrRemote {
            addr: self.mr.addr() as u64,
            len: self.mr.len(),
            rkey: self.mr.rkey(),
        }
    }

    /// The 16-byte wire form of this region: big-endian address, length, and
    /// remote key.
    #[inline]
    pub fn serialize(&self) -> [u8; MrRemote::SERIALIZED_SIZE] {
        self.as_remote().serialize()
    }
}

impl fmt::Debug for Mr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mr")
            .field("addr", &self.mr.addr())
            .field("len", &self.mr.len())
            .field("lkey", &self.lkey())
            .finish()
    }
}

unsafe impl<'a, 's> Slicing<'s> for Mr<'a>
where
    'a: 's,
{
    type Output = MrSlice<'s>;

    #[inline]
    fn addr(&'s self) -> *mut u8 {
        self.mr.addr()
    }

    #[inline]
    fn len(&'s self) -> usize {
        self.mr.len()
    }

    #[inline]
    unsafe fn slice_unchecked(&'s self, offset: usize, len: usize) -> Self::Output {
        MrSlice::new(self, offset, len)
    }
}

impl Drop for Mr<'_> {
    fn drop(&mut self) {
        // Deregistration happens when the driver handle drops right after.
        log::trace!("dereg mr addr={:p}", self.mr.addr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdma::device::Device;
    use crate::verbs::sim::SimFabric;

    fn pd() -> Pd {
        let fabric = SimFabric::new();
        let device = Device::open(&fabric, 0, 1).unwrap();
        Pd::new(&device).unwrap()
    }

    #[test]
    fn wire_form_round_trips() {
        let pd = pd();
        let buf = vec![0u8; 4096];
        let mr = Mr::reg(&pd, &buf, Access::default()).unwrap();
        let wire = mr.serialize();
        let remote = MrRemote::deserialize(&wire);
        assert_eq!(remote, MrRemote::new(buf.as_ptr() as u64, buf.len(), mr.rkey()));
    }

    #[test]
    fn slicing_respects_bounds() {
        let pd = pd();
        let buf = vec![0u8; 64];
        let mr = Mr::reg(&pd, &buf, Access::default()).unwrap();
        let slice = mr.slice(16, 8).unwrap();
        assert_eq!(slice.addr() as usize, buf.as_ptr() as usize + 16);
        assert_eq!(slice.len(), 8);
        assert!(mr.slice(60, 8).is_none());
        assert_eq!(mr.as_slice().len(), 64);

        let by_range = mr.slice_by_range(8..24).unwrap();
        assert_eq!(by_range.len(), 16);
        let sub = by_range.slice(4, 4).unwrap();
        assert_eq!(sub.addr() as usize, buf.as_ptr() as usize + 12);
    }
}
