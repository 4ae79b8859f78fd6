use std::ops::{Deref, DerefMut};
use std::slice;

use crate::error::Result;
use crate::rdma::mr::{Mr, MrSlice, Slicing};
use crate::rdma::pd::Pd;
use crate::verbs::types::Access;

/// A wrapper around an owned memory area that is registered as an RDMA MR.
/// The memory is allocated on the heap and deallocated, after deregistration,
/// when this structure is dropped.
///
/// Useful for long-lived loops where the buffer and its registration travel
/// together, e.g. repeatedly posting the same region.
pub struct RegisteredMem {
    // Field order matters: the MR deregisters before the buffer frees.
    mr: Mr<'static>,
    buf: Box<[u8]>,
}

impl RegisteredMem {
    /// Allocate zeroed memory of the given length and register it with full
    /// access.
    pub fn new(pd: &Pd, len: usize) -> Result<Self> {
        let buf = vec![0u8; len].into_boxed_slice();
        // SAFETY: `buf` is heap-allocated, never reallocated, and outlives
        // the MR by field order.
        let registered: &'static [u8] =
            unsafe { slice::from_raw_parts(buf.as_ptr(), buf.len()) };
        let mr = Mr::reg(pd, registered, Access::default())?;
        Ok(Self { mr, buf })
    }

    /// Allocate and register memory holding a copy of `content`.
    pub fn new_with_content(pd: &Pd, content: &[u8]) -> Result<Self> {
        let mut this = Self::new(pd, content.len())?;
        this.buf.copy_from_slice(content);
        Ok(this)
    }

    /// The underlying memory region.
    #[inline]
    pub fn mr(&self) -> &Mr<'_> {
        &self.mr
    }

    /// A slice covering the whole region.
    #[inline]
    pub fn as_mr_slice(&self) -> MrSlice<'_> {
        self.mr.as_slice()
    }
}

unsafe impl<'s> Slicing<'s> for RegisteredMem {
    type Output = MrSlice<'s>;

    #[inline]
    fn addr(&'s self) -> *mut u8 {
        self.buf.as_ptr() as *mut u8
    }

    #[inline]
    fn len(&'s self) -> usize {
        self.buf.len()
    }

    #[inline]
    unsafe fn slice_unchecked(&'s self, offset: usize, len: usize) -> Self::Output {
        self.mr.slice_unchecked(offset, len)
    }
}

impl Deref for RegisteredMem {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.buf.as_ref()
    }
}

impl DerefMut for RegisteredMem {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_mut()
    }
}
