//! Completion queue.

use std::sync::Arc;

use super::device::Device;
use crate::error::{Error, Result};
use crate::verbs::types::Wc;
use crate::verbs::RawCq;

/// Ownership holder of a completion queue.
struct CqInner {
    device: Device,
    cq: Box<dyn RawCq>,
}

/// Completion queue.
///
/// A CQ that is being drained by a [`CqPoller`](crate::exec::CqPoller) must
/// not be polled directly by the application.
#[derive(Clone)]
pub struct Cq {
    inner: Arc<CqInner>,
}

impl Cq {
    /// The default CQ depth.
    pub const DEFAULT_CQ_DEPTH: u32 = 128;

    /// Create a completion queue with room for `capacity` entries.
    pub fn new(device: &Device, capacity: u32) -> Result<Cq> {
        let max_capacity = device.attr().max_cqe;
        if capacity > max_capacity {
            return Err(Error::CqCapacityTooLarge(max_capacity));
        }
        let cq = device
            .raw()
            .create_cq(capacity)
            .map_err(|e| Error::resource("failed to create cq", e))?;
        log::trace!("created cq depth={}", capacity);
        Ok(Self {
            inner: Arc::new(CqInner {
                device: device.clone(),
                cq,
            }),
        })
    }

    /// Create a completion queue with the default depth.
    pub fn with_default_depth(device: &Device) -> Result<Cq> {
        Self::new(device, Self::DEFAULT_CQ_DEPTH)
    }

    /// The device this CQ was created on.
    #[inline]
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Non-blockingly poll one work completion.
    ///
    /// Driver failures surface as an error, never as "no completion". It is
    /// the caller's responsibility to check the status code of the returned
    /// entry.
    #[inline]
    pub fn poll_one(&self) -> Result<Option<Wc>> {
        let mut wc = [Wc::default()];
        let polled = self.poll_into(&mut wc)?;
        Ok((polled == 1).then_some(wc[0]))
    }

    /// Non-blockingly poll into the given buffer. Return the number of work
    /// completions polled, which may be less than `wc.len()` or zero.
    ///
    /// It is the caller's responsibility to check the status codes of the
    /// returned entries.
    #[inline]
    pub fn poll_into(&self, wc: &mut [Wc]) -> Result<usize> {
        if wc.is_empty() {
            return Ok(0);
        }
        self.inner
            .cq
            .poll(wc)
            .map_err(|e| Error::resource("failed to poll cq", e))
    }

    #[inline]
    pub(crate) fn raw(&self) -> &dyn RawCq {
        self.inner.cq.as_ref()
    }
}
