//! Shared receive queue.

use std::io;
use std::sync::Arc;

use super::pd::Pd;
use crate::error::{Error, Result};
use crate::verbs::types::RecvWr;
use crate::verbs::RawSrq;

/// Ownership holder of a shared receive queue.
struct SrqInner {
    pd: Pd,
    srq: Box<dyn RawSrq>,
}

/// Shared receive queue.
///
/// Receives for any queue pair bound to this SRQ drain from here instead of
/// the queue pair's own receive queue.
#[derive(Clone)]
pub struct Srq {
    inner: Arc<SrqInner>,
}

impl Srq {
    /// The default number of outstanding receive work requests.
    pub const DEFAULT_MAX_WR: u32 = 1024;

    /// Create a shared receive queue on the given protection domain, with a
    /// single SGE per work request.
    pub fn new(pd: &Pd, max_wr: u32) -> Result<Self> {
        let srq = pd
            .raw()
            .create_srq(max_wr)
            .map_err(|e| Error::resource("failed to create srq", e))?;
        log::trace!("created srq max_wr={}", max_wr);
        Ok(Self {
            inner: Arc::new(SrqInner { pd: pd.clone(), srq }),
        })
    }

    /// The protection domain of the SRQ.
    #[inline]
    pub fn pd(&self) -> &Pd {
        &self.inner.pd
    }

    #[inline]
    pub(crate) fn post_recv(&self, wr: &RecvWr) -> io::Result<()> {
        self.inner.srq.post_recv(wr)
    }

    #[inline]
    pub(crate) fn raw(&self) -> &dyn RawSrq {
        self.inner.srq.as_ref()
    }
}
