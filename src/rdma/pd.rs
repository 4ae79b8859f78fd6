//! Protection domain.

use std::fmt;
use std::sync::Arc;

use super::device::Device;
use crate::error::{Error, Result};
use crate::verbs::RawPd;

/// Ownership holder of a protection domain.
struct PdInner {
    device: Device,
    pd: Box<dyn RawPd>,
}

/// Protection domain.
///
/// Memory regions and queue pairs belong to exactly one protection domain;
/// the domain keeps its device alive.
#[derive(Clone)]
pub struct Pd {
    inner: Arc<PdInner>,
}

impl fmt::Debug for Pd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pd").field("device", self.device()).finish()
    }
}

impl Pd {
    /// Allocate a protection domain on the given device.
    pub fn new(device: &Device) -> Result<Self> {
        let pd = device
            .raw()
            .alloc_pd()
            .map_err(|e| Error::resource("failed to alloc pd", e))?;
        log::trace!("alloc pd on {}", device.name());
        Ok(Self {
            inner: Arc::new(PdInner {
                device: device.clone(),
                pd,
            }),
        })
    }

    /// The device this domain was allocated on.
    #[inline]
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    #[inline]
    pub(crate) fn raw(&self) -> &dyn RawPd {
        self.inner.pd.as_ref()
    }
}
