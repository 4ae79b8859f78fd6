//! RDMA device discovery.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{Error, Result};
use crate::verbs::types::*;
use crate::verbs::{Driver, RawContext};

/// Ownership holder of an opened device.
struct DeviceInner {
    name: String,
    port_num: PortNum,
    ctx: Arc<dyn RawContext>,
    port_attr: PortAttr,
    gid: Gid,
    attr: DeviceAttr,
}

/// An opened RDMA device plus one of its physical ports.
///
/// Port attributes, the GID, and the extended attributes are cached at open
/// time, so later queries are allocation-free. The device stays open until
/// every protection domain created on it is gone.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.inner.name)
            .field("port_num", &self.inner.port_num)
            .field("lid", &self.inner.port_attr.lid)
            .finish()
    }
}

impl Device {
    /// Create a new finder instance.
    #[inline]
    pub fn finder() -> DeviceFinder {
        Default::default()
    }

    /// Open the `index`-th enumerated device on the given port.
    pub fn open(driver: &dyn Driver, index: usize, port_num: PortNum) -> Result<Device> {
        let names = driver
            .device_names()
            .map_err(|e| Error::resource("failed to enumerate devices", e))?;
        let name = names.get(index).ok_or(Error::DeviceNotFound)?;
        Self::open_by_name(driver, name, port_num)
    }

    /// Open the named device on the given port.
    pub fn open_by_name(driver: &dyn Driver, name: &str, port_num: PortNum) -> Result<Device> {
        let ctx = driver
            .open(name)
            .map_err(|e| Error::resource("failed to open device", e))?;
        let port_attr = ctx
            .query_port(port_num)
            .map_err(|e| Error::resource("failed to query port", e))?;
        let gid = ctx
            .query_gid(port_num, 0)
            .map_err(|e| Error::resource("failed to query gid", e))?;
        let attr = ctx
            .query_device()
            .map_err(|e| Error::resource("failed to query device attributes", e))?;
        log::debug!("opened device {} lid={}", name, port_attr.lid);
        Ok(Device {
            inner: Arc::new(DeviceInner {
                name: name.to_owned(),
                port_num,
                ctx,
                port_attr,
                gid,
                attr,
            }),
        })
    }

    /// The device name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The opened port number.
    #[inline]
    pub fn port_num(&self) -> PortNum {
        self.inner.port_num
    }

    /// The LID of the opened port.
    #[inline]
    pub fn lid(&self) -> Lid {
        self.inner.port_attr.lid
    }

    /// The GID of the opened port.
    #[inline]
    pub fn gid(&self) -> Gid {
        self.inner.gid
    }

    /// The cached extended device attributes.
    #[inline]
    pub fn attr(&self) -> &DeviceAttr {
        &self.inner.attr
    }

    /// Whether the device supports 64-bit fetch-and-add.
    #[inline]
    pub fn is_fetch_and_add_supported(&self) -> bool {
        self.inner.attr.atomic_cap != AtomicCap::None
    }

    /// Whether the device supports 64-bit compare-and-swap.
    #[inline]
    pub fn is_compare_and_swap_supported(&self) -> bool {
        self.inner.attr.atomic_cap != AtomicCap::None
    }

    #[inline]
    pub(crate) fn raw(&self) -> &Arc<dyn RawContext> {
        &self.inner.ctx
    }
}

/// RDMA device finder.
///
/// Filters are conjunctive; name filters match if *any* of them match.
pub struct DeviceFinder {
    /// Device name filters (match any).
    dev_names: Vec<Regex>,

    /// Which eligible device to pick, counting from 0.
    nth: usize,

    /// Port number to open.
    port_num: PortNum,
}

impl DeviceFinder {
    /// Create a finder matching any device, picking the first one, port 1.
    pub fn new() -> Self {
        Self {
            dev_names: Vec::new(),
            nth: 0,
            port_num: 1,
        }
    }

    /// Add a device name filter. Regular expressions are supported.
    /// Permit only devices whose name matches *any* of the filters.
    #[inline]
    pub fn dev_name(mut self, name: impl AsRef<str>) -> Self {
        self.dev_names
            .push(Regex::new(name.as_ref()).expect("invalid regex pattern"));
        self
    }

    /// Pick the `n`-th eligible device instead of the first.
    #[inline]
    pub fn nth(mut self, n: usize) -> Self {
        self.nth = n;
        self
    }

    /// Set the port number to open.
    ///
    /// # Panics
    ///
    /// Panics if `num` is 0.
    #[inline]
    pub fn port_num(mut self, num: PortNum) -> Self {
        assert!(num > 0, "port number must be positive");
        self.port_num = num;
        self
    }

    /// Find the eligible device and open it.
    pub fn probe(self, driver: &dyn Driver) -> Result<Device> {
        let names = driver
            .device_names()
            .map_err(|e| Error::resource("failed to enumerate devices", e))?;
        let name = names
            .iter()
            .filter(|name| {
                self.dev_names.is_empty()
                    || self.dev_names.iter().any(|re| re.is_match(name.as_str()))
            })
            .nth(self.nth)
            .ok_or(Error::DeviceNotFound)?;
        Device::open_by_name(driver, name, self.port_num)
    }
}

impl Default for DeviceFinder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verbs::sim::SimFabric;

    #[test]
    fn open_by_index_and_name_agree() {
        let fabric = SimFabric::with_devices(2);
        let by_index = Device::open(&fabric, 1, 1).unwrap();
        let by_name = Device::open_by_name(&fabric, "sim1", 1).unwrap();
        assert_eq!(by_index.lid(), by_name.lid());
        assert_eq!(by_index.name(), "sim1");
    }

    #[test]
    fn finder_filters_by_regex() {
        let fabric = SimFabric::with_devices(3);
        let device = Device::finder().dev_name("sim[12]").nth(1).probe(&fabric).unwrap();
        assert_eq!(device.name(), "sim2");
        assert!(matches!(
            Device::finder().dev_name("^mlx").probe(&fabric),
            Err(Error::DeviceNotFound)
        ));
    }

    #[test]
    fn atomics_are_advertised() {
        let fabric = SimFabric::new();
        let device = Device::open(&fabric, 0, 1).unwrap();
        assert!(device.is_fetch_and_add_supported());
        assert!(device.is_compare_and_swap_supported());
        assert!(!device.gid().is_zero());
    }
}
