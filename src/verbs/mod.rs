//! The verbs driver contract.
//!
//! The crate does not talk to a vendor verbs library directly. Instead, every
//! driver interaction goes through the object-safe traits in this module:
//! enumerate and open devices, query ports and extended attributes, allocate
//! PDs, register MRs, create CQs/SRQs/QPs, post work requests, and poll
//! completions. Any driver with equivalent semantics satisfies the contract;
//! [`sim`] ships an in-process implementation used by the test suite and
//! usable as a loopback driver.

pub mod sim;
pub mod types;

use std::any::Any;
use std::io;
use std::sync::Arc;

use self::types::*;

/// Entry point of a verbs driver: device enumeration and opening.
pub trait Driver: Send + Sync + 'static {
    /// Names of the devices this driver exposes, in enumeration order.
    fn device_names(&self) -> io::Result<Vec<String>>;

    /// Open the named device and return its context.
    fn open(&self, name: &str) -> io::Result<Arc<dyn RawContext>>;
}

/// An opened device context.
pub trait RawContext: Send + Sync {
    /// Query attributes of the given physical port.
    fn query_port(&self, port_num: PortNum) -> io::Result<PortAttr>;

    /// Query a GID of the given physical port.
    fn query_gid(&self, port_num: PortNum, index: GidIndex) -> io::Result<Gid>;

    /// Query extended device attributes.
    fn query_device(&self) -> io::Result<DeviceAttr>;

    /// Allocate a protection domain.
    fn alloc_pd(&self) -> io::Result<Box<dyn RawPd>>;

    /// Create a completion queue with room for `capacity` entries.
    fn create_cq(&self, capacity: u32) -> io::Result<Box<dyn RawCq>>;
}

/// A protection domain.
pub trait RawPd: Send + Sync {
    /// Register `len` bytes at `addr` with the given access flags.
    ///
    /// The returned handle deregisters the region when dropped. The memory
    /// must stay valid until then; the wrappers in [`crate::rdma`] enforce
    /// this with lifetimes.
    fn reg_mr(&self, addr: *mut u8, len: usize, access: Access) -> io::Result<Box<dyn RawMr>>;

    /// Create a shared receive queue holding up to `max_wr` outstanding
    /// receives, one SGE each.
    fn create_srq(&self, max_wr: u32) -> io::Result<Box<dyn RawSrq>>;

    /// Create an RC queue pair in the RESET state.
    fn create_qp(&self, attr: QpInitAttr<'_>) -> io::Result<Box<dyn RawQp>>;
}

/// A registered memory region. Dropping the handle deregisters it.
pub trait RawMr: Send + Sync {
    fn addr(&self) -> *mut u8;
    fn len(&self) -> usize;
    fn lkey(&self) -> LKey;
    fn rkey(&self) -> RKey;
}

/// A completion queue. Dropping the handle destroys it.
pub trait RawCq: Send + Sync {
    /// Poll up to `wc.len()` completions into `wc`, returning how many were
    /// written. Driver failures surface as errors, never as an empty poll.
    fn poll(&self, wc: &mut [Wc]) -> io::Result<usize>;

    /// Downcast support for drivers that need their own CQ type back when a
    /// QP is created against it.
    fn as_any(&self) -> &dyn Any;
}

/// A shared receive queue. Dropping the handle destroys it.
pub trait RawSrq: Send + Sync {
    /// Post a receive work request to the shared queue.
    fn post_recv(&self, wr: &RecvWr) -> io::Result<()>;

    /// Downcast support, as for [`RawCq::as_any`].
    fn as_any(&self) -> &dyn Any;
}

/// An RC queue pair. Dropping the handle destroys it; outstanding work
/// requests are abandoned, so callers must drain completions first.
pub trait RawQp: Send + Sync {
    /// The queue pair number assigned at creation.
    fn qp_num(&self) -> Qpn;

    /// RESET -> INIT.
    fn modify_reset2init(&self, attr: &InitAttr) -> io::Result<()>;

    /// INIT -> RTR.
    fn modify_init2rtr(&self, attr: &RtrAttr) -> io::Result<()>;

    /// RTR -> RTS.
    fn modify_rtr2rts(&self, attr: &RtsAttr) -> io::Result<()>;

    /// Post a send-side work request (send, RDMA, atomic).
    fn post_send(&self, wr: &SendWr) -> io::Result<()>;

    /// Post a receive work request to the QP's own receive queue.
    fn post_recv(&self, wr: &RecvWr) -> io::Result<()>;
}
