//! Crate-level error type.

use std::io;

use thiserror::Error;

use crate::verbs::types::WcStatus;

/// Errors surfaced by this crate.
///
/// Precondition violations (issuing atomics on a device that does not
/// advertise them, driving a QP that is not in RTS) are programmer errors
/// and panic instead of producing a variant here.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to allocate or register an operating-system or driver resource.
    #[error("{context}: {source}")]
    Resource {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// I/O error from the socket layer.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The remote end closed the rendezvous stream in the middle of a record.
    #[error("remote closed unexpectedly while {0}")]
    UnexpectedClose(&'static str),

    /// A posted work request completed with a non-success status.
    #[error("failed to {op}: {status}")]
    Completion { op: &'static str, status: WcStatus },

    /// Specified capabilities are not supported by the device.
    /// The three fields are for the capability name, the maximum supported
    /// value, and the required value.
    #[error("capability not enough: {0} supports up to {1}, {2} required")]
    CapabilityNotEnough(&'static str, u32, u32),

    /// The capacity of the CQ is larger than the device's maximum allowed
    /// capacity, which is contained in the error.
    #[error("CQ capacity too large (maximum: {0})")]
    CqCapacityTooLarge(u32),

    /// No device matched the requested filters.
    #[error("no eligible RDMA device found")]
    DeviceNotFound,

    /// The supporting event loop has been closed.
    #[error("event loop closed")]
    LoopClosed,

    /// The executor queue has been closed.
    #[error("executor queue closed")]
    QueueClosed,

    /// A configuration file could not be parsed.
    #[error("bad configuration: {0}")]
    Config(String),
}

impl Error {
    /// Wrap a system or driver error with a short description of the failed
    /// operation, mirroring `check_errno`-style call sites.
    #[inline]
    pub(crate) fn resource(context: &'static str, source: io::Error) -> Self {
        Error::Resource { context, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
