//! Plain data types shared between the driver contract and the wrappers.

use std::fmt;
use std::net::Ipv6Addr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// [`u8`]: **Port number**, identifies a physical port on an HCA.
pub type PortNum = u8;

/// [`u16`]: **Local identifier (LID)**, identifies a port on a switch or an HCA in the cluster.
pub type Lid = u16;

/// [`u8`]: **Global identifier (GID) index**, identifies a GID on a physical port.
pub type GidIndex = u8;

/// [`u32`]: **Queue pair number**, identifies a local queue pair.
pub type Qpn = u32;

/// [`u32`]: **Packet sequence number (PSN)**, identifies a packet in a flow.
pub type Psn = u32;

/// [`u32`]: **Local key**, identifies a local memory region.
pub type LKey = u32;

/// [`u32`]: **Remote key**, identifies a remote memory region.
pub type RKey = u32;

/// [`u64`]: **Work request identifier**, designated by the poster to identify a work request.
pub type WrId = u64;

/// [`u32`]: **Immediate data**, carried by sends and RDMA writes with immediate.
pub type ImmData = u32;

/// An 128-bit identifier used to identify a port on a network adapter, a port
/// on a router, or a multicast group.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Gid([u8; 16]);

impl Gid {
    /// The all-zero GID, denoting LID-only addressing in a handshake.
    pub const ZERO: Gid = Gid([0; 16]);

    /// Whether all bytes of the GID are zero.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }

    /// The raw bytes, in wire order.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for Gid {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gid = Ipv6Addr::from(*self);
        f.debug_tuple("Gid").field(&gid.to_string()).finish()
    }
}

impl From<[u8; 16]> for Gid {
    #[inline]
    fn from(raw: [u8; 16]) -> Self {
        Self(raw)
    }
}

impl From<Gid> for [u8; 16] {
    #[inline]
    fn from(gid: Gid) -> Self {
        gid.0
    }
}

impl From<Ipv6Addr> for Gid {
    #[inline]
    fn from(addr: Ipv6Addr) -> Self {
        Self(addr.octets())
    }
}

impl From<Gid> for Ipv6Addr {
    #[inline]
    fn from(gid: Gid) -> Self {
        Ipv6Addr::from(gid.0)
    }
}

impl Serialize for Gid {
    #[inline]
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        <[u8; 16] as Serialize>::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Gid {
    #[inline]
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <[u8; 16] as Deserialize<'de>>::deserialize(deserializer).map(Self)
    }
}

bitflags! {
    /// Memory region and QP access permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u32 {
        const LOCAL_WRITE = 1 << 0;
        const REMOTE_WRITE = 1 << 1;
        const REMOTE_READ = 1 << 2;
        const REMOTE_ATOMIC = 1 << 3;
    }
}

impl Default for Access {
    /// Allow local write, remote read/write, and remote atomic.
    fn default() -> Self {
        Access::LOCAL_WRITE | Access::REMOTE_READ | Access::REMOTE_WRITE | Access::REMOTE_ATOMIC
    }
}

/// Queue pair state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpState {
    /// Reset.
    Reset,
    /// Initialized.
    Init,
    /// Ready To Receive.
    Rtr,
    /// Ready To Send.
    Rts,
    /// Error.
    Error,
}

/// Physical port state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Down,
    Init,
    Armed,
    Active,
}

/// Path MTU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mtu {
    Mtu256,
    Mtu512,
    Mtu1024,
    Mtu2048,
    Mtu4096,
}

impl Mtu {
    /// The MTU in bytes.
    #[inline]
    pub fn bytes(&self) -> usize {
        match self {
            Mtu::Mtu256 => 256,
            Mtu::Mtu512 => 512,
            Mtu::Mtu1024 => 1024,
            Mtu::Mtu2048 => 2048,
            Mtu::Mtu4096 => 4096,
        }
    }
}

/// Device atomics capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicCap {
    /// No atomic operations supported.
    None,
    /// Atomicity guaranteed within the HCA.
    Hca,
    /// Atomicity guaranteed across the HCA and host CPUs.
    Glob,
}

/// Attributes of a physical port.
#[derive(Debug, Clone, Copy)]
pub struct PortAttr {
    pub lid: Lid,
    pub state: PortState,
}

/// Extended device attributes, cached at open time so later queries are
/// allocation-free.
#[derive(Debug, Clone, Copy)]
pub struct DeviceAttr {
    pub atomic_cap: AtomicCap,
    pub max_cqe: u32,
    pub max_qp_wr: u32,
    pub max_sge: u32,
}

/// A scatter/gather entry.
#[derive(Debug, Clone, Copy)]
pub struct Sge {
    pub addr: u64,
    pub len: u32,
    pub lkey: LKey,
}

/// The opcode-specific part of a send-side work request.
#[derive(Debug, Clone, Copy)]
pub enum SendOp {
    /// Two-sided send; consumes a receive on the responder.
    Send,
    /// RDMA write; `imm` additionally consumes a receive on the responder.
    Write {
        remote_addr: u64,
        rkey: RKey,
        imm: Option<ImmData>,
    },
    /// RDMA read.
    Read { remote_addr: u64, rkey: RKey },
    /// 64-bit fetch-and-add; the original value lands in the local SGE.
    FetchAdd { remote_addr: u64, rkey: RKey, add: u64 },
    /// 64-bit compare-and-swap; the original value lands in the local SGE.
    CompSwap {
        remote_addr: u64,
        rkey: RKey,
        compare: u64,
        swap: u64,
    },
}

/// A send-side work request with a single SGE.
#[derive(Debug, Clone, Copy)]
pub struct SendWr {
    pub wr_id: WrId,
    pub sge: Sge,
    pub op: SendOp,
    pub signaled: bool,
}

/// A receive work request with a single SGE.
#[derive(Debug, Clone, Copy)]
pub struct RecvWr {
    pub wr_id: WrId,
    pub sge: Sge,
}

/// Attributes for the RESET -> INIT transition.
#[derive(Debug, Clone, Copy)]
pub struct InitAttr {
    pub pkey_index: u16,
    pub port_num: PortNum,
    pub access: Access,
}

/// Address handle attributes for the RTR transition.
#[derive(Debug, Clone, Copy)]
pub struct AhAttr {
    pub dlid: Lid,
    pub sl: u8,
    pub src_path_bits: u8,
    pub port_num: PortNum,
    /// Whether to route by GID; set iff the peer advertised a non-zero GID.
    pub is_global: bool,
    pub dgid: Gid,
}

/// Attributes for the INIT -> RTR transition.
#[derive(Debug, Clone, Copy)]
pub struct RtrAttr {
    pub path_mtu: Mtu,
    pub dest_qp_num: Qpn,
    pub rq_psn: Psn,
    pub max_dest_rd_atomic: u8,
    pub min_rnr_timer: u8,
    pub ah: AhAttr,
}

/// Attributes for the RTR -> RTS transition.
#[derive(Debug, Clone, Copy)]
pub struct RtsAttr {
    pub timeout: u8,
    pub retry_cnt: u8,
    pub rnr_retry: u8,
    pub max_rd_atomic: u8,
    pub sq_psn: Psn,
}

/// Queue pair capability attributes.
#[derive(Debug, Clone, Copy)]
pub struct QpCaps {
    /// Maximum outstanding work requests on the send queue.
    pub max_send_wr: u32,
    /// Maximum outstanding work requests on the receive queue.
    /// Ignored if the queue pair is associated with an SRQ.
    pub max_recv_wr: u32,
    /// Maximum SGEs per send work request.
    pub max_send_sge: u32,
    /// Maximum SGEs per receive work request.
    pub max_recv_sge: u32,
}

impl Default for QpCaps {
    /// 128 outstanding work requests per direction, one SGE each.
    fn default() -> Self {
        QpCaps {
            max_send_wr: 128,
            max_recv_wr: 128,
            max_send_sge: 1,
            max_recv_sge: 1,
        }
    }
}

/// Creation attributes for an RC queue pair.
pub struct QpInitAttr<'a> {
    pub send_cq: &'a dyn crate::verbs::RawCq,
    pub recv_cq: &'a dyn crate::verbs::RawCq,
    pub srq: Option<&'a dyn crate::verbs::RawSrq>,
    pub caps: QpCaps,
    pub sq_sig_all: bool,
}

/// Opcode of a completion queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WcOpcode {
    /// Send request.
    Send,
    /// RDMA write request.
    RdmaWrite,
    /// RDMA read request.
    RdmaRead,
    /// RDMA compare-and-swap request.
    CompSwap,
    /// RDMA fetch-and-add request.
    FetchAdd,
    /// Receive request.
    Recv,
    /// Receive consumed by an RDMA write with immediate data.
    RecvRdmaImm,
}

/// Status of a completion queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WcStatus {
    /// The corresponding work request ended and its buffers are ready to be
    /// (re)used.
    #[error("success")]
    Success,

    /// **Local Length Error:** a posted message exceeded the port limits, or
    /// a receive buffer was too small for the incoming message.
    #[error("local length error")]
    LocLenErr,

    /// **Local QP Operation Error:** an internal QP consistency error.
    #[error("local QP operation error")]
    LocQpOpErr,

    /// **Local Protection Error:** the scatter/gather list does not
    /// reference a memory region valid for the requested operation.
    #[error("local protection error")]
    LocProtErr,

    /// **Work Request Flushed Error:** the work request was outstanding when
    /// the QP transitioned into the error state.
    #[error("WR flush error")]
    WrFlushErr,

    /// **Bad Response Error:** an unexpected transport layer opcode was
    /// returned by the responder.
    #[error("bad response error")]
    BadRespErr,

    /// **Remote Invalid Request Error:** the responder detected an invalid
    /// message on the channel, e.g. an operation its receive queue does not
    /// permit or insufficient buffering for a new request.
    #[error("remote invalid request error")]
    RemInvReqErr,

    /// **Remote Access Error:** a protection error on a remote buffer
    /// accessed by an RDMA or atomic operation.
    #[error("remote access error")]
    RemAccessErr,

    /// **Remote Operation Error:** the responder could not complete the
    /// operation.
    #[error("remote operation error")]
    RemOpErr,

    /// **Transport Retry Counter Exceeded:** the remote side did not ack the
    /// message; the connection attributes may be wrong or the remote QP is
    /// gone.
    #[error("transport retry counter exceeded")]
    RetryExcErr,

    /// **RNR Retry Counter Exceeded:** the remote side kept answering
    /// receiver-not-ready; it likely posts no receives.
    #[error("RNR retry counter exceeded")]
    RnrRetryExcErr,

    /// **Response Timeout Error:** a response timed out.
    #[error("response timeout error")]
    RespTimeoutErr,

    /// **General Error:** any other error.
    #[error("general error")]
    GeneralErr,
}

/// Work completion entry.
#[derive(Debug, Clone, Copy)]
pub struct Wc {
    pub wr_id: WrId,
    pub status: WcStatus,
    pub opcode: WcOpcode,
    pub byte_len: u32,
    pub imm: Option<ImmData>,
    pub qp_num: Qpn,
}

impl Wc {
    /// Get the work request ID.
    #[inline]
    pub fn wr_id(&self) -> WrId {
        self.wr_id
    }

    /// Get the completion status.
    #[inline]
    pub fn status(&self) -> WcStatus {
        self.status
    }

    /// Get the completion status as a `Result`.
    ///
    /// - If the status is success, return the number of bytes processed or
    ///   transferred.
    /// - Otherwise, return an error.
    #[inline]
    pub fn ok(&self) -> Result<usize, WcStatus> {
        match self.status {
            WcStatus::Success => Ok(self.bytes()),
            status => Err(status),
        }
    }

    /// Get the opcode of the work request.
    #[inline]
    pub fn opcode(&self) -> WcOpcode {
        self.opcode
    }

    /// Get the number of bytes processed or transferred.
    #[inline]
    pub fn bytes(&self) -> usize {
        self.byte_len as usize
    }

    /// Get the immediate data, present iff the completion carries one.
    #[inline]
    pub fn imm(&self) -> Option<ImmData> {
        self.imm
    }
}

impl Default for Wc {
    /// Create a blank work completion entry, usable as a poll buffer slot.
    fn default() -> Self {
        Wc {
            wr_id: 0,
            status: WcStatus::Success,
            opcode: WcOpcode::Send,
            byte_len: 0,
            imm: None,
            qp_num: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_access_is_full() {
        let access = Access::default();
        assert!(access.contains(Access::LOCAL_WRITE));
        assert!(access.contains(Access::REMOTE_READ));
        assert!(access.contains(Access::REMOTE_WRITE));
        assert!(access.contains(Access::REMOTE_ATOMIC));
    }

    #[test]
    fn gid_zero_detection() {
        assert!(Gid::ZERO.is_zero());
        assert!(!Gid::from([1; 16]).is_zero());
    }

    #[test]
    fn wc_ok_maps_status() {
        let mut wc = Wc {
            byte_len: 42,
            ..Wc::default()
        };
        assert_eq!(wc.ok(), Ok(42));
        wc.status = WcStatus::RetryExcErr;
        assert_eq!(wc.ok(), Err(WcStatus::RetryExcErr));
    }
}
