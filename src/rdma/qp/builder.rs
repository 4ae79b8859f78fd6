use serde::{Deserialize, Serialize};

use super::Qp;
use crate::error::Result;
use crate::rdma::{cq::Cq, pd::Pd, srq::Srq};
use crate::verbs::types::QpCaps;

/// Tunable RC connection timers and limits.
///
/// The defaults follow the transitions the engine was built around: a 4096B
/// path MTU, `min_rnr_timer = 12`, `timeout = 14`, one outstanding RDMA
/// read/atomic per direction, and a single transport/RNR retry. Deployments
/// that prefer more transient-error tolerance can raise the retry counts
/// (the verbs maximum is 7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QpTuning {
    /// ACK timeout exponent for the RTS transition.
    pub timeout: u8,
    /// Transport retry count for the RTS transition.
    pub retry_cnt: u8,
    /// RNR retry count for the RTS transition.
    pub rnr_retry: u8,
    /// Minimum RNR NAK timer for the RTR transition.
    pub min_rnr_timer: u8,
    /// Outstanding RDMA reads/atomics as the requester.
    pub max_rd_atomic: u8,
    /// Outstanding RDMA reads/atomics as the responder.
    pub max_dest_rd_atomic: u8,
}

impl Default for QpTuning {
    fn default() -> Self {
        QpTuning {
            timeout: 14,
            retry_cnt: 1,
            rnr_retry: 1,
            min_rnr_timer: 12,
            max_rd_atomic: 1,
            max_dest_rd_atomic: 1,
        }
    }
}

/// Queue pair builder.
#[derive(Clone)]
pub struct QpBuilder<'a> {
    /// Send completion queue for this QP.
    pub(super) send_cq: Option<&'a Cq>,

    /// Receive completion queue for this QP. Can be the same as the send CQ.
    pub(super) recv_cq: Option<&'a Cq>,

    /// Optional shared receive queue. When set, every receive posted through
    /// this QP goes to the SRQ instead of the QP's own receive queue.
    pub(super) srq: Option<&'a Srq>,

    /// Capabilities of this QP.
    pub(super) caps: QpCaps,

    /// Connection timers and limits.
    pub(super) tuning: QpTuning,

    /// Opaque payload advertised to the peer during the handshake.
    pub(super) user_data: Vec<u8>,
}

impl<'a> QpBuilder<'a> {
    /// Create a new queue pair builder.
    pub fn new() -> Self {
        Self {
            send_cq: None,
            recv_cq: None,
            srq: None,
            caps: QpCaps::default(),
            tuning: QpTuning::default(),
            user_data: Vec::new(),
        }
    }

    /// Set the send completion queue for this QP.
    pub fn send_cq(mut self, send_cq: &'a Cq) -> Self {
        self.send_cq = Some(send_cq);
        self
    }

    /// Set the receive completion queue for this QP.
    pub fn recv_cq(mut self, recv_cq: &'a Cq) -> Self {
        self.recv_cq = Some(recv_cq);
        self
    }

    /// Use one completion queue for both directions.
    pub fn cq(self, cq: &'a Cq) -> Self {
        self.send_cq(cq).recv_cq(cq)
    }

    /// Bind the QP to a shared receive queue.
    pub fn srq(mut self, srq: &'a Srq) -> Self {
        self.srq = Some(srq);
        self
    }

    /// Set the capabilities of this QP.
    pub fn caps(mut self, caps: QpCaps) -> Self {
        self.caps = caps;
        self
    }

    /// Set the connection timers and limits.
    pub fn tuning(mut self, tuning: QpTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Set the opaque payload advertised to the peer during the handshake.
    /// At most `u32::MAX` bytes.
    pub fn user_data(mut self, user_data: Vec<u8>) -> Self {
        self.user_data = user_data;
        self
    }

    /// Build the queue pair on the given protection domain. The new QP is
    /// already transitioned to INIT.
    ///
    /// # Panics
    ///
    /// Panics if either completion queue is not set.
    pub fn build(self, pd: &Pd) -> Result<Qp> {
        Qp::new(pd, self)
    }
}

impl Default for QpBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}
