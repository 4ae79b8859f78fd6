//! Queue pair and related types.

mod awaitable;
mod builder;
mod endpoint;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use self::awaitable::CompletionSlot;
pub use self::builder::*;
pub use self::endpoint::*;
use crate::error::{Error, Result};
use crate::exec::{callback_from_wr_id, callback_into_wr_id, CompletionCallback};
use crate::rdma::{cq::Cq, mr::*, pd::Pd, srq::Srq};
use crate::verbs::types::*;
use crate::verbs::RawQp;

/// Process-wide monotonic counter for initial send PSNs.
static NEXT_SQ_PSN: AtomicU32 = AtomicU32::new(1);

fn alloc_sq_psn() -> Psn {
    NEXT_SQ_PSN.fetch_add(1, Ordering::Relaxed)
}

/// Ownership holder of a queue pair.
struct QpInner {
    qp: Box<dyn RawQp>,
    sq_psn: Psn,
    pd: Pd,
    send_cq: Cq,
    recv_cq: Cq,
    srq: Option<Srq>,
    tuning: QpTuning,
    state: Mutex<QpState>,
    user_data: Mutex<Vec<u8>>,
}

/// An RC queue pair with awaitable data operations.
///
/// A freshly built QP is in INIT; supplying the remote peer's identifiers
/// through [`rtr`](Qp::rtr) and then calling [`rts`](Qp::rts) makes it
/// usable. The [`ctrl`](crate::ctrl) module does this over a TCP rendezvous.
///
/// Handles are cheap clones of one underlying QP, so the send side and the
/// receive side can be driven from different tasks on different threads. A
/// failed state transition poisons the QP; it must not be used further.
#[derive(Clone)]
pub struct Qp {
    inner: Arc<QpInner>,
}

impl fmt::Debug for Qp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("Qp<qpn={}>", self.qp_num()))
    }
}

impl Qp {
    /// Create a new QP builder.
    pub fn builder<'a>() -> QpBuilder<'a> {
        Default::default()
    }

    /// Check whether the requested capabilities are supported by the device.
    fn check_caps(pd: &Pd, caps: &QpCaps) -> Result<()> {
        let attr = pd.device().attr();
        if caps.max_send_wr > attr.max_qp_wr {
            return Err(Error::CapabilityNotEnough(
                "max_send_wr",
                attr.max_qp_wr,
                caps.max_send_wr,
            ));
        }
        if caps.max_recv_wr > attr.max_qp_wr {
            return Err(Error::CapabilityNotEnough(
                "max_recv_wr",
                attr.max_qp_wr,
                caps.max_recv_wr,
            ));
        }
        if caps.max_send_sge > attr.max_sge {
            return Err(Error::CapabilityNotEnough(
                "max_send_sge",
                attr.max_sge,
                caps.max_send_sge,
            ));
        }
        if caps.max_recv_sge > attr.max_sge {
            return Err(Error::CapabilityNotEnough(
                "max_recv_sge",
                attr.max_sge,
                caps.max_recv_sge,
            ));
        }
        Ok(())
    }

    /// Create a queue pair from the given builder and transition it to INIT.
    pub(crate) fn new(pd: &Pd, builder: QpBuilder<'_>) -> Result<Self> {
        Self::check_caps(pd, &builder.caps)?;
        let send_cq = builder.send_cq.expect("send CQ must be set").clone();
        let recv_cq = builder.recv_cq.expect("recv CQ must be set").clone();
        let srq = builder.srq.cloned();

        let qp = pd
            .raw()
            .create_qp(QpInitAttr {
                send_cq: send_cq.raw(),
                recv_cq: recv_cq.raw(),
                srq: srq.as_ref().map(Srq::raw),
                caps: builder.caps,
                sq_sig_all: false,
            })
            .map_err(|e| Error::resource("failed to create qp", e))?;
        let sq_psn = alloc_sq_psn();

        let device = pd.device();
        qp.modify_reset2init(&InitAttr {
            pkey_index: 0,
            port_num: device.port_num(),
            access: Access::default(),
        })
        .map_err(|e| Error::resource("failed to transition qp to init state", e))?;
        log::trace!(
            "created qp lid={} qpn={} psn={}",
            device.lid(),
            qp.qp_num(),
            sq_psn
        );

        Ok(Qp {
            inner: Arc::new(QpInner {
                qp,
                sq_psn,
                pd: pd.clone(),
                send_cq,
                recv_cq,
                srq,
                tuning: builder.tuning,
                state: Mutex::new(QpState::Init),
                user_data: Mutex::new(builder.user_data),
            }),
        })
    }

    /// The protection domain of the queue pair.
    #[inline]
    pub fn pd(&self) -> &Pd {
        &self.inner.pd
    }

    /// The associated send completion queue.
    #[inline]
    pub fn scq(&self) -> &Cq {
        &self.inner.send_cq
    }

    /// The associated receive completion queue.
    #[inline]
    pub fn rcq(&self) -> &Cq {
        &self.inner.recv_cq
    }

    /// The shared receive queue, if this QP was built with one.
    #[inline]
    pub fn srq(&self) -> Option<&Srq> {
        self.inner.srq.as_ref()
    }

    /// The queue pair number.
    #[inline]
    pub fn qp_num(&self) -> Qpn {
        self.inner.qp.qp_num()
    }

    /// The locally chosen initial send PSN.
    #[inline]
    pub fn sq_psn(&self) -> Psn {
        self.inner.sq_psn
    }

    /// The current state of the queue pair.
    #[inline]
    pub fn state(&self) -> QpState {
        *self.inner.state.lock().unwrap()
    }

    /// The opaque payload currently stored on the QP. Before the handshake
    /// this is what the builder configured; afterwards it is the payload
    /// received from the peer.
    pub fn user_data(&self) -> Vec<u8> {
        self.inner.user_data.lock().unwrap().clone()
    }

    /// Replace the opaque payload stored on the QP.
    pub fn set_user_data(&self, user_data: Vec<u8>) {
        *self.inner.user_data.lock().unwrap() = user_data;
    }

    /// The identifiers this side advertises during a handshake.
    pub fn endpoint(&self) -> QpEndpoint {
        let device = self.inner.pd.device();
        QpEndpoint {
            lid: device.lid(),
            qpn: self.qp_num(),
            psn: self.inner.sq_psn,
            gid: device.gid(),
            user_data: self.user_data(),
        }
    }

    /// Serialize this side's identifiers for the rendezvous wire.
    pub fn serialize(&self) -> Vec<u8> {
        self.endpoint().serialize()
    }

    /// Transition INIT -> RTR using the remote peer's identifiers.
    ///
    /// A failure here is fatal for the QP.
    ///
    /// # Panics
    ///
    /// Panics if the QP is not in INIT.
    pub fn rtr(&self, remote: &QpEndpoint) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        assert_eq!(*state, QpState::Init, "rtr requires an INIT queue pair");
        let device = self.inner.pd.device();
        let tuning = &self.inner.tuning;
        let attr = RtrAttr {
            path_mtu: Mtu::Mtu4096,
            dest_qp_num: remote.qpn,
            rq_psn: remote.psn,
            max_dest_rd_atomic: tuning.max_dest_rd_atomic,
            min_rnr_timer: tuning.min_rnr_timer,
            ah: AhAttr {
                dlid: remote.lid,
                sl: 0,
                src_path_bits: 0,
                port_num: device.port_num(),
                is_global: !remote.gid.is_zero(),
                dgid: remote.gid,
            },
        };
        match self.inner.qp.modify_init2rtr(&attr) {
            Ok(()) => {
                *state = QpState::Rtr;
                Ok(())
            }
            Err(e) => {
                *state = QpState::Error;
                Err(Error::resource("failed to transition qp to rtr state", e))
            }
        }
    }

    /// Transition RTR -> RTS.
    ///
    /// A failure here is fatal for the QP.
    ///
    /// # Panics
    ///
    /// Panics if the QP is not in RTR.
    pub fn rts(&self) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        assert_eq!(*state, QpState::Rtr, "rts requires an RTR queue pair");
        let tuning = &self.inner.tuning;
        let attr = RtsAttr {
            timeout: tuning.timeout,
            retry_cnt: tuning.retry_cnt,
            rnr_retry: tuning.rnr_retry,
            max_rd_atomic: tuning.max_rd_atomic,
            sq_psn: self.inner.sq_psn,
        };
        match self.inner.qp.modify_rtr2rts(&attr) {
            Ok(()) => {
                *state = QpState::Rts;
                Ok(())
            }
            Err(e) => {
                *state = QpState::Error;
                Err(Error::resource("failed to transition qp to rts state", e))
            }
        }
    }

    /// Drive the QP all the way to RTS against the given remote peer.
    pub fn connect(&self, remote: &QpEndpoint) -> Result<()> {
        self.rtr(remote)?;
        self.rts()
    }
}

/// Data operations. Every operation posts a signalled work request whose
/// `wr_id` names a heap-allocated callback; the awaitable resumes when a
/// [`CqPoller`](crate::exec::CqPoller) routes the matching completion to an
/// executor worker. If posting fails synchronously, the callback is
/// reclaimed and the error is returned without suspending.
///
/// The `*_mr` variants take an application-registered slice whose lifetime
/// the caller controls; the buffer variants register a temporary region for
/// the duration of the operation.
impl Qp {
    async fn submit_send(&self, sge: Sge, op: SendOp, opname: &'static str) -> Result<Wc> {
        assert_eq!(
            self.state(),
            QpState::Rts,
            "{} requires an RTS queue pair",
            opname
        );
        let slot = Arc::new(CompletionSlot::default());
        let callback: CompletionCallback = {
            let slot = slot.clone();
            Box::new(move |wc| slot.complete(*wc))
        };
        let wr_id = callback_into_wr_id(callback);
        let wr = SendWr {
            wr_id,
            sge,
            op,
            signaled: true,
        };
        log::trace!("post send wr_id={:#x} addr={:#x}", wr_id, sge.addr);
        if let Err(e) = self.inner.qp.post_send(&wr) {
            // The driver never saw the request; take the callback back.
            // SAFETY: produced above, consumed once here.
            drop(unsafe { callback_from_wr_id(wr_id) });
            return Err(Error::resource("failed to post send", e));
        }
        Ok(slot.wait().await)
    }

    async fn submit_recv(&self, sge: Sge) -> Result<Wc> {
        assert_eq!(
            self.state(),
            QpState::Rts,
            "recv requires an RTS queue pair"
        );
        let slot = Arc::new(CompletionSlot::default());
        let callback: CompletionCallback = {
            let slot = slot.clone();
            Box::new(move |wc| slot.complete(*wc))
        };
        let wr_id = callback_into_wr_id(callback);
        let wr = RecvWr { wr_id, sge };
        log::trace!("post recv wr_id={:#x} addr={:#x}", wr_id, sge.addr);
        let posted = match &self.inner.srq {
            Some(srq) => srq.post_recv(&wr),
            None => self.inner.qp.post_recv(&wr),
        };
        if let Err(e) = posted {
            // SAFETY: produced above, consumed once here.
            drop(unsafe { callback_from_wr_id(wr_id) });
            return Err(Error::resource("failed to post recv", e));
        }
        Ok(slot.wait().await)
    }

    fn send_result(opname: &'static str, wc: Wc) -> Result<usize> {
        match wc.status() {
            WcStatus::Success => Ok(wc.bytes()),
            status => Err(Error::Completion { op: opname, status }),
        }
    }

    /// Send the contents of a registered slice. Resolves to the number of
    /// bytes sent.
    pub async fn send_mr(&self, local: MrSlice<'_>) -> Result<usize> {
        let wc = self.submit_send(local.as_sge(), SendOp::Send, "send").await?;
        Self::send_result("send", wc)
    }

    /// Send the contents of `buf`, registering it for the duration.
    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        let mr = Mr::reg(self.pd(), buf, Access::default())?;
        self.send_mr(mr.as_slice()).await
    }

    /// Post a receive into a registered slice. Resolves to the byte count
    /// and the immediate, present iff the sender supplied one.
    pub async fn recv_mr(&self, local: MrSlice<'_>) -> Result<(usize, Option<ImmData>)> {
        let wc = self.submit_recv(local.as_sge()).await?;
        match wc.status() {
            WcStatus::Success => Ok((wc.bytes(), wc.imm())),
            status => Err(Error::Completion { op: "recv", status }),
        }
    }

    /// Post a receive into `buf`, registering it for the duration.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<(usize, Option<ImmData>)> {
        let mr = Mr::reg(self.pd(), buf, Access::default())?;
        self.recv_mr(mr.as_slice()).await
    }

    /// RDMA-write a registered slice to remote memory. Resolves to the
    /// number of bytes written.
    pub async fn write_mr(&self, remote: &MrRemote, local: MrSlice<'_>) -> Result<usize> {
        let op = SendOp::Write {
            remote_addr: remote.addr,
            rkey: remote.rkey,
            imm: None,
        };
        let wc = self.submit_send(local.as_sge(), op, "write").await?;
        Self::send_result("write", wc)
    }

    /// RDMA-write `buf` to remote memory, registering it for the duration.
    pub async fn write(&self, remote: &MrRemote, buf: &[u8]) -> Result<usize> {
        let mr = Mr::reg(self.pd(), buf, Access::default())?;
        self.write_mr(remote, mr.as_slice()).await
    }

    /// RDMA-write a registered slice with an immediate value, consuming one
    /// receive on the responder.
    pub async fn write_with_imm_mr(
        &self,
        remote: &MrRemote,
        local: MrSlice<'_>,
        imm: ImmData,
    ) -> Result<usize> {
        let op = SendOp::Write {
            remote_addr: remote.addr,
            rkey: remote.rkey,
            imm: Some(imm),
        };
        let wc = self.submit_send(local.as_sge(), op, "write").await?;
        Self::send_result("write", wc)
    }

    /// RDMA-write `buf` with an immediate value, registering the buffer for
    /// the duration.
    pub async fn write_with_imm(
        &self,
        remote: &MrRemote,
        buf: &[u8],
        imm: ImmData,
    ) -> Result<usize> {
        let mr = Mr::reg(self.pd(), buf, Access::default())?;
        self.write_with_imm_mr(remote, mr.as_slice(), imm).await
    }

    /// RDMA-read remote memory into a registered slice. Resolves to the
    /// number of bytes read.
    pub async fn read_mr(&self, remote: &MrRemote, local: MrSlice<'_>) -> Result<usize> {
        let op = SendOp::Read {
            remote_addr: remote.addr,
            rkey: remote.rkey,
        };
        let wc = self.submit_send(local.as_sge(), op, "read").await?;
        Self::send_result("read", wc)
    }

    /// RDMA-read remote memory into `buf`, registering it for the duration.
    pub async fn read(&self, remote: &MrRemote, buf: &mut [u8]) -> Result<usize> {
        let mr = Mr::reg(self.pd(), buf, Access::default())?;
        self.read_mr(remote, mr.as_slice()).await
    }

    /// 64-bit fetch-and-add on remote memory; the previous remote value
    /// lands in `local`.
    ///
    /// # Panics
    ///
    /// Panics if the device does not advertise atomics or `local` is not
    /// exactly 8 bytes.
    pub async fn fetch_and_add_mr(
        &self,
        remote: &MrRemote,
        local: MrSlice<'_>,
        add: u64,
    ) -> Result<usize> {
        assert!(
            self.pd().device().is_fetch_and_add_supported(),
            "device does not support fetch-and-add"
        );
        assert_eq!(local.len(), 8, "fetch-and-add requires an 8-byte buffer");
        let op = SendOp::FetchAdd {
            remote_addr: remote.addr,
            rkey: remote.rkey,
            add,
        };
        let wc = self.submit_send(local.as_sge(), op, "fetch-add").await?;
        Self::send_result("fetch-add", wc)
    }

    /// 64-bit fetch-and-add through a temporarily registered buffer.
    pub async fn fetch_and_add(
        &self,
        remote: &MrRemote,
        buf: &mut [u8],
        add: u64,
    ) -> Result<usize> {
        let mr = Mr::reg(self.pd(), buf, Access::default())?;
        self.fetch_and_add_mr(remote, mr.as_slice(), add).await
    }

    /// 64-bit compare-and-swap on remote memory; the previous remote value
    /// lands in `local`. The swap happens iff the remote value equals
    /// `compare`.
    ///
    /// # Panics
    ///
    /// Panics if the device does not advertise atomics or `local` is not
    /// exactly 8 bytes.
    pub async fn compare_and_swap_mr(
        &self,
        remote: &MrRemote,
        local: MrSlice<'_>,
        compare: u64,
        swap: u64,
    ) -> Result<usize> {
        assert!(
            self.pd().device().is_compare_and_swap_supported(),
            "device does not support compare-and-swap"
        );
        assert_eq!(local.len(), 8, "compare-and-swap requires an 8-byte buffer");
        let op = SendOp::CompSwap {
            remote_addr: remote.addr,
            rkey: remote.rkey,
            compare,
            swap,
        };
        let wc = self.submit_send(local.as_sge(), op, "compare-swap").await?;
        Self::send_result("compare-swap", wc)
    }

    /// 64-bit compare-and-swap through a temporarily registered buffer.
    pub async fn compare_and_swap(
        &self,
        remote: &MrRemote,
        buf: &mut [u8],
        compare: u64,
        swap: u64,
    ) -> Result<usize> {
        let mr = Mr::reg(self.pd(), buf, Access::default())?;
        self.compare_and_swap_mr(remote, mr.as_slice(), compare, swap)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use super::*;

    #[test]
    fn sq_psns_are_unique_and_increasing() {
        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| (0..256).map(|_| alloc_sq_psn()).collect::<Vec<_>>()))
            .collect();
        let mut all = Vec::new();
        for handle in handles {
            let psns = handle.join().unwrap();
            // Strictly increasing within each thread.
            assert!(psns.windows(2).all(|w| w[0] < w[1]));
            all.extend(psns);
        }
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
        assert!(all.iter().all(|&psn| psn >= 1));
    }
}
