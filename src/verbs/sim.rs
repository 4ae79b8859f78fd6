//! An in-process driver satisfying the verbs contract.
//!
//! [`SimFabric`] models a fabric of devices inside one address space: QPs are
//! routed by QP number, MRs are enforced by rkey and range, two-sided sends
//! that arrive before a receive is posted wait like an RNR-NAKed requester,
//! and completions land in per-CQ queues drained by [`RawCq::poll`].
//!
//! The test suite runs the whole stack against this driver; embedders can use
//! it as a loopback transport where no RDMA hardware is present.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Error as IoError, ErrorKind as IoErrorKind};
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::types::*;
use super::{Driver, RawContext, RawCq, RawMr, RawPd, RawQp, RawSrq};

fn invalid(msg: &'static str) -> IoError {
    IoError::new(IoErrorKind::InvalidInput, msg)
}

#[derive(Clone, Copy)]
struct MrRecord {
    addr: usize,
    len: usize,
    access: Access,
}

struct DeviceEntry {
    name: String,
    lid: Lid,
}

struct FabricInner {
    devices: Vec<DeviceEntry>,
    qps: Mutex<HashMap<Qpn, Weak<QpShared>>>,
    mrs: Mutex<HashMap<RKey, MrRecord>>,
    next_qpn: AtomicU32,
    next_key: AtomicU32,
    /// Serializes all remote atomic operations, fabric-wide.
    atomics: Mutex<()>,
}

impl FabricInner {
    fn lookup_qp(&self, qpn: Qpn) -> Option<Arc<QpShared>> {
        self.qps.lock().unwrap().get(&qpn).and_then(Weak::upgrade)
    }

    fn check_local(&self, sge: &Sge) -> Result<(), WcStatus> {
        self.check_key(sge.lkey, sge.addr, sge.len as usize, None)
            .map_err(|_| WcStatus::LocProtErr)
    }

    fn check_remote(&self, addr: u64, len: usize, rkey: RKey, need: Access) -> Result<(), WcStatus> {
        self.check_key(rkey, addr, len, Some(need))
            .map_err(|_| WcStatus::RemAccessErr)
    }

    fn check_key(&self, key: u32, addr: u64, len: usize, need: Option<Access>) -> Result<(), ()> {
        let mrs = self.mrs.lock().unwrap();
        let record = mrs.get(&key).ok_or(())?;
        if let Some(need) = need {
            if !record.access.contains(need) {
                return Err(());
            }
        }
        let start = record.addr as u64;
        let end = start + record.len as u64;
        if addr < start || addr.checked_add(len as u64).ok_or(())? > end {
            return Err(());
        }
        Ok(())
    }
}

/// An in-process fabric of simulated devices.
#[derive(Clone)]
pub struct SimFabric {
    inner: Arc<FabricInner>,
}

impl SimFabric {
    /// Create a fabric with a single device `sim0` (LID 1).
    pub fn new() -> Self {
        Self::with_devices(1)
    }

    /// Create a fabric with `count` devices `sim0..simN`, LIDs starting at 1.
    pub fn with_devices(count: usize) -> Self {
        let devices = (0..count)
            .map(|i| DeviceEntry {
                name: format!("sim{}", i),
                lid: (i + 1) as Lid,
            })
            .collect();
        SimFabric {
            inner: Arc::new(FabricInner {
                devices,
                qps: Mutex::new(HashMap::new()),
                mrs: Mutex::new(HashMap::new()),
                next_qpn: AtomicU32::new(0x100),
                next_key: AtomicU32::new(1),
                atomics: Mutex::new(()),
            }),
        }
    }
}

impl Default for SimFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SimFabric {
    fn device_names(&self) -> io::Result<Vec<String>> {
        Ok(self.inner.devices.iter().map(|d| d.name.clone()).collect())
    }

    fn open(&self, name: &str) -> io::Result<Arc<dyn RawContext>> {
        let entry = self
            .inner
            .devices
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| IoError::new(IoErrorKind::NotFound, "no such device"))?;
        Ok(Arc::new(SimContext {
            fabric: self.inner.clone(),
            lid: entry.lid,
        }))
    }
}

struct SimContext {
    fabric: Arc<FabricInner>,
    lid: Lid,
}

impl SimContext {
    fn gid(&self) -> Gid {
        // Link-local style GID derived from the LID.
        let mut raw = [0u8; 16];
        raw[0] = 0xfe;
        raw[1] = 0x80;
        raw[14..16].copy_from_slice(&self.lid.to_be_bytes());
        Gid::from(raw)
    }
}

impl RawContext for SimContext {
    fn query_port(&self, port_num: PortNum) -> io::Result<PortAttr> {
        if port_num != 1 {
            return Err(invalid("simulated devices have a single port"));
        }
        Ok(PortAttr {
            lid: self.lid,
            state: PortState::Active,
        })
    }

    fn query_gid(&self, port_num: PortNum, _index: GidIndex) -> io::Result<Gid> {
        if port_num != 1 {
            return Err(invalid("simulated devices have a single port"));
        }
        Ok(self.gid())
    }

    fn query_device(&self) -> io::Result<DeviceAttr> {
        Ok(DeviceAttr {
            atomic_cap: AtomicCap::Hca,
            max_cqe: 4096,
            max_qp_wr: 4096,
            max_sge: 16,
        })
    }

    fn alloc_pd(&self) -> io::Result<Box<dyn RawPd>> {
        Ok(Box::new(SimPd {
            fabric: self.fabric.clone(),
        }))
    }

    fn create_cq(&self, _capacity: u32) -> io::Result<Box<dyn RawCq>> {
        Ok(Box::new(SimCq {
            shared: Arc::new(CqShared {
                queue: Mutex::new(VecDeque::new()),
            }),
        }))
    }
}

struct SimPd {
    fabric: Arc<FabricInner>,
}

impl RawPd for SimPd {
    fn reg_mr(&self, addr: *mut u8, len: usize, access: Access) -> io::Result<Box<dyn RawMr>> {
        let key = self.fabric.next_key.fetch_add(1, Ordering::Relaxed);
        self.fabric.mrs.lock().unwrap().insert(
            key,
            MrRecord {
                addr: addr as usize,
                len,
                access,
            },
        );
        Ok(Box::new(SimMr {
            fabric: self.fabric.clone(),
            key,
            addr: addr as usize,
            len,
        }))
    }

    fn create_srq(&self, _max_wr: u32) -> io::Result<Box<dyn RawSrq>> {
        Ok(Box::new(SimSrq {
            shared: Arc::new(RqShared::new()),
        }))
    }

    fn create_qp(&self, attr: QpInitAttr<'_>) -> io::Result<Box<dyn RawQp>> {
        let send_cq = downcast_cq(attr.send_cq)?;
        let recv_cq = downcast_cq(attr.recv_cq)?;
        let rq = match attr.srq {
            Some(srq) => srq
                .as_any()
                .downcast_ref::<SimSrq>()
                .ok_or_else(|| invalid("SRQ was not created by this driver"))?
                .shared
                .clone(),
            None => Arc::new(RqShared::new()),
        };

        let qpn = self.fabric.next_qpn.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(QpShared {
            qpn,
            fabric: self.fabric.clone(),
            conn: Mutex::new(ConnState {
                state: QpState::Reset,
                dest_qpn: None,
            }),
            rq,
            send_cq,
            recv_cq,
        });
        self.fabric
            .qps
            .lock()
            .unwrap()
            .insert(qpn, Arc::downgrade(&shared));
        Ok(Box::new(SimQp { shared }))
    }
}

fn downcast_cq(cq: &dyn RawCq) -> io::Result<Arc<CqShared>> {
    Ok(cq
        .as_any()
        .downcast_ref::<SimCq>()
        .ok_or_else(|| invalid("CQ was not created by this driver"))?
        .shared
        .clone())
}

struct SimMr {
    fabric: Arc<FabricInner>,
    key: u32,
    addr: usize,
    len: usize,
}

impl RawMr for SimMr {
    fn addr(&self) -> *mut u8 {
        self.addr as *mut u8
    }

    fn len(&self) -> usize {
        self.len
    }

    fn lkey(&self) -> LKey {
        self.key
    }

    fn rkey(&self) -> RKey {
        self.key
    }
}

impl Drop for SimMr {
    fn drop(&mut self) {
        self.fabric.mrs.lock().unwrap().remove(&self.key);
    }
}

struct CqShared {
    queue: Mutex<VecDeque<Wc>>,
}

impl CqShared {
    fn push(&self, wc: Wc) {
        self.queue.lock().unwrap().push_back(wc);
    }
}

struct SimCq {
    shared: Arc<CqShared>,
}

impl RawCq for SimCq {
    fn poll(&self, wc: &mut [Wc]) -> io::Result<usize> {
        let mut queue = self.shared.queue.lock().unwrap();
        let mut polled = 0;
        while polled < wc.len() {
            match queue.pop_front() {
                Some(entry) => {
                    wc[polled] = entry;
                    polled += 1;
                }
                None => break,
            }
        }
        Ok(polled)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// What an inbound message needs from the responder's receive queue.
enum InboundKind {
    /// Payload of a two-sided send, copied out of the requester's buffer.
    SendData(Vec<u8>),
    /// An RDMA write with immediate whose data is already placed.
    WriteImm,
}

/// A message waiting for (or matched with) a receive work request. Carries
/// everything needed to complete both sides once a receive is available.
struct Inbound {
    kind: InboundKind,
    imm: Option<ImmData>,
    dst_qpn: Qpn,
    dst_cq: Arc<CqShared>,
    src_qpn: Qpn,
    src_cq: Arc<CqShared>,
    src_wr_id: WrId,
    src_opcode: WcOpcode,
    src_byte_len: u32,
}

struct RqInner {
    wrs: VecDeque<RecvWr>,
    pending: VecDeque<Inbound>,
}

/// A receive endpoint: either a QP's own receive queue or an SRQ shared
/// between several QPs.
struct RqShared {
    inner: Mutex<RqInner>,
}

impl RqShared {
    fn new() -> Self {
        RqShared {
            inner: Mutex::new(RqInner {
                wrs: VecDeque::new(),
                pending: VecDeque::new(),
            }),
        }
    }

    /// Deliver an inbound message, matching it with a posted receive or
    /// parking it until one shows up.
    fn deliver(&self, inbound: Inbound) {
        let wr = {
            let mut inner = self.inner.lock().unwrap();
            match inner.wrs.pop_front() {
                Some(wr) => wr,
                None => {
                    inner.pending.push_back(inbound);
                    return;
                }
            }
        };
        complete_match(wr, inbound);
    }

    /// Post a receive, matching it with a parked message if one is waiting.
    fn post(&self, wr: RecvWr) {
        let inbound = {
            let mut inner = self.inner.lock().unwrap();
            match inner.pending.pop_front() {
                Some(inbound) => inbound,
                None => {
                    inner.wrs.push_back(wr);
                    return;
                }
            }
        };
        complete_match(wr, inbound);
    }
}

/// Complete a matched (receive, inbound) pair on both CQs.
fn complete_match(wr: RecvWr, inbound: Inbound) {
    match inbound.kind {
        InboundKind::SendData(data) => {
            if data.len() > wr.sge.len as usize {
                inbound.dst_cq.push(Wc {
                    wr_id: wr.wr_id,
                    status: WcStatus::LocLenErr,
                    opcode: WcOpcode::Recv,
                    byte_len: 0,
                    imm: None,
                    qp_num: inbound.dst_qpn,
                });
                inbound.src_cq.push(Wc {
                    wr_id: inbound.src_wr_id,
                    status: WcStatus::RemInvReqErr,
                    opcode: inbound.src_opcode,
                    byte_len: 0,
                    imm: None,
                    qp_num: inbound.src_qpn,
                });
                return;
            }
            // SAFETY: the SGE was range-checked against a registered MR at
            // post time and the posting task keeps the MR alive until its
            // completion is delivered below.
            unsafe {
                ptr::copy_nonoverlapping(data.as_ptr(), wr.sge.addr as *mut u8, data.len());
            }
            inbound.dst_cq.push(Wc {
                wr_id: wr.wr_id,
                status: WcStatus::Success,
                opcode: WcOpcode::Recv,
                byte_len: data.len() as u32,
                imm: inbound.imm,
                qp_num: inbound.dst_qpn,
            });
        }
        InboundKind::WriteImm => {
            // The data was placed by the RDMA write itself; the consumed
            // receive reports only the immediate.
            inbound.dst_cq.push(Wc {
                wr_id: wr.wr_id,
                status: WcStatus::Success,
                opcode: WcOpcode::RecvRdmaImm,
                byte_len: 0,
                imm: inbound.imm,
                qp_num: inbound.dst_qpn,
            });
        }
    }
    inbound.src_cq.push(Wc {
        wr_id: inbound.src_wr_id,
        status: WcStatus::Success,
        opcode: inbound.src_opcode,
        byte_len: inbound.src_byte_len,
        imm: None,
        qp_num: inbound.src_qpn,
    });
}

struct ConnState {
    state: QpState,
    dest_qpn: Option<Qpn>,
}

struct QpShared {
    qpn: Qpn,
    fabric: Arc<FabricInner>,
    conn: Mutex<ConnState>,
    rq: Arc<RqShared>,
    send_cq: Arc<CqShared>,
    recv_cq: Arc<CqShared>,
}

struct SimSrq {
    shared: Arc<RqShared>,
}

impl RawSrq for SimSrq {
    fn post_recv(&self, wr: &RecvWr) -> io::Result<()> {
        self.shared.post(*wr);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct SimQp {
    shared: Arc<QpShared>,
}

impl SimQp {
    /// Push an error completion for a send-side work request.
    fn fail_send(&self, wr: &SendWr, status: WcStatus, opcode: WcOpcode) {
        self.shared.send_cq.push(Wc {
            wr_id: wr.wr_id,
            status,
            opcode,
            byte_len: 0,
            imm: None,
            qp_num: self.shared.qpn,
        });
    }

    /// Push a success completion for a send-side work request.
    fn complete_send(&self, wr: &SendWr, opcode: WcOpcode, byte_len: u32) {
        self.shared.send_cq.push(Wc {
            wr_id: wr.wr_id,
            status: WcStatus::Success,
            opcode,
            byte_len,
            imm: None,
            qp_num: self.shared.qpn,
        });
    }
}

impl RawQp for SimQp {
    fn qp_num(&self) -> Qpn {
        self.shared.qpn
    }

    fn modify_reset2init(&self, _attr: &InitAttr) -> io::Result<()> {
        let mut conn = self.shared.conn.lock().unwrap();
        if conn.state != QpState::Reset {
            return Err(invalid("QP not in RESET"));
        }
        conn.state = QpState::Init;
        Ok(())
    }

    fn modify_init2rtr(&self, attr: &RtrAttr) -> io::Result<()> {
        let mut conn = self.shared.conn.lock().unwrap();
        if conn.state != QpState::Init {
            return Err(invalid("QP not in INIT"));
        }
        conn.state = QpState::Rtr;
        conn.dest_qpn = Some(attr.dest_qp_num);
        Ok(())
    }

    fn modify_rtr2rts(&self, _attr: &RtsAttr) -> io::Result<()> {
        let mut conn = self.shared.conn.lock().unwrap();
        if conn.state != QpState::Rtr {
            return Err(invalid("QP not in RTR"));
        }
        conn.state = QpState::Rts;
        Ok(())
    }

    fn post_send(&self, wr: &SendWr) -> io::Result<()> {
        let fabric = &self.shared.fabric;
        let dest_qpn = {
            let conn = self.shared.conn.lock().unwrap();
            if conn.state != QpState::Rts {
                return Err(invalid("QP not in RTS"));
            }
            conn.dest_qpn.expect("RTS without destination")
        };
        if fabric.check_local(&wr.sge).is_err() {
            return Err(invalid("SGE does not match a registered MR"));
        }

        let opcode = match wr.op {
            SendOp::Send => WcOpcode::Send,
            SendOp::Write { .. } => WcOpcode::RdmaWrite,
            SendOp::Read { .. } => WcOpcode::RdmaRead,
            SendOp::FetchAdd { .. } => WcOpcode::FetchAdd,
            SendOp::CompSwap { .. } => WcOpcode::CompSwap,
        };
        let peer = match fabric.lookup_qp(dest_qpn) {
            Some(peer) => peer,
            None => {
                // The remote QP is gone; a real requester would exhaust its
                // retry budget.
                self.fail_send(wr, WcStatus::RetryExcErr, opcode);
                return Ok(());
            }
        };
        let len = wr.sge.len as usize;

        match wr.op {
            SendOp::Send => {
                // SAFETY: range-checked above; the poster keeps the MR alive
                // until the completion arrives.
                let data =
                    unsafe { slice::from_raw_parts(wr.sge.addr as *const u8, len) }.to_vec();
                peer.rq.deliver(Inbound {
                    kind: InboundKind::SendData(data),
                    imm: None,
                    dst_qpn: peer.qpn,
                    dst_cq: peer.recv_cq.clone(),
                    src_qpn: self.shared.qpn,
                    src_cq: self.shared.send_cq.clone(),
                    src_wr_id: wr.wr_id,
                    src_opcode: opcode,
                    src_byte_len: len as u32,
                });
            }
            SendOp::Write {
                remote_addr,
                rkey,
                imm,
            } => {
                if let Err(status) =
                    fabric.check_remote(remote_addr, len, rkey, Access::REMOTE_WRITE)
                {
                    self.fail_send(wr, status, opcode);
                    return Ok(());
                }
                // SAFETY: both ranges were checked against registered MRs.
                unsafe {
                    ptr::copy_nonoverlapping(
                        wr.sge.addr as *const u8,
                        remote_addr as *mut u8,
                        len,
                    );
                }
                match imm {
                    Some(imm) => peer.rq.deliver(Inbound {
                        kind: InboundKind::WriteImm,
                        imm: Some(imm),
                        dst_qpn: peer.qpn,
                        dst_cq: peer.recv_cq.clone(),
                        src_qpn: self.shared.qpn,
                        src_cq: self.shared.send_cq.clone(),
                        src_wr_id: wr.wr_id,
                        src_opcode: opcode,
                        src_byte_len: len as u32,
                    }),
                    None => self.complete_send(wr, opcode, len as u32),
                }
            }
            SendOp::Read { remote_addr, rkey } => {
                if let Err(status) =
                    fabric.check_remote(remote_addr, len, rkey, Access::REMOTE_READ)
                {
                    self.fail_send(wr, status, opcode);
                    return Ok(());
                }
                // SAFETY: both ranges were checked against registered MRs.
                unsafe {
                    ptr::copy_nonoverlapping(
                        remote_addr as *const u8,
                        wr.sge.addr as *mut u8,
                        len,
                    );
                }
                self.complete_send(wr, opcode, len as u32);
            }
            SendOp::FetchAdd {
                remote_addr, rkey, add,
            } => {
                if let Err(status) = self.check_atomic(remote_addr, rkey, &wr.sge) {
                    self.fail_send(wr, status, opcode);
                    return Ok(());
                }
                let _guard = fabric.atomics.lock().unwrap();
                // SAFETY: 8-byte aligned, range-checked, serialized by the
                // fabric-wide atomics lock.
                unsafe {
                    let target = remote_addr as *mut u64;
                    let orig = ptr::read(target);
                    ptr::write(wr.sge.addr as *mut u64, orig);
                    ptr::write(target, orig.wrapping_add(add));
                }
                self.complete_send(wr, opcode, 8);
            }
            SendOp::CompSwap {
                remote_addr,
                rkey,
                compare,
                swap,
            } => {
                if let Err(status) = self.check_atomic(remote_addr, rkey, &wr.sge) {
                    self.fail_send(wr, status, opcode);
                    return Ok(());
                }
                let _guard = fabric.atomics.lock().unwrap();
                // SAFETY: 8-byte aligned, range-checked, serialized by the
                // fabric-wide atomics lock.
                unsafe {
                    let target = remote_addr as *mut u64;
                    let orig = ptr::read(target);
                    ptr::write(wr.sge.addr as *mut u64, orig);
                    if orig == compare {
                        ptr::write(target, swap);
                    }
                }
                self.complete_send(wr, opcode, 8);
            }
        }
        Ok(())
    }

    fn post_recv(&self, wr: &RecvWr) -> io::Result<()> {
        if self.shared.fabric.check_local(&wr.sge).is_err() {
            return Err(invalid("SGE does not match a registered MR"));
        }
        self.shared.rq.post(*wr);
        Ok(())
    }
}

impl SimQp {
    fn check_atomic(&self, remote_addr: u64, rkey: RKey, sge: &Sge) -> Result<(), WcStatus> {
        if sge.len != 8 || remote_addr % 8 != 0 || sge.addr % 8 != 0 {
            return Err(WcStatus::RemInvReqErr);
        }
        self.shared
            .fabric
            .check_remote(remote_addr, 8, rkey, Access::REMOTE_ATOMIC)
    }
}

impl Drop for SimQp {
    fn drop(&mut self) {
        self.shared
            .fabric
            .qps
            .lock()
            .unwrap()
            .remove(&self.shared.qpn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_stack(fabric: &SimFabric) -> (Arc<dyn RawContext>, Box<dyn RawPd>) {
        let ctx = fabric.open("sim0").unwrap();
        let pd = ctx.alloc_pd().unwrap();
        (ctx, pd)
    }

    fn connect(a: &dyn RawQp, b: &dyn RawQp) {
        for (qp, peer) in [(a, b.qp_num()), (b, a.qp_num())] {
            qp.modify_reset2init(&InitAttr {
                pkey_index: 0,
                port_num: 1,
                access: Access::default(),
            })
            .unwrap();
            qp.modify_init2rtr(&RtrAttr {
                path_mtu: Mtu::Mtu4096,
                dest_qp_num: peer,
                rq_psn: 1,
                max_dest_rd_atomic: 1,
                min_rnr_timer: 12,
                ah: AhAttr {
                    dlid: 1,
                    sl: 0,
                    src_path_bits: 0,
                    port_num: 1,
                    is_global: false,
                    dgid: Gid::ZERO,
                },
            })
            .unwrap();
            qp.modify_rtr2rts(&RtsAttr {
                timeout: 14,
                retry_cnt: 1,
                rnr_retry: 1,
                max_rd_atomic: 1,
                sq_psn: 1,
            })
            .unwrap();
        }
    }

    fn poll_one(cq: &dyn RawCq) -> Wc {
        let mut wc = [Wc::default()];
        loop {
            if cq.poll(&mut wc).unwrap() == 1 {
                return wc[0];
            }
        }
    }

    #[test]
    fn mr_registration_is_scoped() {
        let fabric = SimFabric::new();
        let (_ctx, pd) = open_stack(&fabric);
        let buf = vec![0u8; 64];
        let rkey = {
            let mr = pd
                .reg_mr(buf.as_ptr() as *mut u8, buf.len(), Access::default())
                .unwrap();
            assert_eq!(mr.len(), 64);
            mr.rkey()
        };
        // Deregistered on drop: remote access checks must now fail.
        assert!(fabric
            .inner
            .check_remote(buf.as_ptr() as u64, 8, rkey, Access::REMOTE_READ)
            .is_err());
    }

    #[test]
    fn send_waits_for_recv() {
        let fabric = SimFabric::new();
        let (ctx, pd) = open_stack(&fabric);
        let send_cq = ctx.create_cq(16).unwrap();
        let recv_cq = ctx.create_cq(16).unwrap();
        let mk = |pd: &dyn RawPd| {
            pd.create_qp(QpInitAttr {
                send_cq: send_cq.as_ref(),
                recv_cq: recv_cq.as_ref(),
                srq: None,
                caps: QpCaps::default(),
                sq_sig_all: false,
            })
            .unwrap()
        };
        let a = mk(pd.as_ref());
        let b = mk(pd.as_ref());
        connect(a.as_ref(), b.as_ref());

        let src = [5u8; 16];
        let mut dst = [0u8; 16];
        let src_mr = pd
            .reg_mr(src.as_ptr() as *mut u8, src.len(), Access::default())
            .unwrap();
        let dst_mr = pd
            .reg_mr(dst.as_mut_ptr(), dst.len(), Access::default())
            .unwrap();

        a.post_send(&SendWr {
            wr_id: 1,
            sge: Sge {
                addr: src.as_ptr() as u64,
                len: 16,
                lkey: src_mr.lkey(),
            },
            op: SendOp::Send,
            signaled: true,
        })
        .unwrap();

        // No receive posted yet: the message is parked, no completion.
        let mut scratch = [Wc::default()];
        assert_eq!(send_cq.poll(&mut scratch).unwrap(), 0);

        b.post_recv(&RecvWr {
            wr_id: 2,
            sge: Sge {
                addr: dst.as_mut_ptr() as u64,
                len: 16,
                lkey: dst_mr.lkey(),
            },
        })
        .unwrap();

        let send_wc = poll_one(send_cq.as_ref());
        assert_eq!(send_wc.wr_id(), 1);
        assert_eq!(send_wc.ok(), Ok(16));
        let recv_wc = poll_one(recv_cq.as_ref());
        assert_eq!(recv_wc.wr_id(), 2);
        assert_eq!(recv_wc.ok(), Ok(16));
        assert_eq!(dst, src);
    }
}
