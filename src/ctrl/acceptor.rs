//! The passive side of the rendezvous.

use std::net::SocketAddr;
use std::sync::Arc;

use super::handshake;
use crate::error::Result;
use crate::rdma::{cq::Cq, pd::Pd, qp::*, srq::Srq};
use crate::socket::{EventLoop, TcpConnection, TcpListener};

/// Accepts incoming rendezvous connections and hands back queue pairs that
/// are already in RTS.
pub struct Acceptor {
    listener: TcpListener,
    pd: Pd,
    send_cq: Cq,
    recv_cq: Cq,
    srq: Option<Srq>,
    tuning: QpTuning,
}

impl Acceptor {
    /// Listen on `(hostname | any, port)`, creating all new QPs on `pd` with
    /// `cq` serving both directions.
    pub fn new(
        event_loop: &Arc<EventLoop>,
        hostname: Option<&str>,
        port: u16,
        pd: &Pd,
        cq: &Cq,
    ) -> Result<Self> {
        Self::with_cqs(event_loop, hostname, port, pd, cq, cq, None)
    }

    /// Listen with distinct send/recv CQs and an optional SRQ for incoming
    /// queue pairs.
    pub fn with_cqs(
        event_loop: &Arc<EventLoop>,
        hostname: Option<&str>,
        port: u16,
        pd: &Pd,
        send_cq: &Cq,
        recv_cq: &Cq,
        srq: Option<&Srq>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(event_loop, hostname, port)?;
        Ok(Acceptor {
            listener,
            pd: pd.clone(),
            send_cq: send_cq.clone(),
            recv_cq: recv_cq.clone(),
            srq: srq.cloned(),
            tuning: QpTuning::default(),
        })
    }

    /// Override the connection timers applied to accepted QPs.
    pub fn set_tuning(&mut self, tuning: QpTuning) {
        self.tuning = tuning;
    }

    /// The address the acceptor is listening on.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Accept one connection and exchange QP identifiers over it.
    ///
    /// The acceptor receives the remote header first and sends its own
    /// afterwards, so the returned QP is already in RTS and carries the
    /// peer's user data. Call in a loop to serve multiple peers; a failed
    /// handshake tears down the partially built QP and leaves the listener
    /// usable.
    pub async fn accept(&self) -> Result<Qp> {
        let connection = self.listener.accept().await?;
        self.accept_on(&connection).await
    }

    async fn accept_on(&self, connection: &TcpConnection) -> Result<Qp> {
        let remote = handshake::recv_qp(connection).await?;

        let mut builder = Qp::builder()
            .send_cq(&self.send_cq)
            .recv_cq(&self.recv_cq)
            .tuning(self.tuning);
        if let Some(srq) = &self.srq {
            builder = builder.srq(srq);
        }
        let qp = builder.build(&self.pd)?;
        qp.connect(&remote)?;
        qp.set_user_data(remote.user_data);

        handshake::send_qp(connection, &qp).await?;
        Ok(qp)
    }
}
