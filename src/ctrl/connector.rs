//! The active side of the rendezvous.

use std::sync::Arc;

use super::handshake;
use crate::error::Result;
use crate::rdma::{cq::Cq, pd::Pd, qp::*, srq::Srq};
use crate::socket::{EventLoop, TcpConnection};

/// Connects to an [`Acceptor`](super::Acceptor) and hands back a queue pair
/// that is already in RTS.
pub struct Connector {
    event_loop: Arc<EventLoop>,
    hostname: String,
    port: u16,
    pd: Pd,
    send_cq: Cq,
    recv_cq: Cq,
    srq: Option<Srq>,
    tuning: QpTuning,
    user_data: Vec<u8>,
}

impl Connector {
    /// Create a connector for `(hostname, port)`, creating QPs on `pd` with
    /// `cq` serving both directions.
    pub fn new(
        event_loop: &Arc<EventLoop>,
        hostname: impl Into<String>,
        port: u16,
        pd: &Pd,
        cq: &Cq,
    ) -> Self {
        Self::with_cqs(event_loop, hostname, port, pd, cq, cq, None)
    }

    /// Create a connector with distinct send/recv CQs and an optional SRQ.
    pub fn with_cqs(
        event_loop: &Arc<EventLoop>,
        hostname: impl Into<String>,
        port: u16,
        pd: &Pd,
        send_cq: &Cq,
        recv_cq: &Cq,
        srq: Option<&Srq>,
    ) -> Self {
        Connector {
            event_loop: event_loop.clone(),
            hostname: hostname.into(),
            port,
            pd: pd.clone(),
            send_cq: send_cq.clone(),
            recv_cq: recv_cq.clone(),
            srq: srq.cloned(),
            tuning: QpTuning::default(),
            user_data: Vec::new(),
        }
    }

    /// Override the connection timers applied to new QPs.
    pub fn set_tuning(&mut self, tuning: QpTuning) {
        self.tuning = tuning;
    }

    /// Set the opaque payload advertised to the acceptor, e.g. an identity
    /// for the connection.
    pub fn set_user_data(&mut self, user_data: Vec<u8>) {
        self.user_data = user_data;
    }

    /// Establish one connection: TCP handshake, QP identifier exchange, and
    /// the RTR/RTS transitions.
    ///
    /// The connector sends its header first and receives the remote's
    /// afterwards, so each side knows the peer's QPN and PSN before leaving
    /// INIT.
    pub async fn connect(&self) -> Result<Qp> {
        let connection =
            TcpConnection::connect(&self.event_loop, &self.hostname, self.port).await?;

        let mut builder = Qp::builder()
            .send_cq(&self.send_cq)
            .recv_cq(&self.recv_cq)
            .tuning(self.tuning)
            .user_data(self.user_data.clone());
        if let Some(srq) = &self.srq {
            builder = builder.srq(srq);
        }
        let qp = builder.build(&self.pd)?;

        handshake::send_qp(&connection, &qp).await?;
        let remote = handshake::recv_qp(&connection).await?;

        qp.rtr(&remote)?;
        qp.set_user_data(remote.user_data);
        qp.rts()?;
        Ok(qp)
    }
}
