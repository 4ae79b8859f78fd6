//! The rendezvous wire protocol.
//!
//! Sender: serialize the QP and write every byte, handling short writes.
//! Receiver: read exactly the fixed-size header, then the advertised number
//! of user data bytes, handling short reads. A zero-byte transfer in the
//! middle of a record means the peer vanished and fails the handshake.

use crate::error::{Error, Result};
use crate::rdma::qp::{Qp, QpEndpoint};
use crate::socket::TcpConnection;

/// Send this side's serialized QP over the connection.
pub(crate) async fn send_qp(connection: &TcpConnection, qp: &Qp) -> Result<()> {
    let data = qp.serialize();
    debug_assert!(!data.is_empty());
    let mut sent = 0;
    while sent < data.len() {
        let n = connection.send(&data[sent..]).await?;
        if n == 0 {
            return Err(Error::UnexpectedClose("sending qp"));
        }
        sent += n;
    }
    let endpoint = qp.endpoint();
    log::trace!(
        "sent qp lid={} qpn={} psn={} user_data_size={}",
        endpoint.lid,
        endpoint.qpn,
        endpoint.psn,
        endpoint.user_data.len()
    );
    Ok(())
}

/// Receive the remote QP header and user data over the connection.
pub(crate) async fn recv_qp(connection: &TcpConnection) -> Result<QpEndpoint> {
    let mut header = [0u8; QpEndpoint::HEADER_LEN];
    let mut read = 0;
    while read < header.len() {
        let n = connection.recv(&mut header[read..]).await?;
        if n == 0 {
            return Err(Error::UnexpectedClose("receiving qp header"));
        }
        read += n;
    }
    let (mut remote, user_data_size) = QpEndpoint::deserialize_header(&header)?;
    log::trace!(
        "received header lid={} qpn={} psn={} user_data_size={}",
        remote.lid,
        remote.qpn,
        remote.psn,
        user_data_size
    );

    if user_data_size > 0 {
        let mut user_data = vec![0u8; user_data_size];
        let mut read = 0;
        while read < user_data.len() {
            let n = connection.recv(&mut user_data[read..]).await?;
            if n == 0 {
                return Err(Error::UnexpectedClose("receiving user data"));
            }
            read += n;
        }
        remote.user_data = user_data;
    }
    Ok(remote)
}
