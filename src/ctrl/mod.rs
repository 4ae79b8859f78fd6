//! Connection management: the TCP rendezvous that hands back connected QPs.

mod acceptor;
mod connector;
mod handshake;

pub use acceptor::Acceptor;
pub use connector::Connector;
