//! Awaitable InfiniBand / RoCE RC queue pairs.
//!
//! This crate layers three pieces on top of a verbs-style driver:
//!
//! - a queue pair engine ([`Qp`]) that drives RC QPs through their state
//!   transitions and exposes send/recv/RDMA/atomic operations as
//!   awaitables, resolved when the matching completion arrives;
//! - a completion pipeline ([`exec`]) that turns synchronous CQ polling
//!   into per-request callbacks delivered on a worker pool, keyed by
//!   work-request ID;
//! - an out-of-band TCP rendezvous ([`ctrl`]) with its own event loop and
//!   awaitable sockets ([`socket`]), exchanging QP identifiers so two peers
//!   come up connected.
//!
//! The driver itself is a trait ([`verbs::Driver`]); [`verbs::sim`] provides
//! an in-process implementation so the stack runs (and is tested) without
//! hardware.
//!
//! There is no first-class cancellation. Tearing down the CQ poller stops
//! completion routing, and a task still suspended on a completion will never
//! resume, so shut down in order: application tasks, then QPs, then the CQ
//! poller, then CQs, PDs, and the device. Closing the event loop makes
//! pending socket operations fail instead.
//!
//! # Example
//!
//! ```no_run
//! use rdmawait::verbs::sim::SimFabric;
//! use rdmawait::{ctrl::Connector, exec::CqPoller, socket::EventLoop, task::Task};
//! use rdmawait::{Cq, Device, Pd};
//!
//! # fn main() -> rdmawait::Result<()> {
//! let fabric = SimFabric::new();
//! let device = Device::open(&fabric, 0, 1)?;
//! let pd = Pd::new(&device)?;
//! let cq = Cq::with_default_depth(&device)?;
//! let _poller = CqPoller::new(&cq);
//!
//! let event_loop = EventLoop::new()?;
//! let looper = {
//!     let event_loop = event_loop.clone();
//!     std::thread::spawn(move || event_loop.run())
//! };
//!
//! let connector = Connector::new(&event_loop, "server.example", 13337, &pd, &cq);
//! let task = Task::spawn(async move {
//!     let qp = connector.connect().await?;
//!     let mut buffer = [0u8; 6];
//!     qp.recv(&mut buffer).await?;
//!     qp.send(b"world\0").await?;
//!     Ok::<_, rdmawait::Error>(())
//! });
//! task.join()?;
//!
//! event_loop.close();
//! looper.join().unwrap()?;
//! # Ok(())
//! # }
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("`rdmawait` currently only supports Linux");

/// Shared utility functions.
mod utils;

/// Crate-level error type.
mod error;

/// RDMA resources.
/// Not publicly exposed as a module; necessary items are `pub use`d.
mod rdma;

pub use error::{Error, Result};
pub use rdma::cq::*;
pub use rdma::device::*;
pub use rdma::mr::*;
pub use rdma::pd::*;
pub use rdma::qp::*;
pub use rdma::srq::*;

/// The verbs driver contract and the simulated driver.
pub mod verbs;

/// Completion dispatch: CQ poller and executor.
pub mod exec;

/// The task primitive.
pub mod task;

/// Event loop and awaitable TCP sockets.
pub mod socket;

/// Connection management (acceptor / connector rendezvous).
pub mod ctrl;

/// Deployment configuration.
pub mod config;

/// Higher-level wrappings of RDMA resources.
pub mod wrap;

pub use verbs::types::{
    Access, Gid, ImmData, Lid, Psn, QpCaps, QpState, Qpn, Wc, WcOpcode, WcStatus, WrId,
};
