//! End-to-end scenarios over the in-process driver and a real localhost TCP
//! rendezvous: two devices on one fabric, one event loop, a CQ poller per
//! side.

use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use rdmawait::ctrl::{Acceptor, Connector};
use rdmawait::exec::CqPoller;
use rdmawait::socket::EventLoop;
use rdmawait::task::Task;
use rdmawait::verbs::sim::SimFabric;
use rdmawait::verbs::types::QpState;
use rdmawait::wrap::RegisteredMem;
use rdmawait::{Cq, Device, Error, MrRemote, Pd};

struct Side {
    pd: Pd,
    cq: Cq,
    _poller: CqPoller,
}

fn side(fabric: &SimFabric, index: usize) -> Side {
    let device = Device::open(fabric, index, 1).unwrap();
    let pd = Pd::new(&device).unwrap();
    let cq = Cq::with_default_depth(&device).unwrap();
    let poller = CqPoller::new(&cq);
    Side {
        pd,
        cq,
        _poller: poller,
    }
}

struct Harness {
    event_loop: Arc<EventLoop>,
    looper: Option<JoinHandle<()>>,
    server: Side,
    client: Side,
}

fn harness() -> Harness {
    let fabric = SimFabric::with_devices(2);
    let event_loop = EventLoop::new().unwrap();
    let looper = {
        let event_loop = event_loop.clone();
        thread::spawn(move || event_loop.run().unwrap())
    };
    Harness {
        event_loop,
        looper: Some(looper),
        server: side(&fabric, 0),
        client: side(&fabric, 1),
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.event_loop.close();
        if let Some(looper) = self.looper.take() {
            looper.join().unwrap();
        }
    }
}

#[test]
fn hello_world_send_recv() -> Result<()> {
    let h = harness();

    let acceptor = Acceptor::new(&h.event_loop, None, 0, &h.server.pd, &h.server.cq)?;
    let port = acceptor.local_addr().port();

    let server = Task::spawn(async move {
        let qp = acceptor.accept().await?;
        assert_eq!(qp.user_data(), b"client-7".to_vec());

        let mut buffer = *b"hello\0";
        assert_eq!(qp.send(&buffer).await?, 6);
        let (received, imm) = qp.recv(&mut buffer).await?;
        assert_eq!((received, imm), (6, None));
        assert_eq!(&buffer, b"world\0");
        Ok::<_, Error>(())
    });

    let mut connector = Connector::new(&h.event_loop, "127.0.0.1", port, &h.client.pd, &h.client.cq);
    connector.set_user_data(b"client-7".to_vec());
    let client = Task::spawn(async move {
        let qp = connector.connect().await?;
        assert_eq!(qp.state(), QpState::Rts);

        let mut buffer = [0u8; 6];
        let (received, imm) = qp.recv(&mut buffer).await?;
        assert_eq!((received, imm), (6, None));
        assert_eq!(&buffer, b"hello\0");
        buffer.copy_from_slice(b"world\0");
        assert_eq!(qp.send(&buffer).await?, 6);
        Ok::<_, Error>(())
    });

    client.join()?;
    server.join()?;
    Ok(())
}

#[test]
fn rdma_write_with_immediate() -> Result<()> {
    let h = harness();

    let acceptor = Acceptor::new(&h.event_loop, None, 0, &h.server.pd, &h.server.cq)?;
    let port = acceptor.local_addr().port();
    let server_pd = h.server.pd.clone();

    let server = Task::spawn(async move {
        let qp = acceptor.accept().await?;
        let buffer = RegisteredMem::new(&server_pd, 6)?;

        // Hand the region to the peer, then wait for it to write into it.
        qp.send(&buffer.mr().serialize()).await?;
        let (received, imm) = qp.recv_mr(buffer.as_mr_slice()).await?;
        assert_eq!(received, 0);
        assert_eq!(imm, Some(1));
        assert_eq!(&buffer[..], b"world\0");
        Ok::<_, Error>(())
    });

    let connector = Connector::new(&h.event_loop, "127.0.0.1", port, &h.client.pd, &h.client.cq);
    let client = Task::spawn(async move {
        let qp = connector.connect().await?;

        let mut wire = [0u8; MrRemote::SERIALIZED_SIZE];
        let (received, _) = qp.recv(&mut wire).await?;
        assert_eq!(received, MrRemote::SERIALIZED_SIZE);
        let remote = MrRemote::deserialize(&wire);
        assert_eq!(remote.len, 6);

        assert_eq!(qp.write_with_imm(&remote, b"world\0", 1).await?, 6);
        Ok::<_, Error>(())
    });

    client.join()?;
    server.join()?;
    Ok(())
}

#[test]
fn fetch_add_then_compare_swap() -> Result<()> {
    let h = harness();

    let acceptor = Acceptor::new(&h.event_loop, None, 0, &h.server.pd, &h.server.cq)?;
    let port = acceptor.local_addr().port();
    let server_pd = h.server.pd.clone();

    let server = Task::spawn(async move {
        let qp = acceptor.accept().await?;
        let mut counter = RegisteredMem::new(&server_pd, 8)?;
        counter.copy_from_slice(&42u64.to_ne_bytes());

        qp.send(&counter.mr().serialize()).await?;

        // Wait until the peer is done mutating the counter.
        let mut done = [0u8; 1];
        qp.recv(&mut done).await?;
        let value = u64::from_ne_bytes(counter[..].try_into().unwrap());
        assert_eq!(value, 4422);
        Ok::<_, Error>(())
    });

    let connector = Connector::new(&h.event_loop, "127.0.0.1", port, &h.client.pd, &h.client.cq);
    let client = Task::spawn(async move {
        let qp = connector.connect().await?;
        assert!(qp.pd().device().is_fetch_and_add_supported());
        assert!(qp.pd().device().is_compare_and_swap_supported());

        let mut wire = [0u8; MrRemote::SERIALIZED_SIZE];
        qp.recv(&mut wire).await?;
        let remote = MrRemote::deserialize(&wire);

        let mut local = [0u8; 8];
        assert_eq!(qp.fetch_and_add(&remote, &mut local, 1).await?, 8);
        assert_eq!(u64::from_ne_bytes(local), 42);

        assert_eq!(qp.compare_and_swap(&remote, &mut local, 43, 4422).await?, 8);
        assert_eq!(u64::from_ne_bytes(local), 43);

        // Mismatched compare leaves the remote value alone.
        assert_eq!(qp.compare_and_swap(&remote, &mut local, 0, 1).await?, 8);
        assert_eq!(u64::from_ne_bytes(local), 4422);

        qp.send(&[1u8]).await?;
        Ok::<_, Error>(())
    });

    client.join()?;
    server.join()?;
    Ok(())
}

#[test]
fn concurrent_workers_over_one_qp() -> Result<()> {
    const WORKERS: usize = 4;
    const TRANSFERS: usize = 64;
    const SIZE: usize = 8192;

    let h = harness();

    let acceptor = Acceptor::new(&h.event_loop, None, 0, &h.server.pd, &h.server.cq)?;
    let port = acceptor.local_addr().port();
    let server_pd = h.server.pd.clone();
    let client_pd = h.client.pd.clone();

    let server = Task::spawn(async move {
        let qp = acceptor.accept().await?;
        let workers: Vec<_> = (0..WORKERS)
            .map(|_| {
                let qp = qp.clone();
                let pd = server_pd.clone();
                Task::spawn(async move {
                    let mem = RegisteredMem::new(&pd, SIZE)?;
                    let mut total = 0usize;
                    for _ in 0..TRANSFERS {
                        let (received, _) = qp.recv_mr(mem.as_mr_slice()).await?;
                        total += received;
                    }
                    Ok::<_, Error>(total)
                })
            })
            .collect();
        let mut total = 0;
        for worker in workers {
            total += worker.await?;
        }
        Ok::<_, Error>(total)
    });

    let connector = Connector::new(&h.event_loop, "127.0.0.1", port, &h.client.pd, &h.client.cq);
    let client = Task::spawn(async move {
        let qp = connector.connect().await?;
        let clock = quanta::Clock::new();
        let start = clock.now();
        let workers: Vec<_> = (0..WORKERS)
            .map(|id| {
                let qp = qp.clone();
                let pd = client_pd.clone();
                Task::spawn(async move {
                    let mem = RegisteredMem::new_with_content(&pd, &vec![id as u8; SIZE])?;
                    let mut total = 0usize;
                    for _ in 0..TRANSFERS {
                        total += qp.send_mr(mem.as_mr_slice()).await?;
                    }
                    Ok::<_, Error>(total)
                })
            })
            .collect();
        let mut total = 0;
        for worker in workers {
            total += worker.await?;
        }
        let seconds = clock.now().duration_since(start).as_secs_f64();
        let throughput = total as f64 / 1048576.0 / seconds;
        assert!(throughput.is_finite() && throughput > 0.0);
        Ok::<_, Error>(total)
    });

    let expected = WORKERS * TRANSFERS * SIZE;
    assert_eq!(client.join()?, expected);
    assert_eq!(server.join()?, expected);
    Ok(())
}

#[test]
fn handshake_failure_then_recovery() -> Result<()> {
    let h = harness();

    let acceptor = Acceptor::new(&h.event_loop, None, 0, &h.server.pd, &h.server.cq)?;
    let port = acceptor.local_addr().port();

    let server = Task::spawn(async move {
        // First peer dies mid-header.
        let err = acceptor.accept().await.unwrap_err();
        assert!(err
            .to_string()
            .contains("remote closed unexpectedly while receiving qp header"));

        // The listener is still usable afterwards.
        let qp = acceptor.accept().await?;
        assert_eq!(qp.state(), QpState::Rts);
        Ok::<_, Error>(())
    });

    // A connector that writes half its header and vanishes.
    let mut broken = std::net::TcpStream::connect(("127.0.0.1", port))?;
    broken.write_all(&[0u8; 10])?;
    drop(broken);

    let connector = Connector::new(&h.event_loop, "127.0.0.1", port, &h.client.pd, &h.client.cq);
    let client = Task::spawn(async move {
        let qp = connector.connect().await?;
        assert_eq!(qp.state(), QpState::Rts);
        Ok::<_, Error>(())
    });

    client.join()?;
    server.join()?;
    Ok(())
}
