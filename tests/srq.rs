//! Shared receive queue: receives posted through an SRQ-bound QP drain from
//! the shared queue instead of the QP's own receive queue.

use std::thread;

use anyhow::Result;
use rdmawait::ctrl::{Acceptor, Connector};
use rdmawait::exec::CqPoller;
use rdmawait::socket::EventLoop;
use rdmawait::task::Task;
use rdmawait::verbs::sim::SimFabric;
use rdmawait::{Cq, Device, Error, Pd, Srq};

#[test]
fn srq_serves_an_accepted_qp() -> Result<()> {
    let fabric = SimFabric::with_devices(2);
    let event_loop = EventLoop::new()?;
    let looper = {
        let event_loop = event_loop.clone();
        thread::spawn(move || event_loop.run().unwrap())
    };

    let open = |index| -> Result<(Pd, Cq, CqPoller)> {
        let device = Device::open(&fabric, index, 1)?;
        let pd = Pd::new(&device)?;
        let cq = Cq::with_default_depth(&device)?;
        let poller = CqPoller::new(&cq);
        Ok((pd, cq, poller))
    };
    let (server_pd, server_cq, _server_poller) = open(0)?;
    let (client_pd, client_cq, _client_poller) = open(1)?;
    let srq = Srq::new(&server_pd, Srq::DEFAULT_MAX_WR)?;

    let acceptor = Acceptor::with_cqs(
        &event_loop,
        None,
        0,
        &server_pd,
        &server_cq,
        &server_cq,
        Some(&srq),
    )?;
    let port = acceptor.local_addr().port();

    let server = Task::spawn(async move {
        let qp = acceptor.accept().await?;
        assert!(qp.srq().is_some());
        let mut total = Vec::new();
        for _ in 0..3 {
            let mut buffer = [0u8; 4];
            let (received, imm) = qp.recv(&mut buffer).await?;
            assert_eq!((received, imm), (4, None));
            total.push(buffer);
        }
        Ok::<_, Error>(total)
    });

    let connector = Connector::new(&event_loop, "127.0.0.1", port, &client_pd, &client_cq);
    let client = Task::spawn(async move {
        let qp = connector.connect().await?;
        for message in [b"aaaa", b"bbbb", b"cccc"] {
            assert_eq!(qp.send(message).await?, 4);
        }
        Ok::<_, Error>(())
    });

    client.join()?;
    let received = server.join()?;
    // RC delivers receives in transmission order.
    assert_eq!(received, vec![*b"aaaa", *b"bbbb", *b"cccc"]);

    event_loop.close();
    looper.join().unwrap();
    Ok(())
}
