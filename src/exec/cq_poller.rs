//! The CQ poller thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::executor::Executor;
use crate::rdma::cq::Cq;
use crate::verbs::types::Wc;

/// A dedicated thread draining one CQ in batches and handing each entry to
/// an executor.
///
/// The poller owns the CQ for polling purposes: direct `poll` calls by the
/// application on the same CQ are incompatible with a running poller. The
/// thread exits when a driver error is observed or the executor queue
/// closes; dropping the poller signals stop and joins the thread.
pub struct CqPoller {
    stopped: Arc<AtomicBool>,
    executor: Arc<Executor>,
    poller_thread: Option<JoinHandle<()>>,
}

impl CqPoller {
    /// The default poll batch size.
    pub const DEFAULT_BATCH_SIZE: usize = 16;

    /// Create a poller over `cq` with its own default executor.
    pub fn new(cq: &Cq) -> Self {
        Self::with_executor(cq, Arc::new(Executor::new()), Self::DEFAULT_BATCH_SIZE)
    }

    /// Create a poller over `cq` sharing the given executor.
    pub fn with_executor(cq: &Cq, executor: Arc<Executor>, batch_size: usize) -> Self {
        assert!(batch_size > 0, "poll batch size must be positive");
        let stopped = Arc::new(AtomicBool::new(false));
        let poller_thread = {
            let cq = cq.clone();
            let executor = executor.clone();
            let stopped = stopped.clone();
            thread::spawn(move || Self::worker(&cq, &executor, &stopped, batch_size))
        };
        CqPoller {
            stopped,
            executor,
            poller_thread: Some(poller_thread),
        }
    }

    /// The executor completions are dispatched to.
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    fn worker(cq: &Cq, executor: &Executor, stopped: &AtomicBool, batch_size: usize) {
        let mut wc_buf = vec![Wc::default(); batch_size];
        while !stopped.load(Ordering::Acquire) {
            match cq.poll_into(&mut wc_buf) {
                Ok(0) => thread::yield_now(),
                Ok(polled) => {
                    for wc in &wc_buf[..polled] {
                        log::trace!(
                            "polled cqe wr_id={:#x} status={:?}",
                            wc.wr_id(),
                            wc.status()
                        );
                        if executor.process_wc(*wc).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    log::error!("cq poller stopped: {}", e);
                    return;
                }
            }
        }
    }
}

impl Drop for CqPoller {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.poller_thread.take() {
            let _ = handle.join();
        }
    }
}
