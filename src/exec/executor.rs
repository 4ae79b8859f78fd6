//! The completion executor.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::callback_from_wr_id;
use crate::error::{Error, Result};
use crate::utils::queue::BlockingQueue;
use crate::verbs::types::Wc;

/// A fixed pool of worker threads draining a queue of completions.
///
/// Every completion's `wr_id` names the callback registered when the work
/// request was posted; a worker reclaims the callback, invokes it with the
/// entry, and frees it. Callbacks for distinct requests run concurrently with
/// no ordering guarantee, so they must not block the pool.
pub struct Executor {
    queue: Arc<BlockingQueue<Wc>>,
    workers: Vec<JoinHandle<()>>,
}

impl Executor {
    /// The default number of worker threads.
    pub const DEFAULT_NR_WORKERS: usize = 4;

    /// Create an executor with the default worker count and an unbounded
    /// queue.
    pub fn new() -> Self {
        Self::with_workers(Self::DEFAULT_NR_WORKERS)
    }

    /// Create an executor with `nr_workers` workers and an unbounded queue.
    pub fn with_workers(nr_workers: usize) -> Self {
        Self::build(nr_workers, None)
    }

    /// Create an executor whose queue holds at most `bound` completions,
    /// applying back-pressure to the poller under sustained bursts.
    pub fn with_queue_bound(nr_workers: usize, bound: usize) -> Self {
        Self::build(nr_workers, Some(bound))
    }

    fn build(nr_workers: usize, bound: Option<usize>) -> Self {
        let queue = Arc::new(match bound {
            Some(bound) => BlockingQueue::bounded(bound),
            None => BlockingQueue::new(),
        });
        let workers = (0..nr_workers)
            .map(|worker_id| {
                let queue = queue.clone();
                thread::spawn(move || Self::worker_fn(worker_id, &queue))
            })
            .collect();
        Executor { queue, workers }
    }

    fn worker_fn(worker_id: usize, queue: &BlockingQueue<Wc>) {
        while let Ok(wc) = queue.pop() {
            // SAFETY: every wr_id routed through this executor was produced
            // by `callback_into_wr_id` at post time and is consumed exactly
            // once, here.
            let callback = unsafe { callback_from_wr_id(wc.wr_id()) };
            callback(&wc);
        }
        log::trace!("executor worker {} exited", worker_id);
    }

    /// Hand a polled completion to the worker pool.
    pub fn process_wc(&self, wc: Wc) -> Result<()> {
        self.queue.push(wc).map_err(|_| Error::QueueClosed)
    }

    /// Close the queue; workers exit after draining what is left.
    pub fn shutdown(&self) {
        self.queue.close();
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::exec::{callback_into_wr_id, CompletionCallback};
    use crate::verbs::types::WcStatus;

    #[test]
    fn routes_each_completion_to_its_callback() {
        let executor = Executor::with_workers(2);
        let invoked = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let invoked = invoked.clone();
            let callback: CompletionCallback = Box::new(move |wc| {
                assert_eq!(wc.status(), WcStatus::Success);
                invoked.fetch_add(1, Ordering::SeqCst);
            });
            let wc = Wc {
                wr_id: callback_into_wr_id(callback),
                ..Wc::default()
            };
            executor.process_wc(wc).unwrap();
        }
        drop(executor); // Shut down and drain.
        assert_eq!(invoked.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn process_after_shutdown_fails() {
        let executor = Executor::with_workers(1);
        executor.shutdown();
        let result = executor.process_wc(Wc::default());
        assert!(matches!(result, Err(Error::QueueClosed)));
    }
}
