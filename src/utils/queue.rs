//! A closeable MPMC blocking queue.
//!
//! Producers and consumers may live on arbitrary threads. Closing the queue
//! wakes everyone: producers fail immediately, consumers drain whatever is
//! left and then fail.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Error returned by operations on a closed queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

struct Inner<T> {
    queue: VecDeque<T>,
    closed: bool,
}

pub struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    pop_cv: Condvar,
    push_cv: Condvar,
    bound: Option<usize>,
}

impl<T> BlockingQueue<T> {
    /// Create an unbounded queue.
    pub fn new() -> Self {
        Self::with_bound(None)
    }

    /// Create a bounded queue. `push` blocks while the queue holds `bound`
    /// items, applying back-pressure to producers.
    pub fn bounded(bound: usize) -> Self {
        Self::with_bound(Some(bound))
    }

    fn with_bound(bound: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                closed: false,
            }),
            pop_cv: Condvar::new(),
            push_cv: Condvar::new(),
            bound,
        }
    }

    /// Enqueue an item, blocking while a bounded queue is full.
    pub fn push(&self, item: T) -> Result<(), QueueClosed> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.closed {
                return Err(QueueClosed);
            }
            match self.bound {
                Some(bound) if inner.queue.len() >= bound => {
                    inner = self.push_cv.wait(inner).unwrap();
                }
                _ => break,
            }
        }
        inner.queue.push_back(item);
        self.pop_cv.notify_one();
        Ok(())
    }

    /// Dequeue an item, blocking until one is available. After `close`,
    /// remaining items are still handed out before this fails.
    pub fn pop(&self) -> Result<T, QueueClosed> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.queue.pop_front() {
                self.push_cv.notify_one();
                return Ok(item);
            }
            if inner.closed {
                return Err(QueueClosed);
            }
            inner = self.pop_cv.wait(inner).unwrap();
        }
    }

    /// Close the queue and wake all blocked producers and consumers.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        self.pop_cv.notify_all();
        self.push_cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn fifo_within_one_producer() {
        let queue = BlockingQueue::new();
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.pop(), Ok(1));
        assert_eq!(queue.pop(), Ok(2));
    }

    #[test]
    fn close_drains_then_fails() {
        let queue = BlockingQueue::new();
        queue.push(7).unwrap();
        queue.close();
        assert_eq!(queue.pop(), Ok(7));
        assert_eq!(queue.pop(), Err(QueueClosed));
        assert_eq!(queue.push(8), Err(QueueClosed));
    }

    #[test]
    fn close_wakes_blocked_consumers() {
        let queue = Arc::new(BlockingQueue::<u32>::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.pop())
            })
            .collect();
        queue.close();
        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), Err(QueueClosed));
        }
    }

    #[test]
    fn bounded_queue_applies_backpressure() {
        let queue = Arc::new(BlockingQueue::bounded(1));
        queue.push(1).unwrap();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(2))
        };
        // The producer can only finish once we make room.
        assert_eq!(queue.pop(), Ok(1));
        producer.join().unwrap().unwrap();
        assert_eq!(queue.pop(), Ok(2));
    }
}
