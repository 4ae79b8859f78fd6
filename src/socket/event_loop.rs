//! The readiness event loop.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token, Waker};

use super::channel::ChannelState;
use crate::error::{Error, Result};

/// Token reserved for the close waker.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// A single-threaded readiness multiplexer over nonblocking file descriptors.
///
/// Exactly one thread drives [`run`](EventLoop::run) at a time; channels may
/// be registered and deregistered from any thread. Callbacks run on the loop
/// thread, readable before writable for the same descriptor, and are one-shot:
/// the descriptor is deregistered before the callback is invoked.
pub struct EventLoop {
    poll: Mutex<Poll>,
    registry: Registry,
    waker: Waker,
    channels: Mutex<HashMap<Token, Weak<ChannelState>>>,
    closed: AtomicBool,
    next_token: AtomicUsize,
}

impl EventLoop {
    /// Events drained per wake-up.
    pub const DEFAULT_MAX_EVENTS: usize = 128;

    /// Create a new event loop. Call [`run`](EventLoop::run) on a dedicated
    /// thread to start dispatching.
    pub fn new() -> Result<Arc<Self>> {
        let poll = Poll::new().map_err(|e| Error::resource("failed to create poller", e))?;
        let registry = poll
            .registry()
            .try_clone()
            .map_err(|e| Error::resource("failed to clone poll registry", e))?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)
            .map_err(|e| Error::resource("failed to create close waker", e))?;
        Ok(Arc::new(EventLoop {
            poll: Mutex::new(poll),
            registry,
            waker,
            channels: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            next_token: AtomicUsize::new(0),
        }))
    }

    /// Dispatch readiness events until [`close`](EventLoop::close) is called.
    /// The current batch is drained before returning.
    pub fn run(&self) -> io::Result<()> {
        let mut poll = self.poll.lock().unwrap();
        let mut events = Events::with_capacity(Self::DEFAULT_MAX_EVENTS);
        while !self.closed.load(Ordering::Acquire) {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }
            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    continue;
                }
                let entry = self.channels.lock().unwrap().get(&event.token()).cloned();
                let Some(weak) = entry else {
                    continue;
                };
                match weak.upgrade() {
                    Some(channel) => {
                        if event.is_readable() || event.is_error() {
                            channel.fire_readable();
                        }
                        if event.is_writable() || event.is_error() {
                            channel.fire_writable();
                        }
                    }
                    None => {
                        // The channel vanished; drop its registration quietly.
                        self.channels.lock().unwrap().remove(&event.token());
                    }
                }
            }
        }
        log::debug!("event loop closed");
        Ok(())
    }

    /// Unblock the loop and make [`run`](EventLoop::run) return.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            log::error!("failed to wake event loop for close: {}", e);
        }
    }

    /// Whether [`close`](EventLoop::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn alloc_token(&self) -> Token {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        assert!(token != WAKE_TOKEN.0, "event loop token space exhausted");
        Token(token)
    }

    pub(crate) fn insert_channel(&self, token: Token, channel: Weak<ChannelState>) {
        self.channels.lock().unwrap().insert(token, channel);
    }

    pub(crate) fn remove_channel(&self, token: Token) {
        self.channels.lock().unwrap().remove(&token);
    }

    /// Add a descriptor to the poll set with the given readiness mask.
    pub(crate) fn register_fd(&self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        if self.is_closed() {
            return Err(Error::LoopClosed);
        }
        self.registry
            .register(&mut SourceFd(&fd), token, interest)
            .map_err(|e| Error::resource("failed to add fd to poller", e))
    }

    /// Remove a descriptor from the poll set. Idempotent.
    pub(crate) fn deregister_fd(&self, fd: RawFd) {
        let _ = self.registry.deregister(&mut SourceFd(&fd));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use super::*;
    use crate::socket::Channel;

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn readable_callback_fires_exactly_once() {
        let event_loop = EventLoop::new().unwrap();
        let looper = {
            let event_loop = event_loop.clone();
            thread::spawn(move || event_loop.run().unwrap())
        };

        let (rx, tx) = pipe();
        let channel = Channel::new(rx, event_loop.clone());
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            channel.set_readable_callback(Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }));
        }
        channel.wait_readable().unwrap();

        let one = 1u8;
        assert_eq!(unsafe { libc::write(tx, (&one as *const u8).cast(), 1) }, 1);
        // Two more writes; the callback is one-shot and must not re-fire.
        assert_eq!(unsafe { libc::write(tx, (&one as *const u8).cast(), 1) }, 1);
        while fired.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        event_loop.close();
        looper.join().unwrap();
        drop(channel);
        unsafe { libc::close(tx) };
    }

    #[test]
    fn registration_after_close_fails() {
        let event_loop = EventLoop::new().unwrap();
        event_loop.close();
        let (rx, tx) = pipe();
        let channel = Channel::new(rx, event_loop);
        assert!(matches!(channel.wait_readable(), Err(Error::LoopClosed)));
        drop(channel);
        unsafe { libc::close(tx) };
    }
}
