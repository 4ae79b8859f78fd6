//! Event-loop membership of a file descriptor.

use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

use mio::{Interest, Token};

use super::event_loop::EventLoop;
use crate::error::{Error, Result};

/// One-shot readiness callback.
pub(crate) type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Callbacks {
    readable: Option<Callback>,
    writable: Option<Callback>,
}

pub(crate) struct ChannelState {
    fd: RawFd,
    token: Token,
    event_loop: Arc<EventLoop>,
    callbacks: Mutex<Callbacks>,
    /// The readiness mask currently registered with the loop, if any.
    interest: Mutex<Option<Interest>>,
}

impl ChannelState {
    fn disarm(&self) {
        if self.interest.lock().unwrap().take().is_some() {
            self.event_loop.deregister_fd(self.fd);
        }
    }

    /// Invoked on the loop thread for read readiness or errors.
    pub(crate) fn fire_readable(&self) {
        self.disarm();
        let callback = self.callbacks.lock().unwrap().readable.take();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Invoked on the loop thread for write readiness or errors.
    pub(crate) fn fire_writable(&self) {
        self.disarm();
        let callback = self.callbacks.lock().unwrap().writable.take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Drop for ChannelState {
    fn drop(&mut self) {
        self.disarm();
        self.event_loop.remove_channel(self.token);
        if unsafe { libc::close(self.fd) } != 0 {
            log::error!(
                "failed to close fd {}: {}",
                self.fd,
                IoError::last_os_error()
            );
        } else {
            log::trace!("closed fd {}", self.fd);
        }
    }
}

/// An owned nonblocking file descriptor bound to an event loop.
///
/// A channel stores at most one readable and one writable callback, each
/// replaceable and cleared after a single invocation. Deregistration is
/// idempotent and happens automatically on drop, along with closing the fd.
pub(crate) struct Channel {
    state: Arc<ChannelState>,
}

impl Channel {
    /// Take ownership of `fd` and attach it to `event_loop`.
    pub(crate) fn new(fd: RawFd, event_loop: Arc<EventLoop>) -> Self {
        let token = event_loop.alloc_token();
        let state = Arc::new(ChannelState {
            fd,
            token,
            event_loop: event_loop.clone(),
            callbacks: Mutex::new(Callbacks::default()),
            interest: Mutex::new(None),
        });
        event_loop.insert_channel(token, Arc::downgrade(&state));
        Channel { state }
    }

    #[inline]
    pub(crate) fn fd(&self) -> RawFd {
        self.state.fd
    }

    #[inline]
    pub(crate) fn event_loop(&self) -> &Arc<EventLoop> {
        &self.state.event_loop
    }

    pub(crate) fn set_readable_callback(&self, callback: Callback) {
        self.state.callbacks.lock().unwrap().readable = Some(callback);
    }

    pub(crate) fn set_writable_callback(&self, callback: Callback) {
        self.state.callbacks.lock().unwrap().writable = Some(callback);
    }

    pub(crate) fn wait_readable(&self) -> Result<()> {
        self.wait(Interest::READABLE)
    }

    pub(crate) fn wait_writable(&self) -> Result<()> {
        self.wait(Interest::WRITABLE)
    }

    fn wait(&self, interest: Interest) -> Result<()> {
        let state = &self.state;
        let mut current = state.interest.lock().unwrap();
        match *current {
            // Already armed with the same mask; the pending registration
            // will deliver the event.
            Some(existing) if existing == interest => Ok(()),
            Some(_) => Err(Error::Io(IoError::new(
                IoErrorKind::InvalidInput,
                "fd already registered with a different readiness mask",
            ))),
            None => {
                state.event_loop.register_fd(state.fd, state.token, interest)?;
                *current = Some(interest);
                Ok(())
            }
        }
    }
}
