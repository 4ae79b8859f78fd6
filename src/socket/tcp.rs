//! Awaitable TCP listener and connection.

use std::future::poll_fn;
use std::io::{self, Error as IoError, ErrorKind as IoErrorKind};
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};
use std::os::fd::RawFd;
use std::sync::Arc;
use std::task::Poll;

use super::channel::Channel;
use super::event_loop::EventLoop;
use crate::error::{Error, Result};

/// Raw socket syscalls not reachable through the standard library.
mod sys {
    use super::*;

    fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
        if rc < 0 {
            Err(IoError::last_os_error())
        } else {
            Ok(rc)
        }
    }

    pub fn socket(family: libc::c_int) -> io::Result<RawFd> {
        cvt(unsafe {
            libc::socket(
                family,
                libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                0,
            )
        })
    }

    pub fn set_reuseaddr(fd: RawFd) -> io::Result<()> {
        let yes: libc::c_int = 1;
        cvt(unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                (&yes as *const libc::c_int).cast(),
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        })
        .map(drop)
    }

    pub fn bind(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
        let (storage, len) = sockaddr_from(addr);
        cvt(unsafe { libc::bind(fd, (&storage as *const libc::sockaddr_storage).cast(), len) })
            .map(drop)
    }

    pub fn listen(fd: RawFd, backlog: libc::c_int) -> io::Result<()> {
        cvt(unsafe { libc::listen(fd, backlog) }).map(drop)
    }

    pub fn accept(fd: RawFd) -> io::Result<RawFd> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        cvt(unsafe {
            libc::accept4(
                fd,
                (&mut storage as *mut libc::sockaddr_storage).cast(),
                &mut len,
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        })
    }

    pub fn connect(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
        let (storage, len) = sockaddr_from(addr);
        cvt(unsafe { libc::connect(fd, (&storage as *const libc::sockaddr_storage).cast(), len) })
            .map(drop)
    }

    /// Consume and return the pending socket error, if any.
    pub fn take_error(fd: RawFd) -> io::Result<Option<IoError>> {
        let mut err: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        cvt(unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                (&mut err as *mut libc::c_int).cast(),
                &mut len,
            )
        })?;
        Ok(if err == 0 {
            None
        } else {
            Some(IoError::from_raw_os_error(err))
        })
    }

    pub fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        cvt(unsafe {
            libc::getsockname(fd, (&mut storage as *mut libc::sockaddr_storage).cast(), &mut len)
        })?;
        sockaddr_into(&storage)
    }

    pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            Err(IoError::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            Err(IoError::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn sockaddr_from(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        match addr {
            SocketAddr::V4(v4) => {
                let sin = libc::sockaddr_in {
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: v4.port().to_be(),
                    sin_addr: libc::in_addr {
                        s_addr: u32::from_ne_bytes(v4.ip().octets()),
                    },
                    sin_zero: [0; 8],
                };
                unsafe {
                    *(&mut storage as *mut libc::sockaddr_storage).cast::<libc::sockaddr_in>() =
                        sin;
                }
                (storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
            }
            SocketAddr::V6(v6) => {
                let sin6 = libc::sockaddr_in6 {
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: v6.port().to_be(),
                    sin6_flowinfo: v6.flowinfo(),
                    sin6_addr: libc::in6_addr {
                        s6_addr: v6.ip().octets(),
                    },
                    sin6_scope_id: v6.scope_id(),
                };
                unsafe {
                    *(&mut storage as *mut libc::sockaddr_storage).cast::<libc::sockaddr_in6>() =
                        sin6;
                }
                (storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
            }
        }
    }

    fn sockaddr_into(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
        match storage.ss_family as libc::c_int {
            libc::AF_INET => {
                let sin =
                    unsafe { &*(storage as *const libc::sockaddr_storage).cast::<libc::sockaddr_in>() };
                Ok(SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()),
                    u16::from_be(sin.sin_port),
                )))
            }
            libc::AF_INET6 => {
                let sin6 = unsafe {
                    &*(storage as *const libc::sockaddr_storage).cast::<libc::sockaddr_in6>()
                };
                Ok(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                )))
            }
            _ => Err(IoError::new(
                IoErrorKind::InvalidData,
                "unsupported address family",
            )),
        }
    }
}

fn family_of(addr: &SocketAddr) -> libc::c_int {
    match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    }
}

fn would_block(e: &IoError) -> bool {
    e.kind() == IoErrorKind::WouldBlock
}

/// A nonblocking listening socket with an awaitable accept.
pub struct TcpListener {
    channel: Channel,
    local_addr: SocketAddr,
}

impl TcpListener {
    const BACKLOG: libc::c_int = 128;

    /// Bind to `(hostname | any, port)` and start listening.
    ///
    /// All resolved candidate addresses are tried in order; the first
    /// successful bind wins. Port 0 asks the kernel for a free port, which
    /// [`local_addr`](TcpListener::local_addr) then reports.
    pub fn bind(event_loop: &Arc<EventLoop>, hostname: Option<&str>, port: u16) -> Result<Self> {
        let host = hostname.unwrap_or("0.0.0.0");
        let candidates: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::resource("failed to resolve listen address", e))?
            .collect();

        let mut last_err = None;
        for addr in &candidates {
            match Self::bind_one(addr) {
                Ok(fd) => {
                    let channel = Channel::new(fd, event_loop.clone());
                    let local_addr = sys::local_addr(channel.fd())
                        .map_err(|e| Error::resource("failed to get socket name", e))?;
                    log::debug!("listener fd {} listening on {}", fd, local_addr);
                    return Ok(TcpListener {
                        channel,
                        local_addr,
                    });
                }
                Err(e) => {
                    log::error!("failed to bind {}: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(Error::resource(
            "failed to bind",
            last_err.unwrap_or_else(|| {
                IoError::new(IoErrorKind::InvalidInput, "no candidate addresses")
            }),
        ))
    }

    fn bind_one(addr: &SocketAddr) -> io::Result<RawFd> {
        let fd = sys::socket(family_of(addr))?;
        let prepared = sys::set_reuseaddr(fd)
            .and_then(|()| sys::bind(fd, addr))
            .and_then(|()| sys::listen(fd, Self::BACKLOG));
        if let Err(e) = prepared {
            unsafe { libc::close(fd) };
            return Err(e);
        }
        Ok(fd)
    }

    /// The address this listener is bound to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one client. Suspends until a connection is pending, then
    /// returns a nonblocking connection bound to the same loop.
    pub async fn accept(&self) -> Result<TcpConnection> {
        poll_fn(|cx| match sys::accept(self.channel.fd()) {
            Ok(fd) => {
                log::debug!("accepted connection fd={}", fd);
                Poll::Ready(Ok(TcpConnection::new(Channel::new(
                    fd,
                    self.channel.event_loop().clone(),
                ))))
            }
            Err(e) if would_block(&e) => {
                let waker = cx.waker().clone();
                self.channel
                    .set_readable_callback(Box::new(move || waker.wake()));
                match self.channel.wait_readable() {
                    Ok(()) => Poll::Pending,
                    Err(e) => Poll::Ready(Err(e)),
                }
            }
            Err(e) => Poll::Ready(Err(Error::resource("failed to accept", e))),
        })
        .await
    }
}

/// An established nonblocking TCP connection with awaitable reads and writes.
pub struct TcpConnection {
    channel: Channel,
}

impl TcpConnection {
    pub(crate) fn new(channel: Channel) -> Self {
        TcpConnection { channel }
    }

    /// Connect to `(hostname, port)`, trying every resolved address in order.
    pub async fn connect(
        event_loop: &Arc<EventLoop>,
        hostname: &str,
        port: u16,
    ) -> Result<Self> {
        let candidates: Vec<SocketAddr> = (hostname, port)
            .to_socket_addrs()
            .map_err(|e| Error::resource("failed to resolve connect address", e))?
            .collect();

        let mut last_err = None;
        for addr in &candidates {
            match Self::connect_addr(event_loop, addr).await {
                Ok(connection) => return Ok(connection),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            Error::resource(
                "failed to connect",
                IoError::new(IoErrorKind::InvalidInput, "no candidate addresses"),
            )
        }))
    }

    async fn connect_addr(event_loop: &Arc<EventLoop>, addr: &SocketAddr) -> Result<Self> {
        let fd = sys::socket(family_of(addr))
            .map_err(|e| Error::resource("failed to create socket", e))?;
        let channel = Channel::new(fd, event_loop.clone());

        match sys::connect(fd, addr) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
                // Suspend until writable, then inspect SO_ERROR.
                let mut suspended = false;
                poll_fn(|cx| {
                    if !suspended {
                        suspended = true;
                        let waker = cx.waker().clone();
                        channel.set_writable_callback(Box::new(move || waker.wake()));
                        return match channel.wait_writable() {
                            Ok(()) => Poll::Pending,
                            Err(e) => Poll::Ready(Err(e)),
                        };
                    }
                    match sys::take_error(channel.fd()) {
                        Ok(None) => Poll::Ready(Ok(())),
                        Ok(Some(e)) => Poll::Ready(Err(Error::resource("failed to connect", e))),
                        Err(e) => {
                            Poll::Ready(Err(Error::resource("failed to get socket error", e)))
                        }
                    }
                })
                .await?;
            }
            Err(e) => return Err(Error::resource("failed to connect", e)),
        }
        log::debug!("connected to {} fd={}", addr, fd);
        Ok(TcpConnection::new(channel))
    }

    /// Read once into `buf`. Returns the byte count; zero denotes orderly
    /// remote close.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        poll_fn(|cx| match sys::read(self.channel.fd(), buf) {
            Ok(n) => Poll::Ready(Ok(n)),
            Err(e) if would_block(&e) => {
                let waker = cx.waker().clone();
                self.channel
                    .set_readable_callback(Box::new(move || waker.wake()));
                match self.channel.wait_readable() {
                    Ok(()) => Poll::Pending,
                    Err(e) => Poll::Ready(Err(e)),
                }
            }
            Err(e) => Poll::Ready(Err(Error::resource("failed to read", e))),
        })
        .await
    }

    /// Write once from `buf`. Returns the byte count, which may be short.
    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        poll_fn(|cx| match sys::write(self.channel.fd(), buf) {
            Ok(n) => Poll::Ready(Ok(n)),
            Err(e) if would_block(&e) => {
                let waker = cx.waker().clone();
                self.channel
                    .set_writable_callback(Box::new(move || waker.wake()));
                match self.channel.wait_writable() {
                    Ok(()) => Poll::Pending,
                    Err(e) => Poll::Ready(Err(e)),
                }
            }
            Err(e) => Poll::Ready(Err(Error::resource("failed to write", e))),
        })
        .await
    }
}
