//! Socket setup for the listener and accepted connections.
//!
//! Every replica binds its own SO_REUSEPORT listener to the same address;
//! the kernel spreads incoming connections across them.

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::ptr;

use crate::config::{ConnectionOptions, ServerConfig};
use crate::net::error::{Result, ServerError};
use crate::util::fd::cvt;

/// Create a non-blocking, close-on-exec SO_REUSEPORT listener
///
/// Both flags are set by `socket()` itself, so there is no window where
/// the fd is blocking or inheritable.
pub fn make_reuseport_listener(config: &ServerConfig) -> Result<TcpListener> {
    let addr = config.bind_addr();
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let ty = Type::STREAM.nonblocking().cloexec();
    let sock = Socket::new(domain, ty, Some(Protocol::TCP)).map_err(ServerError::Socket)?;
    let fd = sock.as_raw_fd();

    sock.set_reuse_address(true)
        .map_err(|source| ServerError::SetOption { option: "SO_REUSEADDR", fd, source })?;
    sock.set_reuse_port(true)
        .map_err(|source| ServerError::SetOption { option: "SO_REUSEPORT", fd, source })?;

    if config.listener.nodelay {
        // inherited by accepted sockets
        set_int_option(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1)
            .map_err(|source| ServerError::SetOption { option: "TCP_NODELAY", fd, source })?;
    }
    if config.listener.quickack {
        set_int_option(fd, libc::IPPROTO_TCP, libc::TCP_QUICKACK, 1)
            .map_err(|source| ServerError::SetOption { option: "TCP_QUICKACK", fd, source })?;
    }

    sock.bind(&addr.into())
        .map_err(|source| ServerError::Bind { addr, source })?;
    sock.listen(config.backlog)
        .map_err(|source| ServerError::Listen { addr, source })?;
    Ok(sock.into())
}

/// Accept one pending connection as a non-blocking, close-on-exec stream
///
/// Returns `WouldBlock` when the backlog is empty.
pub fn accept_nonblocking(listener: &TcpListener) -> io::Result<TcpStream> {
    let fd = cvt(unsafe {
        libc::accept4(
            listener.as_raw_fd(),
            ptr::null_mut(),
            ptr::null_mut(),
            libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
        )
    })?;
    // SAFETY: accept4 just handed us this fd and nothing else owns it.
    Ok(unsafe { TcpStream::from_raw_fd(fd) })
}

/// Apply keep-alive and optional no-delay to an accepted connection.
pub fn apply_connection_options(stream: &TcpStream, opts: &ConnectionOptions) -> Result<()> {
    let fd = stream.as_raw_fd();
    if opts.keepalive {
        SockRef::from(stream)
            .set_keepalive(true)
            .map_err(|source| ServerError::SetOption { option: "SO_KEEPALIVE", fd, source })?;
    }
    if opts.nodelay {
        stream
            .set_nodelay(true)
            .map_err(|source| ServerError::SetOption { option: "TCP_NODELAY", fd, source })?;
    }
    Ok(())
}

pub fn set_int_option(
    fd: RawFd,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    cvt(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })
    .map(drop)
}
