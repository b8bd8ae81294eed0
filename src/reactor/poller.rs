use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{io, ptr};

use crate::config::timeout_ms;
use crate::net::error::{Result, ServerError};
use crate::util::fd::cvt;

/// Readiness a file descriptor is registered for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Interest {
    readable: bool,
    writable: bool,
    read_hangup: bool,
    edge: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
        read_hangup: false,
        edge: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
        read_hangup: false,
        edge: false,
    };

    /// Same interest, reported once per not-ready to ready transition.
    pub const fn edge_triggered(self) -> Interest {
        Interest { edge: true, ..self }
    }

    /// Same interest, also flagging when the peer shuts down its write side.
    pub const fn with_read_hangup(self) -> Interest {
        Interest { read_hangup: true, ..self }
    }

    pub const fn is_readable(self) -> bool {
        self.readable
    }

    pub const fn is_writable(self) -> bool {
        self.writable
    }

    pub const fn is_edge_triggered(self) -> bool {
        self.edge
    }

    pub const fn has_read_hangup(self) -> bool {
        self.read_hangup
    }

    fn to_epoll(self) -> u32 {
        let mut bits = 0u32;
        if self.readable {
            bits |= libc::EPOLLIN as u32;
        }
        if self.writable {
            bits |= libc::EPOLLOUT as u32;
        }
        if self.read_hangup {
            bits |= libc::EPOLLRDHUP as u32;
        }
        if self.edge {
            bits |= libc::EPOLLET as u32;
        }
        bits
    }
}

/// Readiness reported for one fd by a wait call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Readiness(u32);

impl Readiness {
    /// Peer hung up or shut down its write side, or the socket is in an
    /// error state. No further edge follows for the same condition.
    pub fn is_hangup(self) -> bool {
        self.0 & (libc::EPOLLHUP | libc::EPOLLRDHUP | libc::EPOLLERR) as u32 != 0
    }
}

/// Fixed-size batch of ready events filled by [`Poller::wait`].
pub struct Events {
    buf: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The `i`th ready event of the last wait, in the order the kernel returned them.
    pub fn get(&self, i: usize) -> Option<(RawFd, Readiness)> {
        if i >= self.len {
            return None;
        }
        // copy out of the (packed on x86_64) struct before touching fields
        let ev = self.buf[i];
        let (data, bits) = (ev.u64, ev.events);
        Some((data as RawFd, Readiness(bits)))
    }
}

/// Readiness poller over one epoll instance
///
/// Every fd is registered with its own value as the event payload, so a
/// wait reports plain fds back to the caller.
#[derive(Debug)]
pub struct Poller {
    epfd: OwnedFd,
}

impl Poller {
    /// Create a close-on-exec epoll instance.
    pub fn new() -> Result<Self> {
        let fd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) }).map_err(|source| {
            ServerError::Poller { op: "epoll_create1", fd: -1, source }
        })?;
        // SAFETY: freshly created and exclusively ours.
        let epfd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { epfd })
    }

    pub fn register(&self, fd: RawFd, interest: Interest) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: interest.to_epoll(),
            u64: fd as u64,
        };
        cvt(unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut ev) })
            .map_err(|source| ServerError::Poller { op: "epoll_ctl(EPOLL_CTL_ADD)", fd, source })?;
        Ok(())
    }

    pub fn deregister(&self, fd: RawFd) -> Result<()> {
        cvt(unsafe {
            libc::epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, ptr::null_mut())
        })
        .map_err(|source| ServerError::Poller { op: "epoll_ctl(EPOLL_CTL_DEL)", fd, source })?;
        Ok(())
    }

    /// Block until a registered fd is ready or `timeout` elapses (`None` = forever).
    ///
    /// Fills `events` with at most `events.capacity()` entries and returns
    /// how many. A wait interrupted by a signal returns an empty batch.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> Result<usize> {
        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                events.buf.as_mut_ptr(),
                events.buf.len() as libc::c_int,
                timeout_ms(timeout),
            )
        };
        match cvt(n) {
            Ok(n) => {
                events.len = n as usize;
                Ok(events.len)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                events.len = 0;
                Ok(0)
            }
            Err(source) => Err(ServerError::Poller {
                op: "epoll_wait",
                fd: self.epfd.as_raw_fd(),
                source,
            }),
        }
    }
}

impl AsRawFd for Poller {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    const NOW: Option<Duration> = Some(Duration::ZERO);

    fn pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    #[test]
    fn epoll_fd_is_cloexec() {
        let poller = Poller::new().unwrap();
        let flags = unsafe { libc::fcntl(poller.as_raw_fd(), libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }

    #[test]
    fn interest_bits() {
        let i = Interest::READABLE.edge_triggered();
        assert!(i.is_readable());
        assert!(!i.is_writable());
        assert!(i.is_edge_triggered());
        assert!(!i.has_read_hangup());
        assert!(!Interest::READABLE.is_edge_triggered());
        assert_eq!(i.to_epoll(), (libc::EPOLLIN | libc::EPOLLET) as u32);

        let i = Interest::READABLE.with_read_hangup().edge_triggered();
        assert!(i.has_read_hangup());
        assert_eq!(i.to_epoll(), (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLET) as u32);
        assert_eq!(Interest::WRITABLE.to_epoll(), libc::EPOLLOUT as u32);
    }

    #[test]
    fn reports_readable_fd() {
        let poller = Poller::new().unwrap();
        let mut events = Events::with_capacity(8);
        let (mut a, b) = pair();

        poller.register(b.as_raw_fd(), Interest::READABLE).unwrap();
        assert_eq!(poller.wait(&mut events, NOW).unwrap(), 0);
        assert!(events.is_empty());

        a.write_all(b"x").unwrap();
        assert_eq!(poller.wait(&mut events, NOW).unwrap(), 1);
        let (fd, readiness) = events.get(0).unwrap();
        assert_eq!(fd, b.as_raw_fd());
        assert!(!readiness.is_hangup());
        assert!(events.get(1).is_none());
    }

    #[test]
    fn level_triggered_repeats_edge_triggered_does_not() {
        let poller = Poller::new().unwrap();
        let mut events = Events::with_capacity(8);
        let (mut a1, b1) = pair();
        let (mut a2, mut b2) = pair();

        poller.register(b1.as_raw_fd(), Interest::READABLE).unwrap();
        poller.register(b2.as_raw_fd(), Interest::READABLE.edge_triggered()).unwrap();
        a1.write_all(b"x").unwrap();
        a2.write_all(b"x").unwrap();

        assert_eq!(poller.wait(&mut events, NOW).unwrap(), 2);
        // nothing drained: level keeps firing, edge stays quiet
        assert_eq!(poller.wait(&mut events, NOW).unwrap(), 1);
        assert_eq!(events.get(0).unwrap().0, b1.as_raw_fd());

        // fresh data is a new edge
        let mut buf = [0u8; 8];
        assert_eq!(b2.read(&mut buf).unwrap(), 1);
        a2.write_all(b"y").unwrap();
        let fds: Vec<RawFd> = {
            poller.wait(&mut events, NOW).unwrap();
            (0..events.len()).filter_map(|i| events.get(i)).map(|(fd, _)| fd).collect()
        };
        assert!(fds.contains(&b2.as_raw_fd()));
    }

    #[test]
    fn wait_is_bounded_by_capacity() {
        let poller = Poller::new().unwrap();
        let mut events = Events::with_capacity(2);
        let pairs: Vec<_> = (0..5).map(|_| pair()).collect();
        for (a, b) in &pairs {
            poller.register(b.as_raw_fd(), Interest::READABLE).unwrap();
            (&*a).write_all(b"x").unwrap();
        }
        assert_eq!(poller.wait(&mut events, NOW).unwrap(), 2);
        assert_eq!(events.len(), 2);
        assert_eq!(events.capacity(), 2);
    }

    #[test]
    fn hangup_is_reported() {
        let poller = Poller::new().unwrap();
        let mut events = Events::with_capacity(4);
        let (a, b) = pair();
        poller.register(b.as_raw_fd(), Interest::READABLE.edge_triggered()).unwrap();
        drop(a);
        assert_eq!(poller.wait(&mut events, NOW).unwrap(), 1);
        assert!(events.get(0).unwrap().1.is_hangup());
    }

    #[test]
    fn half_close_is_flagged_only_with_read_hangup() {
        let poller = Poller::new().unwrap();
        let mut events = Events::with_capacity(4);
        let (a1, b1) = pair();
        let (a2, b2) = pair();
        poller.register(b1.as_raw_fd(), Interest::READABLE.edge_triggered()).unwrap();
        poller
            .register(b2.as_raw_fd(), Interest::READABLE.with_read_hangup().edge_triggered())
            .unwrap();

        // data and FIN land before the wait: one edge carries both
        for a in [&a1, &a2] {
            let mut a = a;
            a.write_all(b"req").unwrap();
            a.shutdown(std::net::Shutdown::Write).unwrap();
        }

        assert_eq!(poller.wait(&mut events, NOW).unwrap(), 2);
        for i in 0..events.len() {
            let (fd, readiness) = events.get(i).unwrap();
            assert_eq!(readiness.is_hangup(), fd == b2.as_raw_fd(), "fd {fd}");
        }
    }

    #[test]
    fn deregistered_fd_is_silent() {
        let poller = Poller::new().unwrap();
        let mut events = Events::with_capacity(4);
        let (mut a, b) = pair();
        poller.register(b.as_raw_fd(), Interest::READABLE).unwrap();
        poller.deregister(b.as_raw_fd()).unwrap();
        a.write_all(b"x").unwrap();
        assert_eq!(poller.wait(&mut events, NOW).unwrap(), 0);
    }

    #[test]
    fn registration_errors_carry_context() {
        let poller = Poller::new().unwrap();
        let (_a, b) = pair();
        let fd = b.as_raw_fd();

        poller.register(fd, Interest::READABLE).unwrap();
        match poller.register(fd, Interest::READABLE).unwrap_err() {
            ServerError::Poller { op, fd: got, source } => {
                assert_eq!(op, "epoll_ctl(EPOLL_CTL_ADD)");
                assert_eq!(got, fd);
                assert_eq!(source.raw_os_error(), Some(libc::EEXIST));
            }
            other => panic!("unexpected error: {other}"),
        }

        poller.deregister(fd).unwrap();
        match poller.deregister(fd).unwrap_err() {
            ServerError::Poller { op, source, .. } => {
                assert_eq!(op, "epoll_ctl(EPOLL_CTL_DEL)");
                assert_eq!(source.raw_os_error(), Some(libc::ENOENT));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
