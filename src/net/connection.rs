use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};

use crate::reactor::poller::Interest;

/// An accepted client connection owned by exactly one event loop.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    interest: Interest,
}

impl Connection {
    pub fn new(stream: TcpStream, interest: Interest) -> Self {
        Self { stream, interest }
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Interest the connection is registered with on its loop's poller.
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Shut down both directions. The fd itself closes on drop.
    pub fn shutdown(&self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            // peer already went away
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
