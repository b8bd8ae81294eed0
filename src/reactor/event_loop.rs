use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::net::connection::Connection;
use crate::net::constants::RESPONSE;
use crate::net::error::{Result, ServerError};
use crate::net::socket::{accept_nonblocking, apply_connection_options, make_reuseport_listener};

use super::connection_table::ConnectionTable;
use super::handler::{Outcome, handle_readable};
use super::poller::{Events, Interest, Poller, Readiness};

/// Counters kept by one loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub accepted: u64,
    pub responses: u64,
    pub closed: u64,
    /// Read or write failures ridden out without closing the connection
    pub ignored_errors: u64,
}

/// One replica: a listener, a poller and the connections it accepted
///
/// Nothing in here is shared with other loops. The listener is registered
/// level-triggered so a pending accept keeps waking the loop; connections
/// are registered edge-triggered for reads and peer write-side shutdown.
pub struct EventLoop {
    id: usize,
    config: ServerConfig,
    listener: TcpListener,
    listen_fd: RawFd,
    poller: Poller,
    table: ConnectionTable,
    events: Events,
    buf: Vec<u8>,
    stats: LoopStats,
}

impl EventLoop {
    /// Bind a fresh SO_REUSEPORT listener and register it with a new poller.
    pub fn bind(id: usize, config: &ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = make_reuseport_listener(config)?;
        let listen_fd = listener.as_raw_fd();
        let poller = Poller::new()?;
        poller.register(listen_fd, Interest::READABLE)?;

        Ok(Self {
            id,
            config: config.clone(),
            listener,
            listen_fd,
            poller,
            table: ConnectionTable::with_capacity(config.max_events),
            events: Events::with_capacity(config.max_events),
            buf: vec![0u8; config.read_buffer_size],
            stats: LoopStats::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Drive the loop until a fatal error.
    pub fn run(mut self) -> Result<()> {
        if let Ok(addr) = self.local_addr() {
            info!(worker = self.id, %addr, "event loop started");
        }
        let timeout = self.config.poll_timeout;
        loop {
            self.turn(timeout)?;
        }
    }

    /// One wait plus dispatch of every event it returned, in order.
    ///
    /// Returns the number of events handled.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let n = self.poller.wait(&mut self.events, timeout)?;
        for i in 0..n {
            let Some((fd, readiness)) = self.events.get(i) else {
                break;
            };
            if fd == self.listen_fd {
                self.accept()?;
            } else {
                trace!(worker = self.id, fd, ?readiness, "connection ready");
                self.serve(fd, readiness)?;
            }
        }
        Ok(n)
    }

    fn accept(&mut self) -> Result<()> {
        let stream = match accept_nonblocking(&self.listener) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!(worker = self.id, "accept would block");
                return Ok(());
            }
            Err(source) => {
                return Err(ServerError::Accept { fd: self.listen_fd, source });
            }
        };

        apply_connection_options(&stream, &self.config.connection)?;

        let fd = stream.as_raw_fd();
        let conn = Connection::new(stream, Interest::READABLE.with_read_hangup().edge_triggered());
        self.poller.register(fd, conn.interest())?;
        if let Some(stale) = self.table.insert(conn) {
            // fd numbers are unique among open files, so this is a leak elsewhere
            warn!(worker = self.id, fd = stale.fd(), "replaced stale table entry");
        }
        self.stats.accepted += 1;
        debug!(worker = self.id, fd, live = self.table.len(), "accepted");
        Ok(())
    }

    fn serve(&mut self, fd: RawFd, readiness: Readiness) -> Result<()> {
        let Some(conn) = self.table.get_mut(fd) else {
            // closed earlier in this batch
            return Ok(());
        };

        let outcome = handle_readable(conn, fd, &mut self.buf, RESPONSE, &self.config)?;
        // a FIN that arrived with the request is not re-reported once the
        // data is consumed, so the hangup flag is the only notice of it
        let closing = outcome.should_close()
            || (matches!(outcome, Outcome::Responded) && readiness.is_hangup());

        let cause = match outcome {
            Outcome::Responded => {
                self.stats.responses += 1;
                None
            }
            Outcome::Ignored(e) => {
                self.stats.ignored_errors += 1;
                warn!(worker = self.id, fd, error = %e, "ignoring connection error");
                None
            }
            Outcome::Broken(e) => Some(e),
            Outcome::PeerClosed | Outcome::WouldBlock => None,
        };
        if closing {
            self.close(fd, cause)?;
        }
        Ok(())
    }

    /// Deregister, shut down both directions and drop the table entry.
    fn close(&mut self, fd: RawFd, cause: Option<io::Error>) -> Result<()> {
        self.poller.deregister(fd)?;
        if let Some(conn) = self.table.remove(fd) {
            if let Err(e) = conn.shutdown() {
                debug!(worker = self.id, fd, error = %e, "shutdown failed");
            }
            self.stats.closed += 1;
        }
        match cause {
            None => debug!(worker = self.id, fd, live = self.table.len(), "peer closed"),
            Some(e) => debug!(worker = self.id, fd, error = %e, "closed broken connection"),
        }
        Ok(())
    }
}
