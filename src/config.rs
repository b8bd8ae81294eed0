use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::net::constants;
use crate::net::error::{Result, ServerError};

/// What a loop does when reading from a connection fails with something
/// other than would-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadErrorPolicy {
    /// Leave the connection registered and wait for the next edge.
    #[default]
    Retry,
    /// Deregister and close the connection.
    Close,
}

/// What a loop does when the response cannot be written in one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteFailurePolicy {
    /// Short, zero or failed writes abort the process. A would-block write
    /// drops the response and keeps the connection.
    #[default]
    Fatal,
    /// Keep writing the remainder; on error or would-block close only the
    /// offending connection.
    CloseConnection,
}

/// Options applied to the listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListenerOptions {
    pub nodelay: bool,
    pub quickack: bool,
}

/// Options applied to every accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub keepalive: bool,
    pub nodelay: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            keepalive: true,
            nodelay: true,
        }
    }
}

/// Server configuration
///
/// Built once at startup and cloned into every replica.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Listen backlog; the kernel clamps it to `net.core.somaxconn`
    pub backlog: i32,
    /// Replicas started by the process strategy
    pub process_workers: usize,
    /// Replicas started by the thread strategy
    pub thread_workers: usize,
    pub listener: ListenerOptions,
    pub connection: ConnectionOptions,
    /// Upper bound on events handled per poller wait
    pub max_events: usize,
    /// Bytes read per readiness notification
    pub read_buffer_size: usize,
    /// `None` blocks until an event arrives. `Some(ZERO)` busy-polls.
    pub poll_timeout: Option<Duration>,
    pub read_errors: ReadErrorPolicy,
    pub write_failures: WriteFailurePolicy,
    /// Pin replica `i` to core `i % cores`
    pub pin_cores: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: constants::DEFAULT_HOST,
            port: constants::DEFAULT_PORT,
            backlog: constants::MAX_BACKLOG,
            process_workers: constants::PROCESS_WORKERS,
            thread_workers: constants::THREAD_WORKERS,
            listener: ListenerOptions::default(),
            connection: ConnectionOptions::default(),
            max_events: constants::MAX_EVENTS,
            read_buffer_size: constants::READ_BUF,
            poll_timeout: None,
            read_errors: ReadErrorPolicy::default(),
            write_failures: WriteFailurePolicy::default(),
            pin_cores: false,
        }
    }
}

impl ServerConfig {
    /// Loopback config on the given port, mostly for tests.
    pub fn loopback(port: u16) -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port,
            ..Self::default()
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.process_workers == 0 {
            return Err(ServerError::InvalidConfig("process worker count must be at least 1"));
        }
        if self.thread_workers == 0 {
            return Err(ServerError::InvalidConfig("thread worker count must be at least 1"));
        }
        if self.max_events == 0 {
            return Err(ServerError::InvalidConfig("max events per poll must be at least 1"));
        }
        if self.max_events > i32::MAX as usize {
            return Err(ServerError::InvalidConfig("max events per poll does not fit epoll_wait"));
        }
        if self.read_buffer_size == 0 {
            return Err(ServerError::InvalidConfig("read buffer size must be at least 1"));
        }
        if self.backlog <= 0 {
            return Err(ServerError::InvalidConfig("backlog must be positive"));
        }
        Ok(())
    }
}

/// Timeout in the millisecond form epoll_wait expects, -1 = forever.
pub(crate) fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => {
            // round up so a sub-millisecond timeout still sleeps
            let ms = d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
            ms.min(i32::MAX as u128) as i32
        }
    }
}
