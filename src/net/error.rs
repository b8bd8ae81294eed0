use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;

/// Status the process exits with on any fatal condition.
pub const EXIT_FAILURE: i32 = 1;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Conditions that end the whole process.
///
/// Connection-local trouble is never reported through this type; see
/// [`crate::reactor::handler::Outcome`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("socket() failed: {0}")]
    Socket(#[source] io::Error),

    #[error("setsockopt({option}) failed (fd={fd}): {source}")]
    SetOption {
        option: &'static str,
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("bind({addr}) failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("listen({addr}) failed: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("{op} failed (fd={fd}): {source}")]
    Poller {
        op: &'static str,
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("accept4(listen fd={fd}) failed: {source}")]
    Accept {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("write(fd={fd}) failed: {source}")]
    Write {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("short write on fd={fd}: {written} of {expected} bytes")]
    ShortWrite {
        fd: RawFd,
        written: usize,
        expected: usize,
    },

    #[error("{what} failed: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("installing interrupt handler failed: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("worker process {pid} exited abnormally (status {status})")]
    WorkerExited { pid: libc::pid_t, status: i32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl ServerError {
    /// The OS error behind this failure, when there is one.
    pub fn os_error(&self) -> Option<&io::Error> {
        match self {
            ServerError::Socket(source)
            | ServerError::SetOption { source, .. }
            | ServerError::Bind { source, .. }
            | ServerError::Listen { source, .. }
            | ServerError::Poller { source, .. }
            | ServerError::Accept { source, .. }
            | ServerError::Write { source, .. }
            | ServerError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}
