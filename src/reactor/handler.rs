use std::io::{self, Read, Write};
use std::os::fd::RawFd;

use tracing::trace;

use crate::config::{ReadErrorPolicy, ServerConfig, WriteFailurePolicy};
use crate::net::error::{Result, ServerError};

/// What happened to a connection after one readiness notification.
#[derive(Debug)]
pub enum Outcome {
    /// Request read and the whole response written.
    Responded,
    /// Zero-length read, the peer closed its write side.
    PeerClosed,
    /// Nothing to read yet.
    WouldBlock,
    /// A failure ridden out by policy; the connection stays registered.
    Ignored(io::Error),
    /// The connection is unusable and has to be closed.
    Broken(io::Error),
}

impl Outcome {
    pub fn should_close(&self) -> bool {
        matches!(self, Outcome::PeerClosed | Outcome::Broken(_))
    }
}

/// Serve one readiness notification on a connection
///
/// Does a single bounded read into `buf`; any non-empty read is answered
/// with `response` regardless of content. Edge-triggered registration means
/// this is the only wakeup for the bytes already queued, which is fine for
/// strict request/fixed-response traffic with small requests.
///
/// `Err` is returned only for failures the write policy declares fatal to
/// the process; everything else comes back as an [`Outcome`].
pub fn handle_readable<S: Read + Write>(
    stream: &mut S,
    fd: RawFd,
    buf: &mut [u8],
    response: &[u8],
    config: &ServerConfig,
) -> Result<Outcome> {
    let n = match read_once(stream, buf) {
        Ok(0) => return Ok(Outcome::PeerClosed),
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Outcome::WouldBlock),
        Err(e) => {
            return Ok(match config.read_errors {
                ReadErrorPolicy::Retry => Outcome::Ignored(e),
                ReadErrorPolicy::Close => Outcome::Broken(e),
            });
        }
    };
    trace!(fd, bytes = n, "request read");

    match config.write_failures {
        WriteFailurePolicy::Fatal => write_or_abort(stream, fd, response),
        WriteFailurePolicy::CloseConnection => Ok(write_or_close(stream, response)),
    }
}

fn read_once<S: Read>(stream: &mut S, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// One write; anything short of the full response ends the process,
/// except would-block which drops the response.
fn write_or_abort<S: Write>(stream: &mut S, fd: RawFd, response: &[u8]) -> Result<Outcome> {
    loop {
        match stream.write(response) {
            Ok(n) if n == response.len() => return Ok(Outcome::Responded),
            Ok(written) => {
                return Err(ServerError::ShortWrite {
                    fd,
                    written,
                    expected: response.len(),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Outcome::Ignored(e)),
            Err(source) => return Err(ServerError::Write { fd, source }),
        }
    }
}

/// Write the full response, picking up after partial writes. Failure
/// closes only this connection.
fn write_or_close<S: Write>(stream: &mut S, response: &[u8]) -> Outcome {
    let mut sent = 0;
    while sent < response.len() {
        match stream.write(&response[sent..]) {
            Ok(0) => return Outcome::Broken(io::ErrorKind::WriteZero.into()),
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Outcome::Broken(e),
        }
    }
    Outcome::Responded
}
