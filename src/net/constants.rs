use std::net::{IpAddr, Ipv4Addr};

pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
pub const DEFAULT_PORT: u16 = 8000;

/// Ready events pulled from the poller per loop iteration.
pub const MAX_EVENTS: usize = 128;
/// Bytes read from a connection per readiness notification.
pub const READ_BUF: usize = 4096;

pub const PROCESS_WORKERS: usize = 2;
pub const THREAD_WORKERS: usize = 2;

/// Largest backlog the platform accepts; the kernel clamps to somaxconn.
pub const MAX_BACKLOG: i32 = libc::SOMAXCONN;

pub const RESPONSE_BODY: &[u8] = b"{\"a\":\"b\"}";

/// Fixed reply written for every request, byte for byte.
pub const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Length: 9\r\n\
Content-Type: json\r\n\
\r\n\
{\"a\":\"b\"}";
