//! Edge-triggered epoll TCP server replicated across processes or threads.
//!
//! Every replica owns one [`reactor::EventLoop`]: its own SO_REUSEPORT
//! listener, its own poller and its own connection table. Any request read
//! from a connection is answered with [`net::constants::RESPONSE`].

pub mod config;
pub mod logging;
pub mod net;
pub mod reactor;
pub mod replicator;
pub mod util;

pub use config::ServerConfig;
pub use net::error::{EXIT_FAILURE, Result, ServerError};
pub use reactor::EventLoop;
pub use replicator::Strategy;
