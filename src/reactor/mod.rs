//! Readiness-driven connection handling
//!
//! This module provides the per-replica machinery:
//! - epoll-backed readiness poller
//! - Connection table keyed by fd
//! - Per-connection read/respond handler
//! - The event loop tying them together

pub mod connection_table;
pub mod event_loop;
pub mod handler;
pub mod poller;

pub use connection_table::ConnectionTable;
pub use event_loop::{EventLoop, LoopStats};
pub use handler::Outcome;
pub use poller::{Events, Interest, Poller, Readiness};
