//! Sockets, connections and the fatal error taxonomy
//!
//! This module provides the socket-level building blocks of a replica:
//! - SO_REUSEPORT listener setup
//! - Accepted connection handles and their options
//! - Tunable defaults and the fixed response

pub mod connection;
pub mod constants;
pub mod error;
pub mod socket;

pub use connection::Connection;
pub use error::{EXIT_FAILURE, Result, ServerError};
