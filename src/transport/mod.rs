//! Transport module - framed message I/O and TCP endpoints.
//!
//! - [`Connection`]: send/receive whole messages over any async stream
//! - [`Transport`]: TCP socket owner in server or client role

mod connection;
mod tcp;

pub use connection::{Connection, MessageReader, MessageWriter};
pub use tcp::{Role, Transport, TransportConfig, DEFAULT_BACKLOG};
