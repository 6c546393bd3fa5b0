//! Network Layer: connection, server dan client
//!
//! Menggunakan mio untuk non-blocking I/O (epoll/kqueue).
//!
//! Fitur:
//! - Buffered connection dengan backpressure lewat writable registration
//! - Server dengan accept event-driven
//! - Client satu-session

mod client;
mod connection;
mod server;
mod tcp;

pub use client::Client;
pub use connection::{ConnType, Connection, EventTrigger};
pub use server::{NewSessionFn, Server};
pub use tcp::TcpConnection;
