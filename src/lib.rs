//! Courier - Event-Driven Non-Blocking TCP Reactor
//!
//! Arsitektur:
//! - Poller: satu mio `Poll` per worker thread (epoll/kqueue)
//! - PollerManager: pool poller, dipilih random per connection
//! - Connection: socket + input/output ring buffer + backpressure
//! - Session: decode loop di atas connection dengan codec pluggable
//!
//! Aliran data masuk: Poller -> TcpConnection -> RingBuffer -> Session ->
//! Codec::decode -> EventListener::on_message.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod network;
pub mod poll;
pub mod protocol;
pub mod session;

pub use crate::config::{ClientConfig, ConnectionOptions, ServerConfig};
pub use crate::core::RingBuffer;
pub use crate::error::{Error, Result};
pub use crate::network::{Client, ConnType, Connection, EventTrigger, Server, TcpConnection};
pub use crate::poll::{EventType, NetFileDesc, PollHandler, Poller, PollerManager};
pub use crate::session::{Codec, EventListener, Session, SessionState};
