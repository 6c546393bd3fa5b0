//! Connection abstraction
//!
//! `Connection` adalah apa yang dilihat session: buffer input/output,
//! flush dengan backpressure, dan close. `EventTrigger` adalah arah
//! sebaliknya: connection memanggil session saat ada bytes baru.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Transport kind of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnType {
    Tcp,
    Udp,
    WebSocket,
}

impl fmt::Display for ConnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::WebSocket => "websocket",
        };
        f.write_str(name)
    }
}

/// Receiver of inbound bytes for one connection.
///
/// Dipanggil secara serial (delivery lock), biasanya dari thread poller.
pub trait EventTrigger: Send + Sync {
    /// Handle the buffered window, returning how many leading bytes were
    /// consumed. Sisanya tetap di buffer untuk panggilan berikutnya.
    fn on_readable(&self, data: &[u8]) -> usize;

    /// Connection is closing. Dipanggil tepat sekali.
    fn on_hangup(&self);
}

/// One buffered, non-blocking byte stream
pub trait Connection: Send + Sync {
    /// Process-unique id
    fn id(&self) -> u64;

    fn local_addr(&self) -> &str;

    fn remote_addr(&self) -> &str;

    /// Enqueue bytes on the output buffer. Tidak menyentuh socket.
    fn write_buffer(&self, data: &[u8]) -> Result<usize>;

    /// Drain the output buffer to the socket, waiting out backpressure
    fn flush_buffer(&self) -> Result<()>;

    /// Bytes buffered on the input side
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn conn_type(&self) -> ConnType;

    /// Attach the receiver of inbound bytes
    fn set_event_trigger(&self, trigger: Arc<dyn EventTrigger>);

    /// Close once; later calls are no-ops
    fn close(&self) -> Result<()>;

    fn is_active(&self) -> bool;
}
