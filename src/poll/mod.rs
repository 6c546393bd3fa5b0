//! Poll layer: readiness multiplexing dan worker pool
//!
//! Satu `Poller` membungkus satu mio `Poll` (epoll di Linux, kqueue di
//! BSD/macOS). `PollerManager` menjalankan setiap poller di thread sendiri.

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::error::Result;

mod manager;
mod poller;

pub use manager::{default_poller_nums, PollerManager};
pub(crate) use poller::on_poller_thread;
pub use poller::{Poller, EVENTS_CAPACITY};

/// Registration change requested for a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Register baru dengan readable interest
    Read,
    /// Tambah writable interest (flush tertunda)
    ReadToRW,
    /// Kembali ke readable saja (output sudah kosong)
    RwToRead,
    /// Deregister dan lepas handler
    DeleteRead,
}

/// Readiness callbacks for one descriptor.
///
/// Dipanggil dari thread poller. Error di-log oleh poller, tidak pernah
/// menghentikan wait loop.
pub trait PollHandler: Send + Sync {
    fn on_readable(&self) -> Result<()> {
        Ok(())
    }

    fn on_writable(&self) -> Result<()> {
        Ok(())
    }

    /// Peer hang-up atau socket error
    fn on_hangup(&self) -> Result<()> {
        Ok(())
    }
}

/// Raw descriptor plus the handler that owns it
#[derive(Clone)]
pub struct NetFileDesc {
    pub fd: RawFd,
    pub handler: Arc<dyn PollHandler>,
}

impl NetFileDesc {
    pub fn new(fd: RawFd, handler: Arc<dyn PollHandler>) -> Self {
        Self { fd, handler }
    }
}

impl fmt::Debug for NetFileDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetFileDesc").field("fd", &self.fd).finish()
    }
}
