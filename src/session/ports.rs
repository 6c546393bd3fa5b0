//! Extension points untuk aplikasi: framing dan event callbacks

use super::Session;
use crate::error::{Error, Result};

/// Framing codec for messages of type `M`
pub trait Codec<M>: Send + Sync {
    /// Serialize one message into wire bytes
    fn encode(&self, msg: &M) -> Result<Vec<u8>>;

    /// Try to take one message from the front of `buf`.
    ///
    /// - `Ok(None)`: half-packet, tunggu bytes berikutnya
    /// - `Ok(Some((msg, n)))`: pesan lengkap sepanjang `n > 0` bytes
    /// - `Err(_)`: framing rusak, session ditutup
    fn decode(&self, buf: &[u8]) -> Result<Option<(M, usize)>>;
}

/// Session lifecycle callbacks.
///
/// `on_message` dipanggil dari thread poller; jangan block lama di sana.
pub trait EventListener<M>: Send + Sync {
    fn on_connect(&self, _session: &Session<M>) {}

    fn on_message(&self, session: &Session<M>, msg: M);

    fn on_error(&self, _session: &Session<M>, _err: &Error) {}

    fn on_close(&self, _session: &Session<M>) {}
}
