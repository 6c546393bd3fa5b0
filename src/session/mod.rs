//! Session layer: byte stream -> pesan aplikasi
//!
//! Session memasang dirinya sebagai `EventTrigger` pada connection, lalu
//! menjalankan `Codec::decode` berulang atas window yang di-buffer.

mod ports;
#[allow(clippy::module_inception)]
mod session;

pub use ports::{Codec, EventListener};
pub use session::{CloseCallback, Session, SessionState};
