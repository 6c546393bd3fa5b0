use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::ports::{Codec, EventListener};
use crate::error::{Error, Result};
use crate::network::{ConnType, Connection, EventTrigger};

/// Dipanggil sekali saat session ditutup
pub type CloseCallback<M> = Box<dyn FnOnce(&Session<M>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Codec dan listener boleh dipasang, belum menerima data
    Configuring,
    Running,
    Closed,
}

/// A connection plus the codec and listener that give its bytes meaning
pub struct Session<M> {
    conn: Arc<dyn Connection>,
    codec: RwLock<Option<Arc<dyn Codec<M>>>>,
    listener: RwLock<Option<Arc<dyn EventListener<M>>>>,
    close_callback: Mutex<Option<CloseCallback<M>>>,
    state: Mutex<SessionState>,
    self_ref: Weak<Session<M>>,
}

/// Jembatan connection -> session; memegang session selama connection hidup
struct SessionTrigger<M> {
    session: Arc<Session<M>>,
}

impl<M: Send + 'static> EventTrigger for SessionTrigger<M> {
    fn on_readable(&self, data: &[u8]) -> usize {
        self.session.handle_bytes(data)
    }

    fn on_hangup(&self) {
        self.session.on_close();
    }
}

impl<M: Send + 'static> Session<M> {
    pub fn new(conn: Arc<dyn Connection>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            conn,
            codec: RwLock::new(None),
            listener: RwLock::new(None),
            close_callback: Mutex::new(None),
            state: Mutex::new(SessionState::Configuring),
            self_ref: self_ref.clone(),
        })
    }

    pub fn set_codec(&self, codec: Arc<dyn Codec<M>>) {
        *self.codec.write() = Some(codec);
    }

    pub fn set_event_listener(&self, listener: Arc<dyn EventListener<M>>) {
        *self.listener.write() = Some(listener);
    }

    /// Only the first callback is kept
    pub fn set_close_callback(&self, callback: CloseCallback<M>) {
        let mut slot = self.close_callback.lock();
        if slot.is_none() {
            *slot = Some(callback);
        }
    }

    /// Start receiving: `on_connect`, then attach to the connection.
    pub fn run(&self) -> Result<()> {
        if self.codec.read().is_none() {
            return Err(Error::config("session codec is not set"));
        }
        let listener = self
            .listener
            .read()
            .clone()
            .ok_or_else(|| Error::config("session event listener is not set"))?;

        {
            let mut state = self.state.lock();
            match *state {
                SessionState::Configuring => *state = SessionState::Running,
                SessionState::Running => return Err(Error::config("session is already running")),
                SessionState::Closed => return Err(Error::SessionClosed),
            }
        }

        listener.on_connect(self);
        // on_connect boleh menutup session
        if self.state() == SessionState::Closed {
            return Err(Error::SessionClosed);
        }

        let session = self.self_ref.upgrade().ok_or(Error::SessionClosed)?;
        self.conn.set_event_trigger(Arc::new(SessionTrigger { session }));

        debug!(session_id = self.id(), remote = self.remote_addr(), "session running");
        Ok(())
    }

    /// Encode `msg` and enqueue it. Call [`Session::flush_buffer`] to send.
    pub fn write_pkg(&self, msg: &M) -> Result<usize> {
        if self.state() == SessionState::Closed {
            return Err(Error::SessionClosed);
        }
        let codec = self
            .codec
            .read()
            .clone()
            .ok_or_else(|| Error::config("session codec is not set"))?;

        let bytes = codec.encode(msg)?;
        self.conn.write_buffer(&bytes)
    }

    pub fn write_buffer(&self, data: &[u8]) -> Result<usize> {
        if self.state() == SessionState::Closed {
            return Err(Error::SessionClosed);
        }
        self.conn.write_buffer(data)
    }

    pub fn flush_buffer(&self) -> Result<()> {
        if self.state() == SessionState::Closed {
            return Err(Error::SessionClosed);
        }
        self.conn.flush_buffer()
    }

    pub fn id(&self) -> u64 {
        self.conn.id()
    }

    pub fn local_addr(&self) -> &str {
        self.conn.local_addr()
    }

    pub fn remote_addr(&self) -> &str {
        self.conn.remote_addr()
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() != SessionState::Closed && self.conn.is_active()
    }

    /// Human-readable summary for logs
    pub fn info(&self) -> String {
        format!(
            "session[id={} type={} local={} remote={} state={:?}]",
            self.id(),
            self.conn.conn_type(),
            self.local_addr(),
            self.remote_addr(),
            self.state()
        )
    }

    /// Close the session and its connection
    pub fn close(&self) -> Result<()> {
        self.on_close();
        self.conn.close()
    }

    fn on_close(&self) {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }

        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_close(self);
        }

        let callback = self.close_callback.lock().take();
        if let Some(callback) = callback {
            callback(self);
        }
        debug!(session_id = self.id(), "session closed");
    }

    fn fail(&self, listener: &dyn EventListener<M>, err: Error) {
        warn!(session_id = self.id(), error = %err, "closing session");
        listener.on_error(self, &err);
        if let Err(e) = self.close() {
            warn!(session_id = self.id(), error = %e, "session close failed");
        }
    }

    /// Decode loop over the buffered window; returns bytes consumed
    fn handle_bytes(&self, data: &[u8]) -> usize {
        let (codec, listener) = match (self.codec.read().clone(), self.listener.read().clone()) {
            (Some(codec), Some(listener)) => (codec, listener),
            _ => return 0,
        };

        let conn_type = self.conn.conn_type();
        if conn_type != ConnType::Tcp {
            let err = Error::Unsupported(format!("session cannot handle {} connections", conn_type));
            self.fail(listener.as_ref(), err);
            return 0;
        }

        let mut offset = 0;
        while self.is_active() && offset < data.len() {
            let window = &data[offset..];
            match codec.decode(window) {
                Ok(None) => break,
                Ok(Some((msg, n))) => {
                    if n == 0 || n > window.len() {
                        let err = Error::decode(format!(
                            "codec reported {} bytes with {} buffered",
                            n,
                            window.len()
                        ));
                        self.fail(listener.as_ref(), err);
                        break;
                    }
                    offset += n;
                    listener.on_message(self, msg);
                }
                Err(e) => {
                    self.fail(listener.as_ref(), e);
                    break;
                }
            }
        }
        offset
    }
}

impl<M> fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.conn.id())
            .field("remote_addr", &self.conn.remote_addr())
            .field("state", &*self.state.lock())
            .finish()
    }
}
