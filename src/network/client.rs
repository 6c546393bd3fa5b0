//! Courier Client: dial satu connection dan jalankan session di atasnya

use std::net::TcpStream as StdTcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::connection::Connection;
use super::server::{Latch, NewSessionFn};
use super::tcp::TcpConnection;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::poll::{EventType, PollerManager};
use crate::session::Session;

/// TCP client owning a single session
pub struct Client<M: Send + 'static> {
    config: ClientConfig,
    manager: Arc<PollerManager>,
    new_session: Box<NewSessionFn<M>>,
    session: Mutex<Option<Arc<Session<M>>>>,
    closed: AtomicBool,
    done: Arc<Latch>,
}

impl<M: Send + 'static> Client<M> {
    pub fn new<F>(config: ClientConfig, manager: Arc<PollerManager>, new_session: F) -> Self
    where
        F: Fn(&Arc<Session<M>>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            config,
            manager,
            new_session: Box::new(new_session),
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
            done: Arc::new(Latch::new()),
        }
    }

    /// Dial, configure and run the session
    pub fn connect(&self) -> Result<Arc<Session<M>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ClientClosed);
        }
        if self.config.network != "tcp" {
            return Err(Error::Unsupported(format!("network {:?}", self.config.network)));
        }
        if let Some(current) = self.session.lock().as_ref() {
            if current.is_active() {
                return Err(Error::config("client is already connected"));
            }
        }

        let stream = StdTcpStream::connect(self.config.address.as_str())?;
        let conn = TcpConnection::from_std(stream, self.manager.pick()?, &self.config.connection)?;

        match self.start_session(&conn) {
            Ok(session) => {
                info!(remote = session.remote_addr(), "client connected");
                Ok(session)
            }
            Err(e) => {
                let _ = conn.close();
                Err(e)
            }
        }
    }

    fn start_session(&self, conn: &Arc<TcpConnection>) -> Result<Arc<Session<M>>> {
        conn.register(EventType::Read)?;

        let session = Session::new(conn.clone());
        (self.new_session)(&session)?;

        self.done.reset();
        let done = Arc::clone(&self.done);
        session.set_close_callback(Box::new(move |_| done.release()));

        *self.session.lock() = Some(session.clone());
        if let Err(e) = session.run() {
            let _ = session.close();
            return Err(e);
        }
        Ok(session)
    }

    /// Connect, then block until the session closes
    pub fn run(&self) -> Result<()> {
        self.connect()?;
        self.wait();
        Ok(())
    }

    /// Block until the current session closes
    pub fn wait(&self) {
        self.done.wait();
    }

    /// True jika session tertutup sebelum timeout
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.done.wait_timeout(timeout)
    }

    pub fn session(&self) -> Option<Arc<Session<M>>> {
        self.session.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::ClientClosed);
        }

        let session = self.session.lock().take();
        if let Some(session) = session {
            if let Err(e) = session.close() {
                warn!(session_id = session.id(), error = %e, "failed to close client session");
            }
        }
        self.done.release();
        Ok(())
    }
}

impl<M: Send + 'static> Drop for Client<M> {
    fn drop(&mut self) {
        if !self.is_closed() {
            let _ = self.shutdown();
        }
    }
}
