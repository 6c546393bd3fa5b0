//! Courier Server dengan event-driven accept
//!
//! Listener terdaftar di salah satu poller sebagai `PollHandler`. Setiap
//! connection yang di-accept mendapat poller (random), session, dan callback
//! `new_session` untuk memasang codec dan listener.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::tcp::TcpConnection;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::poll::{EventType, NetFileDesc, PollHandler, Poller, PollerManager};
use crate::session::Session;

/// Callback that configures every new session (codec, listener)
pub type NewSessionFn<M> = dyn Fn(&Arc<Session<M>>) -> Result<()> + Send + Sync;

/// One-shot "done" flag that threads can block on
pub(crate) struct Latch {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn release(&self) {
        *self.done.lock() = true;
        self.cv.notify_all();
    }

    pub(crate) fn reset(&self) {
        *self.done.lock() = false;
    }

    pub(crate) fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cv.wait(&mut done);
        }
    }

    /// False jika timeout habis sebelum release
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.cv.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}

/// Listening socket registered on a poller
struct Acceptor<M> {
    listener: TcpListener,
    fd: RawFd,
    server: Weak<ServerInner<M>>,
}

impl<M: Send + 'static> PollHandler for Acceptor<M> {
    fn on_readable(&self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let server = match self.server.upgrade() {
                        Some(server) => server,
                        None => return Ok(()),
                    };
                    if let Err(e) = server.accept(stream) {
                        warn!(remote = %addr, error = %e, "failed to set up accepted connection");
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

struct ServerInner<M> {
    config: ServerConfig,
    manager: Arc<PollerManager>,
    new_session: Box<NewSessionFn<M>>,
    acceptor: Mutex<Option<(Arc<Acceptor<M>>, Arc<Poller>)>>,
    local_addr: Mutex<Option<SocketAddr>>,
    sessions: Mutex<HashMap<u64, Arc<Session<M>>>>,
    closed: AtomicBool,
    done: Latch,
}

impl<M: Send + 'static> ServerInner<M> {
    fn accept(self: &Arc<Self>, stream: TcpStream) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ServerClosed);
        }

        let poller = self.manager.pick()?;
        let conn = TcpConnection::new(stream, poller, &self.config.connection)?;
        if let Err(e) = self.start_session(&conn) {
            let _ = conn.close();
            return Err(e);
        }
        Ok(())
    }

    fn start_session(self: &Arc<Self>, conn: &Arc<TcpConnection>) -> Result<()> {
        conn.register(EventType::Read)?;

        let session = Session::new(conn.clone());
        (self.new_session)(&session)?;

        let id = session.id();
        self.sessions.lock().insert(id, session.clone());
        let server = Arc::downgrade(self);
        session.set_close_callback(Box::new(move |s| {
            if let Some(server) = server.upgrade() {
                server.sessions.lock().remove(&s.id());
            }
        }));

        if let Err(e) = session.run() {
            let _ = session.close();
            return Err(e);
        }

        // Shutdown bisa terjadi di antara accept dan run
        if self.closed.load(Ordering::Acquire) {
            let _ = session.close();
            return Err(Error::ServerClosed);
        }

        debug!(session = %session.info(), "session accepted");
        Ok(())
    }
}

/// TCP server producing one [`Session`] per accepted connection
pub struct Server<M: Send + 'static> {
    inner: Arc<ServerInner<M>>,
}

impl<M: Send + 'static> Server<M> {
    /// `new_session` runs for every accepted connection before the session
    /// starts; return an error to reject it.
    pub fn new<F>(config: ServerConfig, manager: Arc<PollerManager>, new_session: F) -> Self
    where
        F: Fn(&Arc<Session<M>>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ServerInner {
                config,
                manager,
                new_session: Box::new(new_session),
                acceptor: Mutex::new(None),
                local_addr: Mutex::new(None),
                sessions: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                done: Latch::new(),
            }),
        }
    }

    /// Bind and start accepting. Returns the bound address.
    pub fn start(&self) -> Result<SocketAddr> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(Error::ServerClosed);
        }
        if inner.config.network != "tcp" {
            return Err(Error::Unsupported(format!("network {:?}", inner.config.network)));
        }

        let mut slot = inner.acceptor.lock();
        if slot.is_some() {
            return Err(Error::config("server is already started"));
        }

        let std_listener = StdTcpListener::bind(inner.config.address.as_str())?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener);
        let local_addr = listener.local_addr()?;
        let fd = listener.as_raw_fd();

        let acceptor = Arc::new(Acceptor {
            listener,
            fd,
            server: Arc::downgrade(inner),
        });
        let poller = inner.manager.pick()?;
        poller.register(&NetFileDesc::new(fd, acceptor.clone()), EventType::Read)?;

        *slot = Some((acceptor, poller));
        *inner.local_addr.lock() = Some(local_addr);

        info!(addr = %local_addr, "server listening");
        Ok(local_addr)
    }

    /// Start, then block until [`Server::shutdown`]
    pub fn serve(&self) -> Result<()> {
        self.start()?;
        self.inner.done.wait();
        Ok(())
    }

    /// Block until shutdown or `timeout`; true jika server sudah berhenti
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.inner.done.wait_timeout(timeout)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop accepting and close every session.
    ///
    /// PollerManager tidak ditutup; pemiliknya yang menutup.
    pub fn shutdown(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::ServerClosed);
        }

        let acceptor = inner.acceptor.lock().take();
        if let Some((acceptor, poller)) = acceptor {
            let desc = NetFileDesc::new(acceptor.fd, acceptor.clone());
            if let Err(e) = poller.register(&desc, EventType::DeleteRead) {
                warn!(error = %e, "failed to deregister listener");
            }
        }

        let sessions: Vec<Arc<Session<M>>> = inner.sessions.lock().drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        for session in sessions {
            if let Err(e) = session.close() {
                warn!(session_id = session.id(), error = %e, "failed to close session");
            }
        }

        inner.done.release();
        info!(sessions = count, "server shut down");
        Ok(())
    }
}

impl<M: Send + 'static> Drop for Server<M> {
    fn drop(&mut self) {
        if !self.is_closed() {
            let _ = self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_latch() {
        let latch = Arc::new(Latch::new());
        assert!(!latch.wait_timeout(Duration::from_millis(10)));

        let waiter = {
            let latch = latch.clone();
            thread::spawn(move || latch.wait())
        };
        latch.release();
        waiter.join().unwrap();
        assert!(latch.wait_timeout(Duration::from_millis(10)));

        latch.reset();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_rejects_unknown_network() {
        let manager = Arc::new(PollerManager::new(1).unwrap());
        let config = ServerConfig::new("127.0.0.1:0").with_network("udp");
        let server: Server<Vec<u8>> = Server::new(config, manager, |_| Ok(()));
        assert!(matches!(server.start(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_start_and_shutdown_twice() {
        let manager = Arc::new(PollerManager::new(1).unwrap());
        let server: Server<Vec<u8>> =
            Server::new(ServerConfig::new("127.0.0.1:0"), manager.clone(), |_| Ok(()));

        let addr = server.start().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
        assert!(matches!(server.start(), Err(Error::Config(_))));

        server.shutdown().unwrap();
        assert!(server.is_closed());
        assert!(server.wait_timeout(Duration::from_millis(10)));
        assert!(matches!(server.shutdown(), Err(Error::ServerClosed)));
        assert!(matches!(server.start(), Err(Error::ServerClosed)));

        // Pool tetap hidup setelah server shutdown
        assert!(!manager.is_closed());
        assert!(manager.pick().is_ok());
    }
}
