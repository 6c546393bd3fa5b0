//! Poller: satu mio `Poll` + tabel handler per fd
//!
//! Token = nomor fd. `Waker` memakai token terpisah untuk membangunkan
//! wait loop saat close.

use std::cell::Cell;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::event::Event;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace};

use super::{EventType, NetFileDesc, PollHandler};
use crate::error::{Error, Result};

/// Maximum events drained per wait
pub const EVENTS_CAPACITY: usize = 1024;

const WAKE_TOKEN: Token = Token(usize::MAX);

thread_local! {
    static IN_POLLER: Cell<bool> = const { Cell::new(false) };
}

/// True on a thread currently running [`Poller::wait`]
pub(crate) fn on_poller_thread() -> bool {
    IN_POLLER.with(Cell::get)
}

struct PollerThreadMark;

impl PollerThreadMark {
    fn set() -> Self {
        IN_POLLER.with(|f| f.set(true));
        Self
    }
}

impl Drop for PollerThreadMark {
    fn drop(&mut self) {
        IN_POLLER.with(|f| f.set(false));
    }
}

/// One readiness multiplexer
pub struct Poller {
    registry: Registry,
    /// `None` saat wait loop sedang berjalan atau setelah close
    poll: Mutex<Option<Poll>>,
    waker: Waker,
    handlers: RwLock<HashMap<Token, Arc<dyn PollHandler>>>,
    closed: AtomicBool,
}

impl Poller {
    pub fn new() -> Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;

        Ok(Self {
            registry,
            poll: Mutex::new(Some(poll)),
            waker,
            handlers: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    #[inline(always)]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of descriptors currently registered
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Apply a registration change for `desc`
    pub fn register(&self, desc: &NetFileDesc, event: EventType) -> Result<()> {
        if self.is_closed() {
            return Err(Error::PollerClosed);
        }

        let token = Token(desc.fd as usize);
        let mut source = SourceFd(&desc.fd);

        match event {
            EventType::Read => {
                // Handler dipasang sebelum register supaya event pertama
                // (edge-triggered) tidak hilang
                self.handlers.write().insert(token, Arc::clone(&desc.handler));
                if let Err(e) = self.registry.register(&mut source, token, Interest::READABLE) {
                    self.handlers.write().remove(&token);
                    return Err(e.into());
                }
            }
            EventType::ReadToRW => {
                self.registry
                    .reregister(&mut source, token, Interest::READABLE | Interest::WRITABLE)?;
            }
            EventType::RwToRead => {
                self.registry.reregister(&mut source, token, Interest::READABLE)?;
            }
            EventType::DeleteRead => {
                let result = self.registry.deregister(&mut source);
                let removed = self.handlers.write().remove(&token);
                drop(removed);
                result?;
            }
        }

        trace!(fd = desc.fd, ?event, "registration updated");
        Ok(())
    }

    /// Run the event loop until [`Poller::close`].
    ///
    /// Hanya satu thread yang boleh menjalankan wait; pemanggil kedua
    /// mendapat `PollerClosed`.
    pub fn wait(&self) -> Result<()> {
        let mut poll = self.poll.lock().take().ok_or(Error::PollerClosed)?;
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let _mark = PollerThreadMark::set();

        loop {
            if self.is_closed() {
                break;
            }

            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    continue;
                }
                self.dispatch(event);
            }
        }

        debug!("poller wait loop finished");
        // `poll` di-drop di sini, menutup epoll/kqueue fd
        Ok(())
    }

    fn dispatch(&self, event: &Event) {
        let handler = match self.handlers.read().get(&event.token()) {
            Some(h) => Arc::clone(h),
            None => return,
        };
        let fd = event.token().0;

        if event.is_error() || event.is_read_closed() {
            // Trailing bytes dikirim dulu sebelum hang-up
            if event.is_readable() {
                if let Err(e) = handler.on_readable() {
                    error!(fd, error = %e, "readable handler failed");
                }
            }
            if let Err(e) = handler.on_hangup() {
                error!(fd, error = %e, "hangup handler failed");
            }
            return;
        }

        if event.is_readable() {
            if let Err(e) = handler.on_readable() {
                error!(fd, error = %e, "readable handler failed");
            }
        }
        // Edge writable bisa datang bersama readable; jangan sampai hilang
        if event.is_writable() {
            if let Err(e) = handler.on_writable() {
                error!(fd, error = %e, "writable handler failed");
            }
        }
    }

    /// Stop the wait loop and release every handler.
    ///
    /// Descriptors yang masih terdaftar menjadi orphan; pemiliknya tetap
    /// bertanggung jawab menutup socket.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let woke = self.waker.wake();
        // Handler di-drop di luar lock
        let handlers = std::mem::take(&mut *self.handlers.write());
        drop(handlers);
        // Jika wait tidak pernah dijalankan, Poll masih ada di sini
        drop(self.poll.lock().take());

        woke.map_err(Error::from)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
