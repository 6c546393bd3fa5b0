//! TCP connection dengan ring buffer dua arah
//!
//! Alur baca: poller -> `on_readable` -> isi input buffer sampai WouldBlock
//! -> serahkan window ke trigger -> release bytes yang dikonsumsi.
//!
//! Alur tulis: `write_buffer` hanya enqueue. `flush_buffer` drain ke socket;
//! jika socket penuh, connection pindah ke ReadWrite dan menunggu
//! `on_writable` mengosongkan output. `flush_lock` hanya dipegang selama
//! drain dan registrasi, tidak selama menunggu.

use std::io;
use std::net::TcpStream as StdTcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use flume::{RecvTimeoutError, Sender};
use mio::net::TcpStream;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::connection::{ConnType, Connection, EventTrigger};
use crate::config::ConnectionOptions;
use crate::core::RingBuffer;
use crate::error::{Error, Result};
use crate::poll::{on_poller_thread, EventType, NetFileDesc, PollHandler, Poller};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Outcome of one fill pass over the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fill {
    /// Socket returned WouldBlock
    Drained,
    /// Input buffer full, deliver before reading more
    Full,
    /// Peer closed the stream
    Eof,
}

/// Non-blocking TCP connection registered with one poller
pub struct TcpConnection {
    id: u64,
    fd: RawFd,
    /// `None` setelah close; drop stream = close fd
    stream: RwLock<Option<TcpStream>>,
    local_addr: String,
    remote_addr: String,
    poller: Arc<Poller>,

    input: Mutex<RingBuffer>,
    input_ready: Condvar,
    output: Mutex<RingBuffer>,

    /// Serialisasi drain + registrasi ReadToRW
    flush_lock: Mutex<()>,
    /// Serialisasi delivery ke trigger
    deliver_lock: Mutex<()>,
    writing: AtomicBool,
    /// Flusher yang menunggu output kosong, satu channel per waiter
    flush_waiters: Mutex<Vec<Sender<()>>>,

    trigger: RwLock<Option<Arc<dyn EventTrigger>>>,
    closed: AtomicBool,
    read_timeout: Mutex<Duration>,
    write_timeout: Mutex<Option<Duration>>,
    self_ref: Weak<TcpConnection>,
}

impl TcpConnection {
    /// Wrap a connected std stream. Stream diubah ke non-blocking.
    pub fn from_std(
        stream: StdTcpStream,
        poller: Arc<Poller>,
        options: &ConnectionOptions,
    ) -> Result<Arc<Self>> {
        stream.set_nonblocking(true)?;
        Self::new(TcpStream::from_std(stream), poller, options)
    }

    /// Wrap an already non-blocking mio stream
    pub fn new(
        stream: TcpStream,
        poller: Arc<Poller>,
        options: &ConnectionOptions,
    ) -> Result<Arc<Self>> {
        // Disable Nagle's algorithm untuk lower latency
        stream.set_nodelay(options.nodelay)?;

        let fd = stream.as_raw_fd();
        if let Some(size) = options.send_buffer_size {
            set_socket_buffer(fd, libc::SO_SNDBUF, size)?;
        }
        if let Some(size) = options.recv_buffer_size {
            set_socket_buffer(fd, libc::SO_RCVBUF, size)?;
        }

        let local_addr = stream
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let remote_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();

        let conn = Arc::new_cyclic(|self_ref| Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            fd,
            stream: RwLock::new(Some(stream)),
            local_addr,
            remote_addr,
            poller,
            input: Mutex::new(RingBuffer::with_capacity(options.input_capacity)),
            input_ready: Condvar::new(),
            output: Mutex::new(RingBuffer::with_capacity(options.output_capacity)),
            flush_lock: Mutex::new(()),
            deliver_lock: Mutex::new(()),
            writing: AtomicBool::new(false),
            flush_waiters: Mutex::new(Vec::new()),
            trigger: RwLock::new(None),
            closed: AtomicBool::new(false),
            read_timeout: Mutex::new(options.read_timeout),
            write_timeout: Mutex::new(options.write_timeout),
            self_ref: self_ref.clone(),
        });

        debug!(conn_id = conn.id, fd, remote = %conn.remote_addr, "connection created");
        Ok(conn)
    }

    #[inline(always)]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    /// Apply a registration change on the owning poller
    pub fn register(&self, event: EventType) -> Result<()> {
        let handler: Arc<dyn PollHandler> = self.self_ref.upgrade().ok_or(Error::ConnClosed)?;
        self.poller.register(&NetFileDesc::new(self.fd, handler), event)
    }

    pub fn read_timeout(&self) -> Duration {
        *self.read_timeout.lock()
    }

    pub fn set_read_timeout(&self, timeout: Duration) {
        *self.read_timeout.lock() = timeout;
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        *self.write_timeout.lock()
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        *self.write_timeout.lock() = timeout;
    }

    /// Bytes still waiting in the output buffer
    pub fn pending_output(&self) -> usize {
        self.output.lock().len()
    }

    /// Block until `n` bytes are buffered, then take them.
    ///
    /// Gagal dengan `Timeout` setelah read timeout, atau `ConnClosed` jika
    /// connection ditutup selama menunggu.
    pub fn read(&self, n: usize) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.read_timeout();
        let mut input = self.input.lock();

        loop {
            if input.len() >= n {
                let mut out = vec![0u8; n];
                input.read(&mut out);
                return Ok(out);
            }
            if !self.is_active() {
                return Err(Error::ConnClosed);
            }
            if self.input_ready.wait_until(&mut input, deadline).timed_out() {
                if input.len() >= n {
                    continue;
                }
                return Err(Error::Timeout);
            }
        }
    }

    /// Read from the socket into the input buffer until WouldBlock, EOF or full
    fn fill_input(&self) -> Result<Fill> {
        let guard = self.stream.read();
        let stream = guard.as_ref().ok_or(Error::ConnClosed)?;
        let mut reader: &TcpStream = stream;
        let mut input = self.input.lock();

        loop {
            match input.copy_from(&mut reader) {
                Ok(0) => return Ok(Fill::Eof),
                Ok(_) => {
                    if input.len() == input.capacity() {
                        return Ok(Fill::Full);
                    }
                }
                Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Fill::Drained)
                }
                Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Hand the buffered window to the trigger and release what it consumed
    fn deliver(&self) {
        let trigger = match self.trigger.read().clone() {
            Some(t) => t,
            None => return,
        };
        self.deliver_to(&trigger);
    }

    fn deliver_to(&self, trigger: &Arc<dyn EventTrigger>) {
        let _delivery = self.deliver_lock.lock();
        let data = {
            let input = self.input.lock();
            if input.is_empty() {
                return;
            }
            input.bytes()
        };

        let consumed = trigger.on_readable(&data);
        trace!(conn_id = self.id, buffered = data.len(), consumed, "delivered");
        self.input.lock().release(consumed);
    }

    /// Write output to the socket. `Ok(true)` jika output kosong.
    fn drain_output(&self) -> Result<bool> {
        let guard = self.stream.read();
        let stream = guard.as_ref().ok_or(Error::ConnClosed)?;
        let mut writer: &TcpStream = stream;
        let mut output = self.output.lock();

        loop {
            if output.is_empty() {
                return Ok(true);
            }
            match output.write_to(&mut writer) {
                Ok(_) => {}
                Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Output kosong: kembali ke Read dan bangunkan semua flusher
    fn finish_writing(&self) -> Result<()> {
        if self.writing.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.register(EventType::RwToRead) {
                return Err(self.fail(e));
            }
        }
        self.wake_flushers();
        Ok(())
    }

    fn wake_flushers(&self) {
        let waiters = std::mem::take(&mut *self.flush_waiters.lock());
        for tx in waiters {
            let _ = tx.try_send(());
        }
    }

    /// Close after a hard I/O error and hand the error back
    fn fail(&self, err: Error) -> Error {
        warn!(conn_id = self.id, error = %err, "closing connection after error");
        if let Err(e) = self.close() {
            warn!(conn_id = self.id, error = %e, "close after error failed");
        }
        err
    }
}

impl Connection for TcpConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn local_addr(&self) -> &str {
        &self.local_addr
    }

    fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    fn write_buffer(&self, data: &[u8]) -> Result<usize> {
        if !self.is_active() {
            return Err(Error::ConnClosed);
        }
        self.output.lock().write(data)
    }

    fn flush_buffer(&self) -> Result<()> {
        let waiter = {
            let _flusher = self.flush_lock.lock();
            if !self.is_active() {
                return Err(Error::ConnClosed);
            }

            match self.drain_output() {
                Ok(true) => return self.finish_writing(),
                Ok(false) => {}
                Err(e) => return Err(self.fail(e)),
            }

            // Socket penuh: on_writable melanjutkan drain. Di thread poller
            // tidak boleh menunggu, drain selesai secara async.
            let waiter = if on_poller_thread() {
                None
            } else {
                let (tx, rx) = flume::bounded(1);
                self.flush_waiters.lock().push(tx);
                Some(rx)
            };

            self.writing.store(true, Ordering::Release);
            if let Err(e) = self.register(EventType::ReadToRW) {
                self.writing.store(false, Ordering::Release);
                if !self.is_active() {
                    return Err(Error::ConnClosed);
                }
                return Err(self.fail(e));
            }
            trace!(conn_id = self.id, "flush deferred to writable readiness");
            if !self.is_active() {
                return Err(Error::ConnClosed);
            }
            waiter
        };

        let drained = match waiter {
            Some(rx) => rx,
            None => return Ok(()),
        };
        let waited = match self.write_timeout() {
            Some(timeout) => drained.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => Error::Timeout,
                RecvTimeoutError::Disconnected => Error::ConnClosed,
            }),
            None => drained.recv().map_err(|_| Error::ConnClosed),
        };
        waited?;

        if !self.is_active() {
            return Err(Error::ConnClosed);
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.input.lock().len()
    }

    fn conn_type(&self) -> ConnType {
        ConnType::Tcp
    }

    fn set_event_trigger(&self, trigger: Arc<dyn EventTrigger>) {
        *self.trigger.write() = Some(trigger);

        if !self.is_active() {
            // Close sudah lewat; bytes yang sempat dibaca tetap dikirim,
            // lalu hang-up
            let late = self.trigger.write().take();
            if let Some(trigger) = late {
                self.deliver_to(&trigger);
                trigger.on_hangup();
            }
            return;
        }

        // Bytes yang tiba sebelum trigger dipasang tidak akan memicu edge lagi
        self.deliver();
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let trigger = self.trigger.write().take();
        if let Some(trigger) = trigger {
            trigger.on_hangup();
        }

        if let Err(e) = self.register(EventType::DeleteRead) {
            debug!(conn_id = self.id, fd = self.fd, error = %e, "deregister on close failed");
        }

        drop(self.stream.write().take());

        {
            let _input = self.input.lock();
            self.input_ready.notify_all();
        }
        // Waiter melihat Disconnected -> ConnClosed
        drop(std::mem::take(&mut *self.flush_waiters.lock()));

        debug!(conn_id = self.id, fd = self.fd, "connection closed");
        Ok(())
    }

    #[inline(always)]
    fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

impl PollHandler for TcpConnection {
    fn on_readable(&self) -> Result<()> {
        loop {
            if !self.is_active() {
                return Ok(());
            }

            let fill = self.fill_input();
            self.deliver();
            self.input_ready.notify_all();

            match fill {
                Ok(Fill::Drained) => return Ok(()),
                Ok(Fill::Full) => continue,
                Ok(Fill::Eof) => {
                    trace!(conn_id = self.id, "peer closed stream");
                    return self.close();
                }
                Err(Error::ConnClosed) => return Ok(()),
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    fn on_writable(&self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        let emptied = match self.drain_output() {
            Ok(emptied) => emptied,
            Err(Error::ConnClosed) => return Ok(()),
            Err(e) => return Err(self.fail(e)),
        };

        if emptied {
            return self.finish_writing();
        }
        Ok(())
    }

    fn on_hangup(&self) -> Result<()> {
        self.close()
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.id)
            .field("fd", &self.fd)
            .field("remote_addr", &self.remote_addr)
            .field("active", &self.is_active())
            .finish()
    }
}

/// SO_SNDBUF / SO_RCVBUF
fn set_socket_buffer(fd: RawFd, option: libc::c_int, size: usize) -> io::Result<()> {
    let optval = libc::c_int::try_from(size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "socket buffer size too large"))?;

    // SAFETY: fd milik stream yang masih hidup, optval valid selama call
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
