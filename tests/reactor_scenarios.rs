//! Reactor behaviour under backpressure and close
//!
//! Run with: cargo test --test reactor_scenarios -- --nocapture

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use courier::{
    ConnectionOptions, Connection, Error, EventTrigger, EventType, PollerManager, TcpConnection,
};

fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (server, client)
}

fn shrink_recv_buffer(stream: &TcpStream, size: libc::c_int) {
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &size as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    assert_eq!(rc, 0);
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

fn eventually(mut f: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Balas "pong" dan flush langsung dari thread poller
struct PongOnRead {
    conn: Mutex<Option<Arc<TcpConnection>>>,
    flushes: AtomicUsize,
}

impl EventTrigger for PongOnRead {
    fn on_readable(&self, data: &[u8]) -> usize {
        let conn = self.conn.lock().unwrap().clone();
        if let Some(conn) = conn {
            if conn.write_buffer(b"pong").is_ok() && conn.flush_buffer().is_ok() {
                self.flushes.fetch_add(1, Ordering::SeqCst);
            }
        }
        data.len()
    }

    fn on_hangup(&self) {
        self.conn.lock().unwrap().take();
    }
}

#[test]
fn test_flush_waits_for_reactor_drain() {
    const TOTAL: usize = 4 * 1024 * 1024;

    let manager = PollerManager::new(1).unwrap();
    let (server, mut peer) = socket_pair();
    shrink_recv_buffer(&peer, 4096);

    let options = ConnectionOptions::default().with_send_buffer_size(4096);
    let conn = TcpConnection::from_std(server, manager.pick().unwrap(), &options).unwrap();
    conn.register(EventType::Read).unwrap();

    let data = pattern(TOTAL);
    assert_eq!(conn.write_buffer(&data).unwrap(), TOTAL);
    assert_eq!(conn.pending_output(), TOTAL);

    let reader_started = Arc::new(AtomicBool::new(false));
    let reader = {
        let started = reader_started.clone();
        thread::spawn(move || {
            // Beri waktu flush untuk mentok di socket penuh
            thread::sleep(Duration::from_millis(100));
            started.store(true, Ordering::SeqCst);

            let mut received = Vec::with_capacity(TOTAL);
            let mut chunk = [0u8; 8192];
            while received.len() < TOTAL {
                let n = peer.read(&mut chunk).unwrap();
                assert!(n > 0, "stream ended early at {}", received.len());
                received.extend_from_slice(&chunk[..n]);
            }
            // Peer dikembalikan supaya socket tetap terbuka sampai assert
            (received, peer)
        })
    };

    conn.flush_buffer().unwrap();
    assert!(reader_started.load(Ordering::SeqCst));
    assert_eq!(conn.pending_output(), 0);

    let (received, peer) = reader.join().unwrap();
    assert_eq!(received.len(), TOTAL);
    assert!(received == data, "bytes arrived out of order");
    assert!(conn.is_active());
    drop(peer);
}

#[test]
fn test_poller_thread_flush_during_blocked_flush() {
    const TOTAL: usize = 256 * 1024;

    let manager = PollerManager::new(1).unwrap();
    let (server, mut peer) = socket_pair();
    shrink_recv_buffer(&peer, 4096);

    let options = ConnectionOptions::default()
        .with_send_buffer_size(4096)
        .with_write_timeout(Some(Duration::from_secs(10)));
    let conn = TcpConnection::from_std(server, manager.pick().unwrap(), &options).unwrap();
    conn.register(EventType::Read).unwrap();

    let trigger = Arc::new(PongOnRead {
        conn: Mutex::new(Some(conn.clone())),
        flushes: AtomicUsize::new(0),
    });
    conn.set_event_trigger(trigger.clone());

    let data = pattern(TOTAL);
    conn.write_buffer(&data).unwrap();
    let flusher = {
        let conn = conn.clone();
        thread::spawn(move || conn.flush_buffer())
    };

    // Flusher sudah menunggu on_writable; pesan masuk memicu flush di poller
    thread::sleep(Duration::from_millis(100));
    peer.write_all(b"ping").unwrap();
    assert!(eventually(|| trigger.flushes.load(Ordering::SeqCst) >= 1));

    peer.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    let mut received = Vec::with_capacity(TOTAL + 4);
    let mut chunk = [0u8; 8192];
    while received.len() < TOTAL + 4 {
        let n = peer.read(&mut chunk).unwrap();
        assert!(n > 0, "stream ended early at {}", received.len());
        received.extend_from_slice(&chunk[..n]);
    }

    assert!(flusher.join().unwrap().is_ok());
    assert!(received[..TOTAL] == data[..], "bytes arrived out of order");
    assert_eq!(&received[TOTAL..], b"pong");
    assert!(eventually(|| conn.pending_output() == 0));
    assert!(conn.is_active());

    conn.close().unwrap();
    manager.close();
}

#[test]
fn test_flush_write_timeout() {
    let manager = PollerManager::new(1).unwrap();
    let (server, peer) = socket_pair();
    shrink_recv_buffer(&peer, 4096);

    let options = ConnectionOptions::default()
        .with_send_buffer_size(4096)
        .with_write_timeout(Some(Duration::from_millis(100)));
    let conn = TcpConnection::from_std(server, manager.pick().unwrap(), &options).unwrap();
    conn.register(EventType::Read).unwrap();

    // Peer tidak pernah membaca
    conn.write_buffer(&pattern(4 * 1024 * 1024)).unwrap();
    let err = conn.flush_buffer().unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert!(conn.is_active());
    assert!(conn.pending_output() > 0);

    drop(peer);
}

#[test]
fn test_close_unblocks_waiting_reader() {
    let manager = PollerManager::new(1).unwrap();
    let (server, _peer) = socket_pair();

    let options = ConnectionOptions::default().with_read_timeout(Duration::from_secs(10));
    let conn = TcpConnection::from_std(server, manager.pick().unwrap(), &options).unwrap();
    conn.register(EventType::Read).unwrap();

    let waiter = {
        let conn = conn.clone();
        thread::spawn(move || {
            let started = Instant::now();
            (conn.read(100), started.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(50));
    conn.close().unwrap();

    let (result, elapsed) = waiter.join().unwrap();
    assert!(matches!(result, Err(Error::ConnClosed)));
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn test_close_unblocks_waiting_flusher() {
    let manager = PollerManager::new(1).unwrap();
    let (server, peer) = socket_pair();
    shrink_recv_buffer(&peer, 4096);

    let options = ConnectionOptions::default().with_send_buffer_size(4096);
    let conn = TcpConnection::from_std(server, manager.pick().unwrap(), &options).unwrap();
    conn.register(EventType::Read).unwrap();
    conn.write_buffer(&pattern(4 * 1024 * 1024)).unwrap();

    let flusher = {
        let conn = conn.clone();
        thread::spawn(move || conn.flush_buffer())
    };

    thread::sleep(Duration::from_millis(100));
    conn.close().unwrap();

    let result = flusher.join().unwrap();
    assert!(matches!(result, Err(Error::ConnClosed)));
    drop(peer);
}

#[test]
fn test_shrinking_pool_keeps_survivors_working() {
    let manager = PollerManager::new(3).unwrap();
    manager.set_poller_nums(1).unwrap();
    assert_eq!(manager.len(), 1);

    let (server, mut peer) = socket_pair();
    let conn =
        TcpConnection::from_std(server, manager.pick().unwrap(), &ConnectionOptions::default())
            .unwrap();
    conn.register(EventType::Read).unwrap();

    std::io::Write::write_all(&mut peer, b"still alive").unwrap();
    assert_eq!(conn.read(11).unwrap(), b"still alive");
}
