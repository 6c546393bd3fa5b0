//! Server/Client end-to-end over loopback
//!
//! Run with: cargo test --test server_client -- --nocapture

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use courier::protocol::LengthFieldCodec;
use courier::{
    Client, ClientConfig, ConnectionOptions, Error, EventListener, PollerManager, Server,
    ServerConfig, Session,
};
use flume::{Receiver, Sender};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Server side: kirim balik setiap frame
struct Echo;

impl EventListener<Vec<u8>> for Echo {
    fn on_message(&self, session: &Session<Vec<u8>>, msg: Vec<u8>) {
        session.write_pkg(&msg).unwrap();
        session.flush_buffer().unwrap();
    }
}

/// Client side: teruskan frame ke channel test
struct Forward {
    tx: Sender<Vec<u8>>,
    closes: Arc<AtomicUsize>,
}

impl EventListener<Vec<u8>> for Forward {
    fn on_message(&self, _session: &Session<Vec<u8>>, msg: Vec<u8>) {
        let _ = self.tx.send(msg);
    }

    fn on_close(&self, _session: &Session<Vec<u8>>) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn echo_server(manager: &Arc<PollerManager>, config: ServerConfig) -> Server<Vec<u8>> {
    Server::new(config, manager.clone(), |session| {
        session.set_codec(Arc::new(LengthFieldCodec::with_max_payload(1 << 20)));
        session.set_event_listener(Arc::new(Echo));
        Ok(())
    })
}

fn client(
    manager: &Arc<PollerManager>,
    addr: String,
) -> (Client<Vec<u8>>, Receiver<Vec<u8>>, Arc<AtomicUsize>) {
    let (tx, rx) = flume::unbounded();
    let closes = Arc::new(AtomicUsize::new(0));
    let forward_closes = closes.clone();

    let client = Client::new(ClientConfig::new(addr), manager.clone(), move |session| {
        session.set_codec(Arc::new(LengthFieldCodec::with_max_payload(1 << 20)));
        session.set_event_listener(Arc::new(Forward {
            tx: tx.clone(),
            closes: forward_closes.clone(),
        }));
        Ok(())
    });
    (client, rx, closes)
}

fn eventually(mut f: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_echo_roundtrip() {
    let manager = Arc::new(PollerManager::new(2).unwrap());
    let server = echo_server(&manager, ServerConfig::new("127.0.0.1:0"));
    let addr = server.start().unwrap();

    let (client, rx, _) = client(&manager, addr.to_string());
    let session = client.connect().unwrap();
    assert!(eventually(|| server.session_count() == 1));

    for i in 0..50u32 {
        let payload = format!("message-{}", i).into_bytes();
        session.write_pkg(&payload).unwrap();
    }
    session.flush_buffer().unwrap();

    for i in 0..50u32 {
        let echoed = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(echoed, format!("message-{}", i).into_bytes());
    }

    client.shutdown().unwrap();
    assert!(eventually(|| server.session_count() == 0));
    server.shutdown().unwrap();
    manager.close();
}

#[test]
fn test_large_frame_grows_small_buffers() {
    let manager = Arc::new(PollerManager::new(1).unwrap());
    let options = ConnectionOptions::default().with_capacity(1024, 1024);
    let server = echo_server(
        &manager,
        ServerConfig::new("127.0.0.1:0").with_connection(options),
    );
    let addr = server.start().unwrap();

    let (client, rx, _) = client(&manager, addr.to_string());
    let session = client.connect().unwrap();

    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    session.write_pkg(&payload).unwrap();
    session.flush_buffer().unwrap();

    let echoed = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(echoed.len(), payload.len());
    assert_eq!(echoed, payload);
}

#[test]
fn test_many_clients() {
    let manager = Arc::new(PollerManager::new(4).unwrap());
    let server = Arc::new(echo_server(&manager, ServerConfig::new("127.0.0.1:0")));
    let addr = server.start().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|id| {
            let manager = manager.clone();
            let addr = addr.to_string();
            thread::spawn(move || {
                let (client, rx, _) = client(&manager, addr);
                let session = client.connect().unwrap();
                for seq in 0..20 {
                    let payload = format!("{}:{}", id, seq).into_bytes();
                    session.write_pkg(&payload).unwrap();
                    session.flush_buffer().unwrap();
                    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), payload);
                }
                client.shutdown().unwrap();
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert!(eventually(|| server.session_count() == 0));
}

#[test]
fn test_server_shutdown_closes_clients() {
    let manager = Arc::new(PollerManager::new(1).unwrap());
    let server = echo_server(&manager, ServerConfig::new("127.0.0.1:0"));
    let addr = server.start().unwrap();

    let (client, _rx, closes) = client(&manager, addr.to_string());
    client.connect().unwrap();
    assert!(eventually(|| server.session_count() == 1));

    server.shutdown().unwrap();
    assert_eq!(server.session_count(), 0);
    assert!(matches!(server.shutdown(), Err(Error::ServerClosed)));

    // Client melihat hang-up dan wait() kembali
    assert!(client.wait_timeout(RECV_TIMEOUT));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(!client.session().unwrap().is_active());

    // Listener sudah ditutup
    assert!(std::net::TcpStream::connect(addr).is_err());
}

#[test]
fn test_serve_blocks_until_shutdown() {
    let manager = Arc::new(PollerManager::new(1).unwrap());
    let server = Arc::new(echo_server(&manager, ServerConfig::new("127.0.0.1:0")));

    let serving = {
        let server = server.clone();
        thread::spawn(move || server.serve())
    };

    assert!(eventually(|| server.local_addr().is_some()));
    assert!(!serving.is_finished());

    server.shutdown().unwrap();
    assert!(serving.join().unwrap().is_ok());
}

#[test]
fn test_rejected_session_is_closed() {
    let manager = Arc::new(PollerManager::new(1).unwrap());
    let server: Server<Vec<u8>> = Server::new(
        ServerConfig::new("127.0.0.1:0"),
        manager.clone(),
        |_| Err(Error::config("no sessions today")),
    );
    let addr = server.start().unwrap();

    let (client, _rx, closes) = client(&manager, addr.to_string());
    client.connect().unwrap();

    assert!(client.wait_timeout(RECV_TIMEOUT));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(server.session_count(), 0);
}
