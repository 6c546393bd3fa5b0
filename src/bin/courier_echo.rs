//! Courier Echo Server
//!
//! Setiap frame `LengthFieldCodec` yang diterima dikirim balik ke pengirim.
//!
//! Usage:
//!   cargo run --release --bin courier_echo [OPTIONS]
//!
//! Env `COURIER_ADDRESS` dan `COURIER_POLLERS` dipakai sebagai default.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use courier::logging::init_tracing;
use courier::poll::default_poller_nums;
use courier::protocol::LengthFieldCodec;
use courier::{Error, EventListener, PollerManager, Result, Server, ServerConfig, Session};
use tracing::{debug, error, info, warn};

/// Echo server configuration
struct EchoConfig {
    server: ServerConfig,
    max_payload: usize,
    stats_interval: Duration,
    verbose: bool,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            max_payload: courier::protocol::DEFAULT_MAX_PAYLOAD,
            stats_interval: Duration::from_secs(5),
            verbose: false,
        }
    }
}

/// Server statistics
#[derive(Default)]
struct EchoStats {
    messages_echoed: AtomicU64,
    bytes_echoed: AtomicU64,
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    errors: AtomicU64,
}

impl EchoStats {
    fn print_stats(&self, uptime: Duration, sessions: usize) {
        let msgs = self.messages_echoed.load(Ordering::Relaxed);
        let bytes = self.bytes_echoed.load(Ordering::Relaxed);
        let rate = format!("{:.1}/sec", msgs as f64 / uptime.as_secs_f64().max(f64::EPSILON));

        info!(
            uptime_secs = uptime.as_secs(),
            messages = msgs,
            rate = %rate,
            kb = bytes / 1024,
            active = self.connections_active.load(Ordering::Relaxed),
            total = self.connections_total.load(Ordering::Relaxed),
            sessions,
            errors = self.errors.load(Ordering::Relaxed),
            "echo stats"
        );
    }
}

struct EchoListener {
    stats: Arc<EchoStats>,
    verbose: bool,
}

impl EventListener<Vec<u8>> for EchoListener {
    fn on_connect(&self, session: &Session<Vec<u8>>) {
        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
        info!(remote = session.remote_addr(), id = session.id(), "connected");
    }

    fn on_message(&self, session: &Session<Vec<u8>>, msg: Vec<u8>) {
        if self.verbose {
            debug!(id = session.id(), len = msg.len(), "frame received");
        }

        let len = msg.len() as u64;
        let echoed = session.write_pkg(&msg).and_then(|_| session.flush_buffer());
        match echoed {
            Ok(()) => {
                self.stats.messages_echoed.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_echoed.fetch_add(len, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(id = session.id(), error = %e, "echo failed");
            }
        }
    }

    fn on_error(&self, session: &Session<Vec<u8>>, err: &Error) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        warn!(id = session.id(), error = %err, "session error");
    }

    fn on_close(&self, session: &Session<Vec<u8>>) {
        self.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
        info!(remote = session.remote_addr(), id = session.id(), "disconnected");
    }
}

fn run_server(config: EchoConfig) -> Result<()> {
    let pollers = config.server.pollers.unwrap_or_else(default_poller_nums);
    let manager = Arc::new(PollerManager::new(pollers)?);
    let stats = Arc::new(EchoStats::default());

    let codec = Arc::new(LengthFieldCodec::with_max_payload(config.max_payload));
    let listener = Arc::new(EchoListener {
        stats: stats.clone(),
        verbose: config.verbose,
    });

    let server = Server::new(config.server, manager.clone(), move |session: &Arc<Session<Vec<u8>>>| {
        session.set_codec(codec.clone());
        session.set_event_listener(listener.clone());
        Ok(())
    });

    let addr = server.start()?;
    info!(%addr, pollers, max_payload = config.max_payload, "courier echo server started");

    let start_time = Instant::now();
    while !server.wait_timeout(config.stats_interval) {
        stats.print_stats(start_time.elapsed(), server.session_count());
    }

    manager.close();
    Ok(())
}

fn parse_args() -> Result<EchoConfig> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = EchoConfig {
        server: ServerConfig::from_env()?,
        ..EchoConfig::default()
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.server.address = args[i + 1].clone();
                    i += 1;
                }
            }
            "--pollers" | "-p" => {
                if i + 1 < args.len() {
                    let n = args[i + 1]
                        .parse()
                        .map_err(|_| Error::config(format!("invalid poller count {:?}", args[i + 1])))?;
                    config.server.pollers = Some(n);
                    i += 1;
                }
            }
            "--max-payload" => {
                if i + 1 < args.len() {
                    config.max_payload = args[i + 1]
                        .parse()
                        .unwrap_or(courier::protocol::DEFAULT_MAX_PAYLOAD);
                    i += 1;
                }
            }
            "--stats" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().unwrap_or(5);
                    config.stats_interval = Duration::from_secs(secs.max(1));
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!("Courier Echo - length-field echo server\n");
                println!("Usage: courier_echo [OPTIONS]\n");
                println!("Options:");
                println!("  -b, --bind <ADDR>        Bind address (default: 127.0.0.1:8000)");
                println!("  -p, --pollers <N>        Poller threads (default: cpus/20 + 1)");
                println!("      --max-payload <N>    Max frame payload in bytes (default: 65536)");
                println!("      --stats <SECS>       Stats interval (default: 5)");
                println!("  -v, --verbose            Log every frame");
                println!("  -h, --help               Show this help");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    Ok(config)
}

fn main() {
    init_tracing();

    let result = parse_args().and_then(run_server);
    if let Err(e) = result {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
