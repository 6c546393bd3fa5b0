//! Configuration untuk connection, server dan client
//!
//! Semua struct punya `Default` yang masuk akal dan builder `with_*`.

use std::env;
use std::time::Duration;

use crate::core::DEFAULT_CAPACITY;
use crate::error::{Error, Result};

/// Env var untuk alamat bind server
pub const ENV_ADDRESS: &str = "COURIER_ADDRESS";
/// Env var untuk jumlah poller worker
pub const ENV_POLLERS: &str = "COURIER_POLLERS";

/// Per-connection tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Bound for blocking `read(n)` calls
    pub read_timeout: Duration,
    /// Bound for a flush waiting on writable readiness; `None` waits forever
    pub write_timeout: Option<Duration>,
    pub input_capacity: usize,
    pub output_capacity: usize,
    /// TCP_NODELAY
    pub nodelay: bool,
    /// SO_SNDBUF, kernel default jika `None`
    pub send_buffer_size: Option<usize>,
    /// SO_RCVBUF, kernel default jika `None`
    pub recv_buffer_size: Option<usize>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            write_timeout: None,
            input_capacity: DEFAULT_CAPACITY,
            output_capacity: DEFAULT_CAPACITY,
            nodelay: true,
            send_buffer_size: None,
            recv_buffer_size: None,
        }
    }
}

impl ConnectionOptions {
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_capacity(mut self, input: usize, output: usize) -> Self {
        self.input_capacity = input;
        self.output_capacity = output;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Hanya "tcp" yang didukung
    pub network: String,
    pub address: String,
    /// Ukuran pool yang disarankan; `None` berarti default manager
    pub pollers: Option<usize>,
    pub connection: ConnectionOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            address: "127.0.0.1:8000".to_string(),
            pollers: None,
            connection: ConnectionOptions::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn with_pollers(mut self, n: usize) -> Self {
        self.pollers = Some(n);
        self
    }

    pub fn with_connection(mut self, options: ConnectionOptions) -> Self {
        self.connection = options;
        self
    }

    /// Defaults overridden by `COURIER_ADDRESS` / `COURIER_POLLERS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(address) = lookup(ENV_ADDRESS) {
            config.address = address;
        }

        if let Some(raw) = lookup(ENV_POLLERS) {
            let n: usize = raw
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("{} must be a number, got {:?}", ENV_POLLERS, raw)))?;
            if n == 0 {
                return Err(Error::config(format!("{} must be at least 1", ENV_POLLERS)));
            }
            config.pollers = Some(n);
        }

        Ok(config)
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub network: String,
    pub address: String,
    pub connection: ConnectionOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            address: "127.0.0.1:8000".to_string(),
            connection: ConnectionOptions::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn with_connection(mut self, options: ConnectionOptions) -> Self {
        self.connection = options;
        self
    }
}
