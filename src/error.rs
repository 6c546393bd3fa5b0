//! Error types untuk Courier
//!
//! Satu enum untuk seluruh layer: ring buffer, poller, connection, session,
//! server dan client. Kondisi retryable (WouldBlock) tidak pernah sampai ke
//! aplikasi; ia ditangani oleh re-registration atau buffer growth.

use std::io;
use thiserror::Error;

/// Main error type for Courier operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error during socket operations
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Bounded wait for buffered bytes (or for a flush) expired
    #[error("net io timeout")]
    Timeout,

    #[error("net conn is closed")]
    ConnClosed,

    #[error("session is closed")]
    SessionClosed,

    #[error("client has already been closed")]
    ClientClosed,

    #[error("server has already been closed")]
    ServerClosed,

    #[error("poller has already been closed")]
    PollerClosed,

    /// Session started without codec or event listener, or similar misuse
    #[error("configuration error: {0}")]
    Config(String),

    /// Codec reported an unrecoverable framing error
    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    /// Connection type or network the session/server cannot handle
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Ring buffer hit its hard capacity ceiling
    #[error("ring buffer exhausted at {capacity} bytes")]
    BufferExhausted { capacity: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias for Courier operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True jika error disebabkan oleh timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// True jika operasi gagal karena resource sudah ditutup
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::ConnClosed
                | Self::SessionClosed
                | Self::ClientClosed
                | Self::ServerClosed
                | Self::PollerClosed
        )
    }

    /// Kernel would-block / interrupted: caller boleh mencoba lagi
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Timeout.is_timeout());
        assert!(!Error::Timeout.is_closed());
        assert!(Error::ConnClosed.is_closed());
        assert!(Error::ServerClosed.is_closed());
        assert!(!Error::decode("bad").is_closed());

        let would_block: Error = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(would_block.is_retryable());
        let reset: Error = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert!(!reset.is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(Error::Timeout.to_string(), "net io timeout");
        assert_eq!(Error::ConnClosed.to_string(), "net conn is closed");
        assert_eq!(
            Error::BufferExhausted { capacity: 16 }.to_string(),
            "ring buffer exhausted at 16 bytes"
        );
    }
}
