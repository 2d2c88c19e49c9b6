//! Error types for padstream
//!
//! Two layers:
//! - [`Error`]: daemon-level failures (configuration, socket setup, poll failure).
//!   These terminate the task that hits them.
//! - [`SessionError`]: per-connection failures. They are recovered by tearing the
//!   session down and never escape the event loop.

use crate::protocol::InvalidFrame;
use std::io;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// padstream error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Configuration values out of range
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Socket could not be created, bound or put into listening mode
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address the socket was bound to
        addr: String,
        /// Underlying OS error
        source: io::Error,
    },

    /// The readiness wait itself failed
    #[error("Poll error: {0}")]
    Poll(io::Error),

    /// Unknown input or status source in config
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// Worker thread could not be started
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name
        name: &'static str,
        /// Underlying OS error
        source: io::Error,
    },

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Why a single client session failed.
///
/// Raw OS error codes are folded into these variants at the session boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Orderly close from the peer (EOF on the control channel)
    #[error("peer closed the connection")]
    PeerClosed,

    /// Connection reset or aborted
    #[error("connection reset by peer")]
    Reset,

    /// Peer sent bytes that cannot be a valid stream
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Any other socket failure
    #[error("connection error: {0:?}")]
    Io(io::ErrorKind),
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => SessionError::Reset,
            io::ErrorKind::UnexpectedEof => SessionError::PeerClosed,
            kind => SessionError::Io(kind),
        }
    }
}

/// Protocol violations detected while reassembling the control stream.
///
/// Each one purges the receive buffer: the position of the next valid frame
/// can no longer be trusted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// Accumulated bytes would exceed the receive buffer bound
    #[error("receive buffer would exceed {limit} bytes")]
    BufferOverflow {
        /// Buffer bound in bytes
        limit: usize,
    },

    /// Frame failed verification
    #[error("malformed frame: {0}")]
    Malformed(InvalidFrame),

    /// Handshake announced port 0 for the data channel
    #[error("handshake announced an invalid data port")]
    InvalidDataPort,
}
