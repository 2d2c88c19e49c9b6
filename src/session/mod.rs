//! Client sessions on the control channel
//!
//! - [`ClientSession`]: one peer's handshake state machine, receive buffer and timers
//! - [`SessionRegistry`]: owns live sessions, keyed by stable [`SessionId`]s
//! - [`PeerAddr`]: validated (IP, port) pair for the peer and its data channel

pub mod client;
pub mod peer;
pub mod registry;

pub use client::{
    ClientSession, MAX_BUFFER_SIZE, MIN_POLLING_INTERVAL_MICROS, ServerHello, SessionId,
    SessionState,
};
pub use peer::PeerAddr;
pub use registry::{Admission, SessionRegistry};

use crate::error::SessionError;
use std::fmt;

/// Why a session was removed from the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownReason {
    /// I/O or protocol failure on the control channel
    Error(SessionError),
    /// No heartbeat within the allowed interval
    HeartbeatTimeout,
    /// Network link went down
    LinkDown,
    /// Event loop is stopping
    Shutdown,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownReason::Error(e) => write!(f, "{}", e),
            TeardownReason::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            TeardownReason::LinkDown => f.write_str("network link down"),
            TeardownReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

impl From<SessionError> for TeardownReason {
    fn from(e: SessionError) -> Self {
        TeardownReason::Error(e)
    }
}
