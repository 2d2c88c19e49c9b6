//! Per-client control channel session
//!
//! # State Machine
//!
//! ```text
//!  accept ──► WaitingForHandshake ──Handshake{port}──► WaitingForServerConfirm
//!                                                            │
//!                                            writable, server handshake flushed
//!                                                            ▼
//!                                                        Connected
//! ```
//!
//! There is no way back: a peer that drops must open a new session.
//!
//! # Receive Buffer
//!
//! Bytes from the control socket accumulate in a buffer bounded by
//! [`MAX_BUFFER_SIZE`]. After every chunk the buffer is drained of complete
//! frames and heartbeat markers. A chunk that would push the buffer past the
//! bound, or a frame that fails verification, purges the buffer and fails the
//! session.

use crate::error::{ProtocolViolation, SessionError};
use crate::protocol::{self, DecodeResult, Endpoint, Handshake, Packet};
use crate::session::peer::PeerAddr;
use mio::net::TcpStream;
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// Receive buffer bound (1 MiB)
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Polling interval floor: one push per frame at 144 Hz, rounded down to whole ms
pub const MIN_POLLING_INTERVAL_MICROS: u32 = (1000 / 144) * 1000;

/// Bytes read per `read` call
const READ_CHUNK_SIZE: usize = 1024;

/// Stable session identity. Never reused by a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    WaitingForHandshake,
    WaitingForServerConfirm,
    Connected,
}

/// What the server announces in its handshake reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHello {
    pub control_port: u16,
    pub heartbeat_interval_secs: u32,
}

impl ServerHello {
    fn packet(&self) -> Packet {
        Packet::Handshake(Handshake {
            endpoint: Endpoint::Server,
            port: self.control_port,
            heartbeat_interval_secs: self.heartbeat_interval_secs,
        })
    }
}

/// One peer on the control channel
pub struct ClientSession {
    id: SessionId,
    stream: TcpStream,
    peer: PeerAddr,
    state: SessionState,
    buffer: Vec<u8>,
    /// Unsent part of the server handshake (non-empty only mid-write)
    outbound: Vec<u8>,
    last_heartbeat: Instant,
    last_telemetry_sent: Option<Instant>,
    polling_interval_micros: u32,
    data_channel: Option<PeerAddr>,
}

impl ClientSession {
    pub fn new(id: SessionId, stream: TcpStream, peer: PeerAddr, now: Instant) -> Self {
        Self {
            id,
            stream,
            peer,
            state: SessionState::WaitingForHandshake,
            buffer: Vec::new(),
            outbound: Vec::new(),
            last_heartbeat: now,
            last_telemetry_sent: None,
            polling_interval_micros: MIN_POLLING_INTERVAL_MICROS,
            data_channel: None,
        }
    }

    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[inline]
    pub fn peer(&self) -> PeerAddr {
        self.peer
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// UDP destination announced by the client's handshake
    #[inline]
    pub fn data_channel(&self) -> Option<PeerAddr> {
        self.data_channel
    }

    #[inline]
    pub fn polling_interval_micros(&self) -> u32 {
        self.polling_interval_micros
    }

    #[inline]
    pub fn polling_interval(&self) -> Duration {
        Duration::from_micros(self.polling_interval_micros as u64)
    }

    #[inline]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Read everything the socket has, decoding as chunks arrive.
    ///
    /// Returns the number of bytes read. EOF is reported as
    /// [`SessionError::PeerClosed`] after any bytes before it are processed.
    pub fn receive(&mut self, now: Instant) -> Result<usize, SessionError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut total = 0;

        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(SessionError::PeerClosed),
                Ok(n) => {
                    total += n;
                    self.ingest(&chunk[..n], now)?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        log::trace!("Session {}: read {} bytes", self.id, total);
        Ok(total)
    }

    /// Append bytes to the receive buffer and process every complete frame
    pub fn ingest(&mut self, bytes: &[u8], now: Instant) -> Result<(), SessionError> {
        if self.buffer.len() + bytes.len() > MAX_BUFFER_SIZE {
            log::error!(
                "Buffer overflow, clearing buffer for client {} ({} + {} bytes)",
                self.peer,
                self.buffer.len(),
                bytes.len()
            );
            self.purge_buffer();
            return Err(ProtocolViolation::BufferOverflow {
                limit: MAX_BUFFER_SIZE,
            }
            .into());
        }
        self.buffer.extend_from_slice(bytes);
        self.process_buffer(now)
    }

    fn process_buffer(&mut self, now: Instant) -> Result<(), SessionError> {
        let mut consumed = 0;

        loop {
            match protocol::try_decode_one(&self.buffer[consumed..]) {
                DecodeResult::Incomplete => break,
                DecodeResult::Heartbeat { consumed: n } => {
                    log::trace!("Received heartbeat from {}", self.peer);
                    self.last_heartbeat = now;
                    consumed += n;
                }
                DecodeResult::Complete { packet, consumed: n } => {
                    self.last_heartbeat = now;
                    consumed += n;
                    if let Err(violation) = self.handle_packet(packet) {
                        self.purge_buffer();
                        return Err(violation.into());
                    }
                }
                DecodeResult::Invalid(reason) => {
                    log::error!("Invalid packet from {}: {}", self.peer, reason);
                    self.purge_buffer();
                    return Err(ProtocolViolation::Malformed(reason).into());
                }
            }
        }

        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<(), ProtocolViolation> {
        match (self.state, packet) {
            (SessionState::WaitingForHandshake, Packet::Handshake(hs)) => {
                let data_channel = self
                    .peer
                    .with_port(hs.port)
                    .ok_or(ProtocolViolation::InvalidDataPort)?;
                log::debug!(
                    "Received handshake from {}, data channel {}",
                    self.peer,
                    data_channel
                );
                self.data_channel = Some(data_channel);
                self.state = SessionState::WaitingForServerConfirm;
            }
            (
                SessionState::WaitingForServerConfirm | SessionState::Connected,
                Packet::Config {
                    polling_interval_micros,
                },
            ) => {
                let applied = self.apply_polling_interval(polling_interval_micros);
                log::debug!(
                    "Polling interval for {} set to {} us (requested {})",
                    self.peer,
                    applied,
                    polling_interval_micros
                );
            }
            (state, packet) => {
                log::trace!(
                    "Ignoring {} from {} in state {:?}",
                    packet.kind(),
                    self.peer,
                    state
                );
            }
        }
        Ok(())
    }

    /// Requests below the floor leave the current interval in place.
    /// Returns the interval now in effect.
    pub fn apply_polling_interval(&mut self, requested_micros: u32) -> u32 {
        if requested_micros >= MIN_POLLING_INTERVAL_MICROS {
            self.polling_interval_micros = requested_micros;
        }
        self.polling_interval_micros
    }

    fn purge_buffer(&mut self) {
        self.buffer.clear();
        self.buffer.shrink_to_fit();
    }

    /// True while the server handshake still has to be written
    #[inline]
    pub fn wants_writable(&self) -> bool {
        self.state == SessionState::WaitingForServerConfirm
    }

    /// Send the server handshake once the socket is writable.
    ///
    /// Returns `Ok(true)` when the handshake is fully written and the session
    /// is now [`SessionState::Connected`], `Ok(false)` when there is nothing to
    /// do or the socket filled up mid-write (the rest goes out on the next
    /// writable event).
    pub fn confirm_handshake(&mut self, hello: &ServerHello) -> Result<bool, SessionError> {
        if self.state != SessionState::WaitingForServerConfirm {
            return Ok(false);
        }

        if self.outbound.is_empty() {
            protocol::encode_into(&hello.packet(), &mut self.outbound);
        }

        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(SessionError::PeerClosed),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    log::debug!(
                        "Handshake to {} partially sent, {} bytes pending",
                        self.peer,
                        self.outbound.len()
                    );
                    return Ok(false);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.state = SessionState::Connected;
        log::info!("Sent handshake response to {}", self.peer);
        Ok(true)
    }

    /// True when no heartbeat or frame arrived for longer than `timeout`
    #[inline]
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > timeout
    }

    /// Time left before this session is due a telemetry push.
    ///
    /// `None` until the session is connected with a data channel.
    pub fn time_until_telemetry(&self, now: Instant) -> Option<Duration> {
        if self.state != SessionState::Connected || self.data_channel.is_none() {
            return None;
        }
        let Some(last) = self.last_telemetry_sent else {
            return Some(Duration::ZERO);
        };
        let elapsed = now.saturating_duration_since(last);
        Some(self.polling_interval().saturating_sub(elapsed))
    }

    #[inline]
    pub fn telemetry_due(&self, now: Instant) -> bool {
        self.time_until_telemetry(now) == Some(Duration::ZERO)
    }

    #[inline]
    pub fn mark_telemetry_sent(&mut self, now: Instant) {
        self.last_telemetry_sent = Some(now);
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("polling_interval_micros", &self.polling_interval_micros)
            .field("data_channel", &self.data_channel)
            .finish()
    }
}
