//! Session registry
//!
//! Owns every live [`ClientSession`] and its readiness registration. Each
//! session's token is derived from its [`SessionId`], so the event loop can go
//! from a readiness event back to the session without a side table.
//!
//! Ids increase monotonically and are never reused, which keeps a stale token
//! from an old event batch from ever resolving to a newer session.

use crate::session::client::{ClientSession, SessionId};
use crate::session::peer::PeerAddr;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::collections::BTreeMap;
use std::io;
use std::time::{Duration, Instant};

/// Tokens below this value are reserved for the listener and the waker
pub const SESSION_TOKEN_BASE: usize = 16;

/// Outcome of offering a freshly accepted stream to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(SessionId),
    /// Registry full; the stream has already been closed
    Rejected,
}

pub struct SessionRegistry {
    registry: Registry,
    sessions: BTreeMap<SessionId, ClientSession>,
    capacity: usize,
    next_id: u64,
}

impl SessionRegistry {
    /// `registry` is a clone of the poll registry the event loop waits on.
    pub fn new(registry: Registry, capacity: usize) -> Self {
        Self {
            registry,
            sessions: BTreeMap::new(),
            capacity,
            next_id: 1,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.capacity
    }

    /// Admit a newly accepted stream, or close it when at capacity.
    ///
    /// Admitted sessions start in `WaitingForHandshake` registered for
    /// readable events only. Registration failure is an error and leaves the
    /// registry unchanged.
    pub fn admit(
        &mut self,
        mut stream: TcpStream,
        peer: PeerAddr,
        now: Instant,
    ) -> io::Result<Admission> {
        if self.is_full() {
            log::warn!(
                "Rejecting connection from {}: {} of {} sessions in use",
                peer,
                self.sessions.len(),
                self.capacity
            );
            let _ = stream.shutdown(std::net::Shutdown::Both);
            return Ok(Admission::Rejected);
        }

        let id = SessionId(self.next_id);
        self.registry
            .register(&mut stream, Self::token_for(id), Interest::READABLE)?;
        self.next_id += 1;

        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        self.sessions
            .insert(id, ClientSession::new(id, stream, peer, now));
        log::info!("Client {} connected as session {}", peer, id);
        Ok(Admission::Admitted(id))
    }

    #[inline]
    pub fn get(&self, id: SessionId) -> Option<&ClientSession> {
        self.sessions.get(&id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut ClientSession> {
        self.sessions.get_mut(&id)
    }

    /// Remove a session and deregister its stream. Unknown ids are a no-op.
    pub fn remove(&mut self, id: SessionId) -> Option<ClientSession> {
        let mut session = self.sessions.remove(&id)?;
        self.close(&mut session);
        Some(session)
    }

    /// Remove every session, in id order
    pub fn drain(&mut self) -> Vec<ClientSession> {
        let sessions = std::mem::take(&mut self.sessions);
        sessions
            .into_values()
            .map(|mut session| {
                self.close(&mut session);
                session
            })
            .collect()
    }

    fn close(&self, session: &mut ClientSession) {
        let stream = session.stream_mut();
        if let Err(e) = self.registry.deregister(stream) {
            log::debug!("Deregister of session {} failed: {}", session.id(), e);
        }
        let _ = session.stream_mut().shutdown(std::net::Shutdown::Both);
    }

    /// Change which readiness a session is woken for.
    ///
    /// Re-registering also re-arms edge-triggered notification, so a socket
    /// that is already writable reports it again.
    pub fn set_interest(&mut self, id: SessionId, interest: Interest) -> io::Result<()> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(());
        };
        self.registry
            .reregister(session.stream_mut(), Self::token_for(id), interest)
    }

    #[inline]
    pub fn token_for(id: SessionId) -> Token {
        Token(SESSION_TOKEN_BASE + id.0 as usize)
    }

    /// Session id behind a token, if it is a session token at all
    #[inline]
    pub fn id_for(token: Token) -> Option<SessionId> {
        token
            .0
            .checked_sub(SESSION_TOKEN_BASE)
            .map(|raw| SessionId(raw as u64))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientSession> {
        self.sessions.values_mut()
    }

    /// Sessions silent for longer than `timeout`
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.is_expired(now, timeout))
            .map(ClientSession::id)
            .collect()
    }

    /// Connected sessions whose polling interval has elapsed
    pub fn due_for_telemetry(&self, now: Instant) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.telemetry_due(now))
            .map(ClientSession::id)
            .collect()
    }

    /// Shortest wait until some connected session is due telemetry
    pub fn next_telemetry_in(&self, now: Instant) -> Option<Duration> {
        self.sessions
            .values()
            .filter_map(|s| s.time_until_telemetry(now))
            .min()
    }
}
