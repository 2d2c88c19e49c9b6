//! Readiness-driven network loop
//!
//! One thread owns the listener, the UDP data socket and every client
//! session. Each iteration:
//!
//! ```text
//! 1. timeout  = link down ? link_down_timeout : min(idle, next telemetry deadline)
//! 2. poll     (Interrupted retried, anything else fatal)
//! 3. link     transitions first: Down tears everything down, Up rebinds
//! 4. dispatch listener -> accept/admit, session -> read/decode or send handshake
//! 5. sweep    sessions silent past the heartbeat timeout
//! 6. push     sample input once, encode once, send to every due session
//! ```
//!
//! Sockets are edge-triggered, so accept and read always drain until
//! `WouldBlock`.

use crate::config::NetworkConfig;
use crate::core::InputProvider;
use crate::error::{Error, Result, SessionError};
use crate::net::link::{LinkState, NetworkLinkMonitor};
use crate::protocol::{self, Packet, PadTelemetry};
use crate::session::{
    Admission, PeerAddr, ServerHello, SessionId, SessionRegistry, SessionState, TeardownReason,
};
use crate::status::SharedStatus;
use crossbeam_channel::Receiver;
use mio::event::Event;
use mio::net::{TcpListener, UdpSocket};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Listening socket token
pub const LISTENER: Token = Token(0);
/// Waker token (shutdown and link notifications)
pub const WAKER: Token = Token(1);

const EVENTS_CAPACITY: usize = 64;

/// Counters logged when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_sent: u64,
    /// Pushes dropped because the data socket would block
    pub frames_skipped: u64,
    pub sessions_admitted: u64,
    pub sessions_rejected: u64,
    pub teardowns: u64,
}

/// Readiness flags copied out of a mio event
#[derive(Debug, Clone, Copy)]
struct Readiness {
    token: Token,
    readable: bool,
    writable: bool,
    error: bool,
    hangup: bool,
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            error: event.is_error(),
            hangup: event.is_read_closed() && event.is_write_closed(),
        }
    }
}

fn bind_err(addr: SocketAddr) -> impl FnOnce(io::Error) -> Error {
    move |source| Error::Bind {
        addr: addr.to_string(),
        source,
    }
}

/// Listener and data socket, bound together and dropped together
struct Sockets {
    listener: TcpListener,
    data: UdpSocket,
}

impl Sockets {
    /// Bind the TCP listener, then the UDP data socket on the same port
    fn bind(registry: &Registry, addr: SocketAddr) -> Result<Self> {
        let mut listener = TcpListener::bind(addr).map_err(bind_err(addr))?;
        let local = listener.local_addr()?;
        let data_addr = SocketAddr::new(addr.ip(), local.port());
        let data = UdpSocket::bind(data_addr).map_err(bind_err(data_addr))?;

        registry.register(&mut listener, LISTENER, Interest::READABLE)?;
        Ok(Self { listener, data })
    }

    fn close(mut self, registry: &Registry) {
        if let Err(e) = registry.deregister(&mut self.listener) {
            log::debug!("Deregister of listener failed: {}", e);
        }
    }
}

pub struct EventLoop {
    poll: Poll,
    events: Events,
    ready: Vec<Readiness>,
    waker: Arc<Waker>,
    settings: NetworkConfig,
    sockets: Option<Sockets>,
    hello: ServerHello,
    sessions: SessionRegistry,
    link: NetworkLinkMonitor,
    last_rebind_attempt: Option<Instant>,
    input: Box<dyn InputProvider>,
    status: Arc<SharedStatus>,
    running: Arc<AtomicBool>,
    telemetry: Vec<u8>,
    stats: LoopStats,
}

impl EventLoop {
    /// Create the poll, bind both sockets and start with the link up.
    ///
    /// Link changes arrive on `link_events`; whoever sends them should wake
    /// the loop through [`EventLoop::waker`].
    pub fn new(
        settings: &NetworkConfig,
        input: Box<dyn InputProvider>,
        status: Arc<SharedStatus>,
        running: Arc<AtomicBool>,
        link_events: Receiver<LinkState>,
    ) -> Result<Self> {
        let poll = Poll::new().map_err(Error::Poll)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let sessions = SessionRegistry::new(poll.registry().try_clone()?, settings.max_sessions);

        let sockets = Sockets::bind(poll.registry(), settings.control_addr())?;
        let hello = ServerHello {
            control_port: sockets.listener.local_addr()?.port(),
            heartbeat_interval_secs: settings.heartbeat_timeout_secs,
        };
        log::info!(
            "Control channel listening on {} (max {} session{})",
            sockets.listener.local_addr()?,
            settings.max_sessions,
            if settings.max_sessions == 1 { "" } else { "s" }
        );

        status.set_link_up(true);

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            ready: Vec::with_capacity(EVENTS_CAPACITY),
            waker,
            settings: settings.clone(),
            sockets: Some(sockets),
            hello,
            sessions,
            link: NetworkLinkMonitor::new(link_events, LinkState::Up),
            last_rebind_attempt: None,
            input,
            status,
            running,
            telemetry: Vec::with_capacity(256),
            stats: LoopStats::default(),
        })
    }

    /// Wakes a blocked poll. Used for shutdown and link notifications.
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Bound control address, `None` while the link is down or rebinding
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.sockets
            .as_ref()
            .and_then(|s| s.listener.local_addr().ok())
    }

    #[inline]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[inline]
    pub fn link_state(&self) -> LinkState {
        self.link.current()
    }

    #[inline]
    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Run until the run flag clears or the poll fails.
    ///
    /// Every remaining session is torn down before returning, in both cases.
    pub fn run(&mut self) -> Result<()> {
        log::info!("Event loop started");

        let result = loop {
            if !self.running.load(Ordering::Relaxed) {
                break Ok(());
            }
            if let Err(e) = self.iterate(Instant::now()) {
                log::error!("Event loop failed: {}", e);
                break Err(e);
            }
        };

        self.shutdown();
        result
    }

    /// One loop iteration as of `now`.
    ///
    /// Time spent blocked in the poll is added to `now` before the events are
    /// processed, so callers may pass a shifted clock.
    pub fn iterate(&mut self, now: Instant) -> Result<()> {
        let timeout = self.poll_timeout(now);
        let wait_start = Instant::now();

        loop {
            match self.poll.poll(&mut self.events, Some(timeout)) {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Poll(e)),
            }
        }

        let now = now + wait_start.elapsed();
        self.handle_link(now);
        self.dispatch(now);
        self.sweep_heartbeats(now);
        self.push_telemetry(now);
        Ok(())
    }

    fn poll_timeout(&self, now: Instant) -> Duration {
        if !self.link.current().is_up() {
            return self.settings.link_down_timeout();
        }
        let idle = self.settings.idle_timeout();
        match self.sessions.next_telemetry_in(now) {
            Some(next) => next.min(idle),
            None => idle,
        }
    }

    fn handle_link(&mut self, now: Instant) {
        while let Some(state) = self.link.next_transition() {
            match state {
                LinkState::Down => {
                    log::warn!("Network link down, dropping all sessions");
                    self.teardown_all(TeardownReason::LinkDown);
                    if let Some(sockets) = self.sockets.take() {
                        sockets.close(self.poll.registry());
                    }
                    self.status.set_link_up(false);
                }
                LinkState::Up => {
                    log::info!("Network link up");
                    self.status.set_link_up(true);
                    if self.sockets.is_none() {
                        self.last_rebind_attempt = None;
                    }
                }
            }
        }

        if self.link.current().is_up() && self.sockets.is_none() {
            let retry = self.settings.rebind_retry();
            let retry_due = self
                .last_rebind_attempt
                .is_none_or(|last| now.saturating_duration_since(last) >= retry);
            if retry_due {
                self.rebind(now);
            }
        }
    }

    fn rebind(&mut self, now: Instant) {
        self.last_rebind_attempt = Some(now);
        match Sockets::bind(self.poll.registry(), self.settings.control_addr()) {
            Ok(sockets) => {
                if let Ok(local) = sockets.listener.local_addr() {
                    self.hello.control_port = local.port();
                    log::info!("Control channel listening on {}", local);
                }
                self.sockets = Some(sockets);
            }
            Err(e) => {
                log::error!(
                    "Rebind failed: {}; retrying in {:?}",
                    e,
                    self.settings.rebind_retry()
                );
            }
        }
    }

    fn dispatch(&mut self, now: Instant) {
        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        ready.extend(self.events.iter().map(Readiness::from));

        for r in &ready {
            match r.token {
                LISTENER => self.accept_all(now),
                WAKER => log::trace!("Woken"),
                token => {
                    let Some(id) = SessionRegistry::id_for(token) else {
                        continue;
                    };
                    if let Err(reason) = self.drive_session(id, r, now) {
                        self.teardown(id, reason);
                    }
                }
            }
        }

        self.ready = ready;
    }

    fn accept_all(&mut self, now: Instant) {
        loop {
            let Some(sockets) = self.sockets.as_ref() else {
                return;
            };
            match sockets.listener.accept() {
                Ok((stream, addr)) => {
                    let Some(peer) = PeerAddr::from_socket_addr(addr) else {
                        log::warn!("Dropping connection with invalid peer address {}", addr);
                        continue;
                    };
                    match self.sessions.admit(stream, peer, now) {
                        Ok(Admission::Admitted(_)) => {
                            self.stats.sessions_admitted += 1;
                            self.status.client_connected(peer.ip());
                        }
                        Ok(Admission::Rejected) => self.stats.sessions_rejected += 1,
                        Err(e) => log::error!("Failed to register client {}: {}", peer, e),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("Accept error: {}", e);
                    return;
                }
            }
        }
    }

    /// Handle one readiness event for a session. Stale ids are ignored.
    fn drive_session(
        &mut self,
        id: SessionId,
        r: &Readiness,
        now: Instant,
    ) -> std::result::Result<(), TeardownReason> {
        let Some(session) = self.sessions.get_mut(id) else {
            log::trace!("Event for stale session {}", id);
            return Ok(());
        };

        if r.error || r.hangup {
            let err = match session.stream_mut().take_error() {
                Ok(Some(e)) => SessionError::from(e),
                _ => SessionError::PeerClosed,
            };
            return Err(err.into());
        }

        if r.readable {
            let before = session.state();
            session.receive(now)?;
            if before == SessionState::WaitingForHandshake && session.wants_writable() {
                // Re-registering re-arms the writable edge
                self.sessions
                    .set_interest(id, Interest::READABLE | Interest::WRITABLE)
                    .map_err(SessionError::from)?;
            }
        }

        if r.writable {
            let Some(session) = self.sessions.get_mut(id) else {
                return Ok(());
            };
            if session.wants_writable() && session.confirm_handshake(&self.hello)? {
                self.sessions
                    .set_interest(id, Interest::READABLE)
                    .map_err(SessionError::from)?;
            }
        }

        Ok(())
    }

    fn teardown(&mut self, id: SessionId, reason: TeardownReason) {
        let Some(session) = self.sessions.remove(id) else {
            return;
        };
        self.stats.teardowns += 1;

        match &reason {
            TeardownReason::Error(SessionError::PeerClosed) | TeardownReason::Shutdown => {
                log::info!("Client {} disconnected: {}", session.peer(), reason)
            }
            _ => log::warn!("Client {} disconnected: {}", session.peer(), reason),
        }
        self.status.client_disconnected(session.peer().ip());
    }

    fn teardown_all(&mut self, reason: TeardownReason) {
        for session in self.sessions.drain() {
            self.stats.teardowns += 1;
            log::info!("Client {} disconnected: {}", session.peer(), reason);
            self.status.client_disconnected(session.peer().ip());
        }
    }

    fn sweep_heartbeats(&mut self, now: Instant) {
        let timeout = self.settings.heartbeat_timeout();
        for id in self.sessions.expired(now, timeout) {
            self.teardown(id, TeardownReason::HeartbeatTimeout);
        }
    }

    /// Sample once and fan the same encoded frame out to every due session
    fn push_telemetry(&mut self, now: Instant) {
        let due = self.sessions.due_for_telemetry(now);
        if due.is_empty() {
            return;
        }
        let Some(sockets) = self.sockets.as_ref() else {
            return;
        };

        let frame = self.input.sample();
        self.status.set_last_frame(&frame);
        let packet = Packet::PadTelemetry(PadTelemetry {
            frame,
            battery_percent: self.status.battery_percent(),
        });
        protocol::encode_into(&packet, &mut self.telemetry);

        for id in due {
            let Some(session) = self.sessions.get_mut(id) else {
                continue;
            };
            let Some(dest) = session.data_channel() else {
                continue;
            };
            match sockets.data.send_to(&self.telemetry, dest.socket_addr()) {
                Ok(_) => self.stats.frames_sent += 1,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.stats.frames_skipped += 1;
                    log::debug!("Data socket full, skipping frame for {}", dest);
                }
                Err(e) => log::warn!("Failed to send telemetry to {}: {}", dest, e),
            }
            session.mark_telemetry_sent(now);
        }
    }

    fn shutdown(&mut self) {
        self.teardown_all(TeardownReason::Shutdown);
        if let Some(sockets) = self.sockets.take() {
            sockets.close(self.poll.registry());
        }

        let stats = self.stats;
        log::info!(
            "Event loop stopped: sent {} frames ({} skipped), admitted {} sessions, \
             rejected {}, {} teardowns",
            stats.frames_sent,
            stats.frames_skipped,
            stats.sessions_admitted,
            stats.sessions_rejected,
            stats.teardowns
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InputFrame;
    use crate::protocol::{DecodeResult, Endpoint, Handshake, encode, try_decode_one};
    use crate::status::events;
    use crossbeam_channel::{Sender, unbounded};
    use std::io::{Read, Write};
    use std::net::{TcpListener as StdTcpListener, TcpStream, UdpSocket as StdUdpSocket};
    use std::sync::atomic::AtomicU64;

    struct FixedInput;

    /// Stamps each frame with its sample number
    struct CountingInput(Arc<AtomicU64>);

    impl InputProvider for CountingInput {
        fn sample(&mut self) -> InputFrame {
            InputFrame {
                timestamp: self.0.fetch_add(1, Ordering::SeqCst) + 1,
                ..InputFrame::default()
            }
        }
    }

    impl InputProvider for FixedInput {
        fn sample(&mut self) -> InputFrame {
            InputFrame {
                lx: 100,
                timestamp: 7,
                ..InputFrame::default()
            }
        }
    }

    fn settings(max_sessions: usize) -> NetworkConfig {
        NetworkConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            control_port: 0,
            max_sessions,
            idle_timeout_ms: 5,
            link_down_timeout_ms: 5,
            rebind_retry_ms: 0,
            ..NetworkConfig::default()
        }
    }

    fn new_loop(max_sessions: usize) -> (EventLoop, Arc<SharedStatus>, Sender<LinkState>) {
        start_loop(&settings(max_sessions), Box::new(FixedInput))
    }

    fn start_loop(
        settings: &NetworkConfig,
        input: Box<dyn InputProvider>,
    ) -> (EventLoop, Arc<SharedStatus>, Sender<LinkState>) {
        let status = Arc::new(SharedStatus::new());
        let (tx, rx) = unbounded();
        let lp = EventLoop::new(
            settings,
            input,
            Arc::clone(&status),
            Arc::new(AtomicBool::new(true)),
            rx,
        )
        .unwrap();
        status.events().take();
        (lp, status, tx)
    }

    /// Iterate until `done` holds, failing after a few seconds
    fn spin_until(lp: &mut EventLoop, mut done: impl FnMut(&EventLoop) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(lp) {
            assert!(Instant::now() < deadline, "condition not reached");
            lp.iterate(Instant::now()).unwrap();
        }
    }

    fn client_handshake(port: u16) -> Vec<u8> {
        encode(&Packet::Handshake(Handshake {
            endpoint: Endpoint::Client,
            port,
            heartbeat_interval_secs: 0,
        }))
    }

    fn only_state(lp: &EventLoop) -> Option<SessionState> {
        lp.sessions().iter().next().map(|s| s.state())
    }

    #[test]
    fn test_handshake_telemetry_and_timeout() {
        let (mut lp, status, _tx) = new_loop(1);
        let control = lp.local_addr().unwrap();

        let data = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        data.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let data_port = data.local_addr().unwrap().port();

        let mut client = TcpStream::connect(control).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        spin_until(&mut lp, |lp| lp.sessions().len() == 1);
        assert_eq!(status.events().take() & events::PC_CONNECT, events::PC_CONNECT);

        client.write_all(&client_handshake(data_port)).unwrap();
        spin_until(&mut lp, |lp| only_state(lp) == Some(SessionState::Connected));

        // Server handshake reply
        let mut reply = vec![0u8; 12];
        client.read_exact(&mut reply).unwrap();
        match try_decode_one(&reply) {
            DecodeResult::Complete {
                packet: Packet::Handshake(hs),
                consumed,
            } => {
                assert_eq!(consumed, 12);
                assert_eq!(hs.endpoint, Endpoint::Server);
                assert_eq!(hs.port, control.port());
                assert_eq!(hs.heartbeat_interval_secs, 25);
            }
            other => panic!("unexpected reply {:?}", other),
        }

        // Telemetry on the announced port
        spin_until(&mut lp, |lp| lp.stats().frames_sent > 0);
        let mut datagram = [0u8; 512];
        let (n, _) = data.recv_from(&mut datagram).unwrap();
        match try_decode_one(&datagram[..n]) {
            DecodeResult::Complete {
                packet: Packet::PadTelemetry(pad),
                ..
            } => {
                assert_eq!(pad.frame.lx, 100);
                assert_eq!(pad.frame.timestamp, 7);
            }
            other => panic!("unexpected datagram {:?}", other),
        }

        // 26 s of silence
        lp.iterate(Instant::now() + Duration::from_secs(26)).unwrap();
        assert!(lp.sessions().is_empty());
        assert_ne!(status.events().take() & events::PC_DISCONNECT, 0);
        assert_eq!(status.snapshot().client_ip, None);

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_heartbeats_keep_session() {
        let (mut lp, _status, _tx) = new_loop(1);
        let mut client = TcpStream::connect(lp.local_addr().unwrap()).unwrap();
        spin_until(&mut lp, |lp| lp.sessions().len() == 1);

        let mut marker = Vec::new();
        protocol::encode_heartbeat(&mut marker);
        client.write_all(&marker).unwrap();
        let start = lp.sessions().iter().next().unwrap().last_heartbeat();
        spin_until(&mut lp, |lp| {
            lp.sessions().iter().next().unwrap().last_heartbeat() > start
        });

        lp.iterate(Instant::now() + Duration::from_secs(20)).unwrap();
        assert_eq!(lp.sessions().len(), 1);
    }

    #[test]
    fn test_second_client_rejected() {
        let (mut lp, _status, _tx) = new_loop(1);
        let addr = lp.local_addr().unwrap();

        let _first = TcpStream::connect(addr).unwrap();
        spin_until(&mut lp, |lp| lp.sessions().len() == 1);

        let mut second = TcpStream::connect(addr).unwrap();
        second.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        spin_until(&mut lp, |lp| lp.stats().sessions_rejected == 1);

        let mut buf = [0u8; 1];
        assert_eq!(second.read(&mut buf).unwrap(), 0);
        assert_eq!(lp.sessions().len(), 1);
    }

    #[test]
    fn test_protocol_violation_tears_down() {
        let (mut lp, status, _tx) = new_loop(1);
        let mut client = TcpStream::connect(lp.local_addr().unwrap()).unwrap();
        spin_until(&mut lp, |lp| lp.sessions().len() == 1);
        status.events().take();

        // Declared length far past the frame limit
        client.write_all(&[0xFF, 0xFF, 0xFF, 0x7F, 1]).unwrap();
        spin_until(&mut lp, |lp| lp.sessions().is_empty());
        assert_eq!(status.events().take(), events::PC_DISCONNECT);
    }

    #[test]
    fn test_peer_close_tears_down() {
        let (mut lp, _status, _tx) = new_loop(1);
        let client = TcpStream::connect(lp.local_addr().unwrap()).unwrap();
        spin_until(&mut lp, |lp| lp.sessions().len() == 1);

        drop(client);
        spin_until(&mut lp, |lp| lp.sessions().is_empty());
        assert_eq!(lp.stats().teardowns, 1);
    }

    #[test]
    fn test_link_down_then_up() {
        let (mut lp, status, tx) = new_loop(1);
        let _client = TcpStream::connect(lp.local_addr().unwrap()).unwrap();
        spin_until(&mut lp, |lp| lp.sessions().len() == 1);
        status.events().take();

        tx.send(LinkState::Down).unwrap();
        lp.iterate(Instant::now()).unwrap();
        assert!(lp.sessions().is_empty());
        assert_eq!(lp.link_state(), LinkState::Down);
        assert!(lp.local_addr().is_none());
        assert_eq!(
            status.events().take(),
            events::PC_DISCONNECT | events::NET_DISCONNECT
        );

        // Repeats are collapsed
        tx.send(LinkState::Down).unwrap();
        lp.iterate(Instant::now()).unwrap();
        assert_eq!(status.events().take(), 0);

        tx.send(LinkState::Up).unwrap();
        lp.iterate(Instant::now()).unwrap();
        assert_eq!(lp.link_state(), LinkState::Up);
        assert!(lp.local_addr().is_some());
        assert_eq!(status.events().take(), events::NET_CONNECT);

        let _again = TcpStream::connect(lp.local_addr().unwrap()).unwrap();
        spin_until(&mut lp, |lp| lp.sessions().len() == 1);
    }

    /// Timestamp of the first telemetry datagram at or after `sample`
    fn recv_timestamp_from(data: &StdUdpSocket, sample: u64) -> u64 {
        let mut datagram = [0u8; 512];
        loop {
            let (n, _) = data.recv_from(&mut datagram).unwrap();
            match try_decode_one(&datagram[..n]) {
                DecodeResult::Complete {
                    packet: Packet::PadTelemetry(pad),
                    ..
                } if pad.frame.timestamp >= sample => return pad.frame.timestamp,
                DecodeResult::Complete { .. } => continue,
                other => panic!("unexpected datagram {:?}", other),
            }
        }
    }

    #[test]
    fn test_one_sample_fans_out_to_every_due_session() {
        let samples = Arc::new(AtomicU64::new(0));
        let (mut lp, _status, _tx) = start_loop(
            &settings(2),
            Box::new(CountingInput(Arc::clone(&samples))),
        );
        let control = lp.local_addr().unwrap();

        let mut clients = Vec::new();
        let mut data = Vec::new();
        for _ in 0..2 {
            let socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
            socket
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let mut client = TcpStream::connect(control).unwrap();
            client
                .write_all(&client_handshake(socket.local_addr().unwrap().port()))
                .unwrap();
            clients.push(client);
            data.push(socket);
        }
        spin_until(&mut lp, |lp| {
            lp.sessions().len() == 2
                && lp
                    .sessions()
                    .iter()
                    .all(|s| s.state() == SessionState::Connected)
        });

        // Past every session's interval: both are due in the same iteration
        let before_samples = samples.load(Ordering::SeqCst);
        let before_sent = lp.stats().frames_sent;
        lp.iterate(Instant::now() + Duration::from_secs(1)).unwrap();
        let sampled = samples.load(Ordering::SeqCst) - before_samples;
        let sent = lp.stats().frames_sent - before_sent;
        assert_eq!(sampled, 1);
        assert_eq!(sent, sampled * 2);

        let expected = before_samples + 1;
        for socket in &data {
            assert_eq!(recv_timestamp_from(socket, expected), expected);
        }
    }

    #[test]
    fn test_failed_rebind_retried_after_interval() {
        let port = {
            let reserved = StdTcpListener::bind("127.0.0.1:0").unwrap();
            reserved.local_addr().unwrap().port()
        };
        let config = NetworkConfig {
            control_port: port,
            rebind_retry_ms: 1000,
            ..settings(1)
        };
        let (mut lp, status, tx) = start_loop(&config, Box::new(FixedInput));

        tx.send(LinkState::Down).unwrap();
        lp.iterate(Instant::now()).unwrap();
        assert!(lp.local_addr().is_none());

        // Someone else holds the control port when the link returns
        let blocker = StdTcpListener::bind(("127.0.0.1", port)).unwrap();
        let start = Instant::now();
        tx.send(LinkState::Up).unwrap();
        lp.iterate(start).unwrap();
        assert_eq!(lp.link_state(), LinkState::Up);
        assert!(status.snapshot().link_up);
        assert!(lp.local_addr().is_none());

        // Port is free again, but the retry interval has not passed
        drop(blocker);
        lp.iterate(start + Duration::from_millis(100)).unwrap();
        assert!(lp.local_addr().is_none());

        lp.iterate(start + Duration::from_millis(1500)).unwrap();
        assert_eq!(lp.local_addr().map(|a| a.port()), Some(port));
    }

    #[test]
    fn test_run_exits_on_flag() {
        let status = Arc::new(SharedStatus::new());
        let running = Arc::new(AtomicBool::new(true));
        let (_tx, rx) = unbounded();
        let mut lp = EventLoop::new(
            &settings(1),
            Box::new(FixedInput),
            status,
            Arc::clone(&running),
            rx,
        )
        .unwrap();
        let waker = lp.waker();

        let handle = std::thread::spawn(move || lp.run());
        std::thread::sleep(Duration::from_millis(20));
        running.store(false, Ordering::Relaxed);
        waker.wake().unwrap();
        assert!(handle.join().unwrap().is_ok());
    }
}
