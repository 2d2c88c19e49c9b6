//! Network link monitoring
//!
//! A [`LinkWatcher`] thread probes connectivity and sends [`LinkState`]s over
//! a channel, waking the event loop's poll each time. The event loop owns the
//! [`NetworkLinkMonitor`] end and asks it for transitions once per iteration,
//! whatever woke the wait.

use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use mio::Waker;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sleep granularity while waiting for the next probe
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

impl LinkState {
    #[inline]
    pub fn from_up(up: bool) -> Self {
        if up { LinkState::Up } else { LinkState::Down }
    }

    #[inline]
    pub fn is_up(self) -> bool {
        self == LinkState::Up
    }
}

/// Connectivity check run by the watcher thread
pub trait LinkProbe: Send {
    fn is_up(&mut self) -> bool;
}

/// Up when the OS has a route to `target`.
///
/// Connecting a UDP socket only consults the routing table; nothing is sent.
pub struct RouteProbe {
    target: SocketAddr,
}

impl RouteProbe {
    pub fn new(target: SocketAddr) -> Self {
        Self { target }
    }
}

impl LinkProbe for RouteProbe {
    fn is_up(&mut self) -> bool {
        let local: SocketAddr = if self.target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        match UdpSocket::bind(local).and_then(|s| s.connect(self.target)) {
            Ok(()) => true,
            Err(e) => {
                log::trace!("No route to {}: {}", self.target, e);
                false
            }
        }
    }
}

/// Event loop side of the link channel
pub struct NetworkLinkMonitor {
    rx: Receiver<LinkState>,
    current: LinkState,
}

impl NetworkLinkMonitor {
    /// `initial` is the state the event loop starts in (sockets bound = Up)
    pub fn new(rx: Receiver<LinkState>, initial: LinkState) -> Self {
        Self {
            rx,
            current: initial,
        }
    }

    #[inline]
    pub fn current(&self) -> LinkState {
        self.current
    }

    /// Next real transition, skipping notifications that repeat the current
    /// state. Call until `None` to process everything queued.
    pub fn next_transition(&mut self) -> Option<LinkState> {
        loop {
            match self.rx.try_recv() {
                Ok(state) if state == self.current => continue,
                Ok(state) => {
                    self.current = state;
                    return Some(state);
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return None,
            }
        }
    }
}

/// Thread that probes the link and reports changes
pub struct LinkWatcher<P: LinkProbe> {
    probe: P,
    interval: Duration,
    tx: Sender<LinkState>,
    waker: Arc<Waker>,
    running: Arc<AtomicBool>,
}

impl<P: LinkProbe + 'static> LinkWatcher<P> {
    pub fn new(
        probe: P,
        interval: Duration,
        tx: Sender<LinkState>,
        waker: Arc<Waker>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            probe,
            interval,
            tx,
            waker,
            running,
        }
    }

    pub fn spawn(self) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("link-watcher".to_string())
            .spawn(move || {
                let mut watcher = self;
                watcher.run();
            })
            .map_err(|source| Error::Spawn {
                name: "link-watcher",
                source,
            })
    }

    /// Probe until the run flag clears. The first probe is always reported.
    pub fn run(&mut self) {
        log::info!("Link watcher started ({:?} interval)", self.interval);
        let mut last: Option<LinkState> = None;

        while self.running.load(Ordering::Relaxed) {
            let tick_start = Instant::now();
            let state = LinkState::from_up(self.probe.is_up());

            if last != Some(state) {
                log::debug!("Link probe: {:?}", state);
                if !notify(&self.tx, &self.waker, state) {
                    break;
                }
                last = Some(state);
            }

            while self.running.load(Ordering::Relaxed) {
                let elapsed = tick_start.elapsed();
                if elapsed >= self.interval {
                    break;
                }
                thread::sleep((self.interval - elapsed).min(SHUTDOWN_CHECK_INTERVAL));
            }
        }

        log::info!("Link watcher stopped");
    }
}

/// Send `state` and wake the poll. False once the receiver is gone.
pub fn notify(tx: &Sender<LinkState>, waker: &Waker, state: LinkState) -> bool {
    if tx.send(state).is_err() {
        return false;
    }
    if let Err(e) = waker.wake() {
        log::warn!("Failed to wake event loop: {}", e);
    }
    true
}
