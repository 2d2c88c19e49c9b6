//! Pending event bitmask shared between tasks

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Control client disconnected
pub const PC_DISCONNECT: u32 = 1 << 0;
/// Control client connected
pub const PC_CONNECT: u32 = 1 << 1;
/// Network link came up
pub const NET_CONNECT: u32 = 1 << 2;
/// Network link went down
pub const NET_DISCONNECT: u32 = 1 << 3;
/// Battery level changed
pub const BATTERY_LEVEL: u32 = 1 << 8;
/// Charger plugged or unplugged
pub const STATUS_CHARGER: u32 = 1 << 9;
/// Wi-Fi signal strength changed
pub const WIFI_SIGNAL: u32 = 1 << 10;

/// Any task raises bits, the UI task takes them.
///
/// Bits are held in an atomic so raising never blocks; the mutex and condvar
/// exist only so a waiter can sleep until something is raised.
#[derive(Debug, Default)]
pub struct EventFlags {
    bits: AtomicU32,
    lock: Mutex<()>,
    cond: Condvar,
}

impl EventFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `bits` and wake any waiter
    pub fn raise(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::AcqRel);
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Wake waiters without raising anything; they return 0
    pub fn wake_all(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Currently pending bits, without clearing them
    #[inline]
    pub fn pending(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    /// Clear and return all pending bits
    #[inline]
    pub fn take(&self) -> u32 {
        self.bits.swap(0, Ordering::AcqRel)
    }

    /// Wait until at least one bit is pending or `timeout` elapses, then take
    /// everything pending. Returns 0 on timeout.
    pub fn wait(&self, timeout: Duration) -> u32 {
        let mut guard = self.lock.lock();
        if self.pending() == 0 {
            // A raise between the check and the wait cannot be missed: raise
            // takes the lock before notifying.
            let _ = self.cond.wait_for(&mut guard, timeout);
        }
        drop(guard);
        self.take()
    }
}

/// Human-readable names of the bits in `bits`
pub fn describe(bits: u32) -> Vec<&'static str> {
    const NAMES: [(u32, &str); 7] = [
        (PC_DISCONNECT, "pc-disconnect"),
        (PC_CONNECT, "pc-connect"),
        (NET_CONNECT, "net-connect"),
        (NET_DISCONNECT, "net-disconnect"),
        (BATTERY_LEVEL, "battery"),
        (STATUS_CHARGER, "charger"),
        (WIFI_SIGNAL, "wifi"),
    ];
    NAMES
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}
