//! Status shared between the net, status and UI tasks

use crate::core::InputFrame;
use crate::status::events::{self, EventFlags};
use parking_lot::Mutex;
use std::net::IpAddr;

/// Copy of the shared fields taken under the lock
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub battery_percent: i32,
    pub charger_connected: bool,
    pub wifi_signal_percent: u32,
    /// Connected control client, if any
    pub client_ip: Option<IpAddr>,
    pub link_up: bool,
    /// Most recent frame pushed to clients
    pub last_frame: Option<InputFrame>,
}

/// Shared status plus its event bitmask.
///
/// The `set_*` methods raise their event bit only when the stored value
/// actually changes.
#[derive(Debug, Default)]
pub struct SharedStatus {
    inner: Mutex<StatusSnapshot>,
    events: EventFlags,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with values read at startup, raising nothing
    pub fn with_initial(battery_percent: i32, charger_connected: bool) -> Self {
        Self {
            inner: Mutex::new(StatusSnapshot {
                battery_percent,
                charger_connected,
                ..StatusSnapshot::default()
            }),
            events: EventFlags::new(),
        }
    }

    #[inline]
    pub fn events(&self) -> &EventFlags {
        &self.events
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.lock().clone()
    }

    #[inline]
    pub fn battery_percent(&self) -> i32 {
        self.inner.lock().battery_percent
    }

    /// A control client was admitted. Always raises `PC_CONNECT`.
    pub fn client_connected(&self, ip: IpAddr) {
        self.inner.lock().client_ip = Some(ip);
        self.events.raise(events::PC_CONNECT);
    }

    /// A control client was torn down. Always raises `PC_DISCONNECT`; the
    /// shown address is cleared only if it belongs to that client.
    pub fn client_disconnected(&self, ip: IpAddr) {
        {
            let mut inner = self.inner.lock();
            if inner.client_ip == Some(ip) {
                inner.client_ip = None;
            }
        }
        self.events.raise(events::PC_DISCONNECT);
    }

    pub fn set_link_up(&self, up: bool) {
        let bit = if up {
            events::NET_CONNECT
        } else {
            events::NET_DISCONNECT
        };
        self.update(bit, |s| std::mem::replace(&mut s.link_up, up) != up);
    }

    pub fn set_battery_percent(&self, percent: i32) {
        self.update(events::BATTERY_LEVEL, |s| {
            std::mem::replace(&mut s.battery_percent, percent) != percent
        });
    }

    pub fn set_charger_connected(&self, connected: bool) {
        self.update(events::STATUS_CHARGER, |s| {
            std::mem::replace(&mut s.charger_connected, connected) != connected
        });
    }

    pub fn set_wifi_signal_percent(&self, percent: u32) {
        self.update(events::WIFI_SIGNAL, |s| {
            std::mem::replace(&mut s.wifi_signal_percent, percent) != percent
        });
    }

    /// Store the latest pushed frame (no event)
    pub fn set_last_frame(&self, frame: &InputFrame) {
        self.inner.lock().last_frame = Some(frame.clone());
    }

    fn update(&self, bit: u32, apply: impl FnOnce(&mut StatusSnapshot) -> bool) {
        let changed = {
            let mut inner = self.inner.lock();
            apply(&mut inner)
        };
        if changed {
            self.events.raise(bit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_client_connect_disconnect_events() {
        let status = SharedStatus::new();
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
        let other = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 21));

        status.client_connected(ip);
        assert_eq!(status.events().take(), events::PC_CONNECT);
        assert_eq!(status.snapshot().client_ip, Some(ip));

        // Someone else leaving keeps the shown client
        status.client_disconnected(other);
        assert_eq!(status.events().take(), events::PC_DISCONNECT);
        assert_eq!(status.snapshot().client_ip, Some(ip));

        status.client_disconnected(ip);
        assert_eq!(status.events().take(), events::PC_DISCONNECT);
        assert_eq!(status.snapshot().client_ip, None);
    }

    #[test]
    fn test_unchanged_values_raise_nothing() {
        let status = SharedStatus::with_initial(80, true);
        status.set_battery_percent(80);
        status.set_charger_connected(true);
        assert_eq!(status.events().pending(), 0);

        status.set_battery_percent(79);
        status.set_wifi_signal_percent(55);
        assert_eq!(
            status.events().take(),
            events::BATTERY_LEVEL | events::WIFI_SIGNAL
        );

        let snap = status.snapshot();
        assert_eq!(snap.battery_percent, 79);
        assert_eq!(snap.wifi_signal_percent, 55);
        assert!(snap.charger_connected);
    }

    #[test]
    fn test_link_transitions() {
        let status = SharedStatus::new();
        status.set_link_up(true);
        status.set_link_up(true);
        assert_eq!(status.events().take(), events::NET_CONNECT);
        status.set_link_up(false);
        assert_eq!(status.events().take(), events::NET_DISCONNECT);
    }
}
