//! Interfaces to the hardware collaborators.
//!
//! The net task consumes these synchronously. Implementations must be cheap:
//! [`InputProvider::sample`] runs inline on the event loop thread during a
//! telemetry push.

use crate::core::types::InputFrame;

/// Source of input frames (buttons, sticks, touch, motion)
pub trait InputProvider: Send {
    /// Return the latest cached input sample
    fn sample(&mut self) -> InputFrame;
}

/// Source of device power and radio status
pub trait StatusProvider: Send {
    /// Battery charge, 0-100
    fn battery_percent(&mut self) -> i32;

    /// True when a charger is plugged in
    fn charger_connected(&mut self) -> bool;

    /// Wi-Fi signal strength, 0-100
    fn wifi_signal_percent(&mut self) -> u32;
}

impl<T: InputProvider + ?Sized> InputProvider for Box<T> {
    fn sample(&mut self) -> InputFrame {
        (**self).sample()
    }
}

impl<T: StatusProvider + ?Sized> StatusProvider for Box<T> {
    fn battery_percent(&mut self) -> i32 {
        (**self).battery_percent()
    }

    fn charger_connected(&mut self) -> bool {
        (**self).charger_connected()
    }

    fn wifi_signal_percent(&mut self) -> u32 {
        (**self).wifi_signal_percent()
    }
}
