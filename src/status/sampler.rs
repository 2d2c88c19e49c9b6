//! Periodic battery, charger and Wi-Fi sampling
//!
//! Runs on its own thread. Each tick reads the [`StatusProvider`] and writes
//! into [`SharedStatus`], which raises an event bit for every field that
//! changed since the previous tick.

use crate::core::StatusProvider;
use crate::status::shared::SharedStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Sleep granularity while waiting for the next tick
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(50);

pub struct StatusSampler<P: StatusProvider> {
    provider: P,
    shared: Arc<SharedStatus>,
    running: Arc<AtomicBool>,
    interval: Duration,
}

impl<P: StatusProvider> StatusSampler<P> {
    pub fn new(
        provider: P,
        shared: Arc<SharedStatus>,
        running: Arc<AtomicBool>,
        interval: Duration,
    ) -> Self {
        Self {
            provider,
            shared,
            running,
            interval,
        }
    }

    /// Read every field once and publish it
    pub fn sample_once(&mut self) {
        let battery = self.provider.battery_percent();
        let charger = self.provider.charger_connected();
        let wifi = self.provider.wifi_signal_percent();
        log::trace!(
            "Status sample: battery={}% charger={} wifi={}%",
            battery,
            charger,
            wifi
        );

        self.shared.set_battery_percent(battery);
        self.shared.set_charger_connected(charger);
        self.shared.set_wifi_signal_percent(wifi);
    }

    /// Sample until the run flag clears
    pub fn run(&mut self) {
        log::info!("Status sampler started ({:?} interval)", self.interval);
        let mut ticks: u64 = 0;

        while self.running.load(Ordering::Relaxed) {
            let tick_start = Instant::now();
            self.sample_once();
            ticks += 1;

            while self.running.load(Ordering::Relaxed) {
                let elapsed = tick_start.elapsed();
                if elapsed >= self.interval {
                    break;
                }
                std::thread::sleep((self.interval - elapsed).min(SHUTDOWN_CHECK_INTERVAL));
            }
        }

        log::info!("Status sampler stopped after {} samples", ticks);
    }
}
