//! Simulated handheld for running without hardware
//!
//! | Input | Simulation |
//! |-------|------------|
//! | Sticks | Slow circles, opposite phase left/right, with jitter |
//! | Buttons | One flag at a time, cycling every second |
//! | Front touch | One finger sweeping the panel, lifted half the time |
//! | Motion | Level and at rest: gravity on Z, gyro noise only |
//! | Battery | Slow drain, charger never connected |
//!
//! Enable with the `mock` feature (on by default) and `[input] source = "mock"`.

mod noise;

use crate::core::{
    Buttons, InputFrame, InputProvider, MotionState, StatusProvider, TouchReport, Vector3,
};
use noise::NoiseGenerator;
use std::f32::consts::TAU;
use std::time::Instant;

/// Stick circle period in seconds
const STICK_PERIOD_SECS: f32 = 4.0;
/// Stick deflection radius in raw units
const STICK_RADIUS: f32 = 20_000.0;
const STICK_JITTER: f32 = 150.0;

/// Front panel resolution
const FRONT_WIDTH: f32 = 1920.0;
const FRONT_HEIGHT: f32 = 1088.0;

const GYRO_NOISE: f32 = 0.01;
const ACCEL_NOISE: f32 = 0.005;

/// Button flags in the order the simulation cycles through them
const BUTTON_CYCLE: [Buttons; 13] = [
    Buttons::SELECT,
    Buttons::START,
    Buttons::UP,
    Buttons::RIGHT,
    Buttons::DOWN,
    Buttons::LEFT,
    Buttons::LTRIGGER,
    Buttons::RTRIGGER,
    Buttons::TRIANGLE,
    Buttons::CIRCLE,
    Buttons::CROSS,
    Buttons::SQUARE,
    Buttons::PS,
];

/// Simulated input device
pub struct MockInput {
    noise: NoiseGenerator,
    started: Instant,
}

impl MockInput {
    /// Seed 0 picks a random seed each run
    pub fn new(seed: u64) -> Self {
        log::info!("Mock input device (seed {})", seed);
        Self {
            noise: NoiseGenerator::new(seed),
            started: Instant::now(),
        }
    }

    /// Frame at `elapsed_secs` after start
    fn frame_at(&mut self, elapsed_secs: f32, timestamp: u64) -> InputFrame {
        let phase = (elapsed_secs / STICK_PERIOD_SECS).fract() * TAU;
        let (sin, cos) = phase.sin_cos();

        let buttons = BUTTON_CYCLE[(elapsed_secs as usize) % BUTTON_CYCLE.len()];

        // Finger down during the first half of every second
        let touch_front = if elapsed_secs.fract() < 0.5 {
            let sweep = elapsed_secs.fract() * 2.0;
            vec![TouchReport {
                force: 128,
                id: 0,
                x: (sweep * FRONT_WIDTH) as i16,
                y: (FRONT_HEIGHT / 2.0) as i16,
            }]
        } else {
            Vec::new()
        };

        InputFrame {
            buttons,
            lx: self.stick(cos),
            ly: self.stick(sin),
            rx: self.stick(-cos),
            ry: self.stick(-sin),
            touch_front,
            touch_back: Vec::new(),
            motion: MotionState {
                gyro: Vector3::new(
                    self.noise.gaussian(GYRO_NOISE),
                    self.noise.gaussian(GYRO_NOISE),
                    self.noise.gaussian(GYRO_NOISE),
                ),
                accel: Vector3::new(
                    self.noise.gaussian(ACCEL_NOISE),
                    self.noise.gaussian(ACCEL_NOISE),
                    1.0 + self.noise.gaussian(ACCEL_NOISE),
                ),
            },
            timestamp,
        }
    }

    fn stick(&mut self, unit: f32) -> i16 {
        let raw = unit * STICK_RADIUS + self.noise.gaussian(STICK_JITTER);
        raw.clamp(i16::MIN as f32, i16::MAX as f32) as i16
    }
}

impl InputProvider for MockInput {
    fn sample(&mut self) -> InputFrame {
        let elapsed = self.started.elapsed();
        self.frame_at(elapsed.as_secs_f32(), elapsed.as_micros() as u64)
    }
}

/// Simulated battery and radio
pub struct MockStatus {
    noise: NoiseGenerator,
    battery: f32,
}

/// Battery percent lost per sample
const BATTERY_DRAIN_PER_SAMPLE: f32 = 0.02;

impl MockStatus {
    pub fn new(seed: u64) -> Self {
        Self {
            noise: NoiseGenerator::new(seed),
            battery: 100.0,
        }
    }
}

impl StatusProvider for MockStatus {
    fn battery_percent(&mut self) -> i32 {
        self.battery = (self.battery - BATTERY_DRAIN_PER_SAMPLE).max(0.0);
        self.battery.ceil() as i32
    }

    fn charger_connected(&mut self) -> bool {
        false
    }

    fn wifi_signal_percent(&mut self) -> u32 {
        // Occasional one-step fluctuation around a fair signal
        if self.noise.chance(0.1) {
            69
        } else {
            70
        }
    }
}
