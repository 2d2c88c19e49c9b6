//! padstream - handheld input telemetry streamer
//!
//! Streams buttons, sticks, touch and motion samples to a companion PC.
//! A TCP control channel carries the handshake, polling configuration and
//! heartbeats; telemetry goes out as UDP datagrams to the port the client
//! announced.
//!
//! ## Features
//!
//! - `mock`: simulated input device for running without hardware (default)

pub mod config;
pub mod core;
pub mod devices;
pub mod error;
pub mod net;
pub mod protocol;
pub mod session;
pub mod status;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
