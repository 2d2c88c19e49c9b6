//! Cross-task status surface
//!
//! The net and status tasks write into [`SharedStatus`]; the UI task waits on
//! its [`EventFlags`] and reads a [`StatusSnapshot`] when woken.

pub mod events;
pub mod sampler;
pub mod shared;

pub use events::EventFlags;
pub use sampler::StatusSampler;
pub use shared::{SharedStatus, StatusSnapshot};
