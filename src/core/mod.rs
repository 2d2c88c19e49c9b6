//! Core types and collaborator interfaces

pub mod provider;
pub mod types;

pub use provider::{InputProvider, StatusProvider};
pub use types::{Buttons, InputFrame, MotionState, TouchReport, Vector3};
