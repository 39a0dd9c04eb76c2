//! Camera interface, frames and configuration.
//!
//! This module provides the capability interface every sensor binding
//! implements, the trigger mode state machine that gates timing
//! operations, and the frame buffer handed to callers by `grab`.

mod camera;
mod config;
mod frame;
mod trigger;

pub use camera::{Camera, CameraError, CameraStats, DummyCamera};
pub use config::{
    CameraConfig, ConfigError, FileConfig, MetricsConfig, RegisterConfig, SensorConfig,
};
pub use frame::{Frame, FrameSize};
pub use trigger::{Transition, TriggerMode, TriggerState};
