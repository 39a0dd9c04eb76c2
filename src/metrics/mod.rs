//! Prometheus metrics exporter for camera monitoring.
//!
//! Camera counters and current settings are collected into a Prometheus
//! registry. With the `metrics` feature an HTTP endpoint serves them on
//! `/metrics`, next to a JSON `/health` summary of the attached camera.
//!
//! # Metrics Exposed
//!
//! ## Acquisition
//! - `camio_frames_grabbed_total` - Frames returned by grab
//! - `camio_grab_failures_total` - Grabs that failed
//! - `camio_transient_retries_total` - Incomplete frames retried inside grab
//!
//! ## Registers
//! - `camio_register_writes_total` - Register writes issued
//! - `camio_register_retries_total` - Writes repeated after a read-back mismatch
//! - `camio_register_failures_total` - Writes never applied
//!
//! ## Settings
//! - `camio_frame_rate_hz` - Achievable frame rate (0 outside timer trigger)
//! - `camio_exposure_ms` - Exposure in milliseconds
//! - `camio_streaming` - Acquisition running (1) or stopped (0)
//! - `camio_trigger_mode` - 0=software, 1=timer, 2=external
//!
//! # Example
//!
//! ```no_run
//! use camio::capture::{Camera, DummyCamera};
//! use camio::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! let mut camera = DummyCamera::new();
//! camera.start().unwrap();
//! camera.grab().unwrap();
//!
//! let snapshot = MetricsSnapshot::from_camera(&mut camera).unwrap();
//! registry.update(&snapshot);
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{
    CameraStatus, HealthReport, MetricsServer, MetricsServerConfig, MetricsState, ServerError,
};
