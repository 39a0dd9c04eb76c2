//! Hardware-agnostic camera control.
//!
//! Enumerate, configure and stream frames from image sensors with very
//! different low-level command sets, without depending on vendor APIs.
//!
//! # Architecture
//!
//! ```text
//! adapter (registry, bindings)
//!     ↓               ↓
//! capture (Camera, Frame, trigger)   timing (pixel-clock arithmetic)
//!     ↓
//! transport (registers, feature nodes, frames)
//! ```
//!
//! The [`timing`] module converts frame rates and exposures into pixel
//! clock counts and searches the blanking registers for the closest frame
//! period. Register-level bindings call it from their frame-rate and
//! exposure setters; it never talks to hardware itself.
//!
//! # Example
//!
//! ```no_run
//! use camio::adapter::{AdapterId, AdapterRegistry, AptinaAdapter};
//! use camio::capture::{SensorConfig, TriggerMode};
//! use camio::transport::{RetryPolicy, SimulatedBus};
//!
//! let mut registry = AdapterRegistry::new();
//! registry.register(Box::new(AptinaAdapter::new(
//!     SimulatedBus::single(),
//!     SensorConfig::default(),
//!     RetryPolicy::default(),
//! )));
//!
//! let handles = registry.enumerate().unwrap();
//! let mut camera = registry.open_handle(&handles[0]).unwrap();
//!
//! camera.set_trigger(TriggerMode::Timer).unwrap();
//! camera.set_exposure(5.0).unwrap();
//! camera.set_frame_rate(20.0).unwrap();
//!
//! camera.start().unwrap();
//! let frame = camera.grab().unwrap();
//! println!("{} at {:.2} Hz", frame.size(), camera.frame_rate().unwrap());
//! camera.stop().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod adapter;
pub mod capture;
pub mod metrics;
pub mod timing;
pub mod transport;

// Re-export commonly used types at crate root
pub use adapter::{Adapter, AdapterId, AdapterRegistry, CameraHandle, CameraInfo};
pub use capture::{Camera, CameraError, FileConfig, Frame, FrameSize, TriggerMode};
pub use timing::{BlankingBounds, BlankingSolution, SensorGeometry, TimingError, TimingModel};
pub use transport::{RegisterAccess, RetryPolicy, TransportError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
