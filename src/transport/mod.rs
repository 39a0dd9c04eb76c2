//! Register and frame transport seams.
//!
//! Sensor bindings never talk to a vendor SDK directly. Register-level
//! sensors go through [`RegisterAccess`] for field-addressed registers and
//! coarse modes, and through [`FrameTransport`] for image data. Cameras
//! with a named-feature interface go through [`FeatureNodes`]. Real SDK
//! wrappers implement these traits outside this crate; [`SimulatedSensor`]
//! and [`SimulatedNodeMap`] implement them in memory.

mod nodes;
mod simulated;
mod writer;

pub use nodes::{
    FeatureNodes, NodeBus, NodeDeviceInfo, RetrievedImage, SimulatedNodeBus, SimulatedNodeConfig,
    SimulatedNodeMap,
};
pub use simulated::{SimulatedBus, SimulatedSensor, SimulatedSensorConfig};
pub use writer::{RegisterError, RegisterWriter, RetryPolicy, WriteRequest, WriteStats};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Device-reported side effect of a register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SideEffect {
    /// No side effect.
    #[default]
    None,
    /// The write paused the image stream.
    Pause,
    /// The write resumed the image stream.
    Resume,
    /// The write changed the image buffer layout.
    Reallocate,
    /// Any other vendor-specific effect code.
    Other(u32),
}

impl std::fmt::Display for SideEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Reallocate => write!(f, "reallocate"),
            Self::Other(code) => write!(f, "effect {code:#x}"),
        }
    }
}

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The frame is not complete yet; the grab should be retried.
    #[error("not enough data")]
    NotEnoughData,
    #[error("unknown register '{register}' '{field}'")]
    UnknownRegister { register: String, field: String },
    #[error("unknown mode '{0}'")]
    UnknownMode(String),
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("transport failure: {0}")]
    Failed(String),
}

impl TransportError {
    /// True for conditions that resolve by retrying the same call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotEnoughData)
    }
}

/// Field-addressed register access.
///
/// An empty `field` addresses the whole register.
pub trait RegisterAccess {
    /// Writes a register field and reports the device side effect.
    fn set_register(
        &mut self,
        register: &str,
        field: &str,
        value: u32,
    ) -> Result<SideEffect, TransportError>;

    /// Reads a register field from the device (never cached).
    fn get_register(&mut self, register: &str, field: &str) -> Result<u32, TransportError>;

    /// Sets a coarse sensor-wide mode.
    fn set_mode(&mut self, name: &str, value: u32) -> Result<(), TransportError>;

    /// Reads a coarse sensor-wide mode.
    fn get_mode(&mut self, name: &str) -> Result<u32, TransportError>;
}

/// Image data transport.
pub trait FrameTransport {
    /// Selects the image format by vendor name (e.g. `"BAYER-8"`).
    fn set_image_format(&mut self, format: &str) -> Result<(), TransportError>;

    /// Active image size reported by the device.
    fn image_size(&mut self) -> Result<(u32, u32), TransportError>;

    /// Enables or disables streaming.
    fn set_streaming(&mut self, enabled: bool) -> Result<(), TransportError>;

    /// Reads one frame into `buffer`, returning the number of bytes written.
    fn grab_into(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError>;
}

/// A full sensor transport: registers plus image data.
pub trait SensorTransport: RegisterAccess + FrameTransport {}

impl<T: RegisterAccess + FrameTransport> SensorTransport for T {}

/// Identity of a device found on a [`SensorBus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Sensor part number.
    pub part_number: String,
    /// Unique serial (fuse id).
    pub serial: String,
}

/// Discovery and connection for register-level sensors.
pub trait SensorBus {
    /// Transport produced for a connected sensor.
    type Transport: SensorTransport;

    /// Version string of the underlying SDK.
    fn version(&self) -> String;

    /// Lists the attached sensors in bus order.
    fn probe(&mut self) -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Connects to the sensor at `index` in probe order.
    fn connect(&mut self, index: usize) -> Result<Self::Transport, TransportError>;
}
