//! Camera discovery and opening.
//!
//! Each vendor SDK is wrapped by an [`Adapter`], which lists the attached
//! cameras and opens one by id. An [`AdapterRegistry`] owns the adapters a
//! program wants to use; there is no process-wide state.

mod aptina;
mod dummy;
mod pylon;

pub use aptina::{AptinaAdapter, AptinaCamera};
pub use dummy::DummyAdapter;
pub use pylon::{PylonAdapter, PylonCamera};

use crate::capture::{Camera, CameraError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Identifies an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterId {
    /// Software-only test camera.
    Dummy,
    /// Register-level sensors.
    Aptina,
    /// Feature-node cameras.
    Pylon,
}

impl std::fmt::Display for AdapterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy => write!(f, "dummy"),
            Self::Aptina => write!(f, "aptina"),
            Self::Pylon => write!(f, "pylon"),
        }
    }
}

impl FromStr for AdapterId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dummy" => Ok(Self::Dummy),
            "aptina" => Ok(Self::Aptina),
            "pylon" => Ok(Self::Pylon),
            other => Err(format!("unknown adapter '{other}'")),
        }
    }
}

/// Description of an attached camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Id used to open the camera (usually a serial number).
    pub id: String,
    /// Model or part name.
    pub name: String,
    /// Free-form description.
    pub description: String,
}

/// A camera together with the adapter that found it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraHandle {
    /// Owning adapter.
    pub adapter: AdapterId,
    /// Camera description.
    pub info: CameraInfo,
}

/// Vendor SDK wrapper.
pub trait Adapter: Send {
    /// Which adapter this is.
    fn id(&self) -> AdapterId;

    /// Version string of the wrapped SDK.
    fn version(&self) -> String;

    /// Lists the attached cameras.
    fn enumerate(&mut self) -> Result<Vec<CameraInfo>, CameraError>;

    /// Opens the camera with the given id.
    fn open(&mut self, id: &str) -> Result<Box<dyn Camera>, CameraError>;
}

/// The set of adapters a program uses.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<AdapterId, Box<dyn Adapter>>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an adapter, replacing any previous one with the same id.
    pub fn register(&mut self, adapter: Box<dyn Adapter>) {
        let id = adapter.id();
        tracing::debug!(adapter = %id, version = %adapter.version(), "Registered adapter");
        self.adapters.insert(id, adapter);
    }

    /// Ids of the registered adapters, in order.
    pub fn adapters(&self) -> impl Iterator<Item = AdapterId> + '_ {
        self.adapters.keys().copied()
    }

    /// Library version followed by each adapter's SDK version.
    pub fn versions(&self) -> Vec<String> {
        std::iter::once(format!("libcamio v{}", crate::VERSION))
            .chain(self.adapters.values().map(|a| a.version()))
            .collect()
    }

    /// Every camera of every adapter.
    pub fn enumerate(&mut self) -> Result<Vec<CameraHandle>, CameraError> {
        let mut handles = Vec::new();
        for (&adapter, backend) in self.adapters.iter_mut() {
            for info in backend.enumerate()? {
                handles.push(CameraHandle { adapter, info });
            }
        }
        Ok(handles)
    }

    /// Opens camera `id` of `adapter`.
    pub fn open(&mut self, adapter: AdapterId, id: &str) -> Result<Box<dyn Camera>, CameraError> {
        let backend = self
            .adapters
            .get_mut(&adapter)
            .ok_or_else(|| CameraError::DeviceNotFound(format!("adapter {adapter} not registered")))?;
        let camera = backend.open(id)?;
        tracing::info!(%adapter, id, "Opened camera");
        Ok(camera)
    }

    /// Opens the camera described by `handle`.
    pub fn open_handle(&mut self, handle: &CameraHandle) -> Result<Box<dyn Camera>, CameraError> {
        self.open(handle.adapter, &handle.info.id)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.adapters.keys()).finish()
    }
}
