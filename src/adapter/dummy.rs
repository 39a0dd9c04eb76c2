//! Adapter exposing a single [`DummyCamera`].

use super::{Adapter, AdapterId, CameraInfo};
use crate::capture::{Camera, CameraError, DummyCamera};

/// Adapter with one always-present software camera.
#[derive(Debug, Default)]
pub struct DummyAdapter;

impl DummyAdapter {
    /// Version string reported by this adapter.
    pub const VERSION: &'static str = "libdummy v0.0.0";

    const CAMERA_ID: &'static str = "SN-DUMMY-SN";

    /// Creates the adapter.
    pub fn new() -> Self {
        Self
    }
}

impl Adapter for DummyAdapter {
    fn id(&self) -> AdapterId {
        AdapterId::Dummy
    }

    fn version(&self) -> String {
        Self::VERSION.to_owned()
    }

    fn enumerate(&mut self) -> Result<Vec<CameraInfo>, CameraError> {
        Ok(vec![CameraInfo {
            id: Self::CAMERA_ID.to_owned(),
            name: "Dummy Camera".to_owned(),
            description: "Not real, just a dummy".to_owned(),
        }])
    }

    fn open(&mut self, id: &str) -> Result<Box<dyn Camera>, CameraError> {
        if id != Self::CAMERA_ID {
            return Err(CameraError::DeviceNotFound(id.to_owned()));
        }
        Ok(Box::new(DummyCamera::new()))
    }
}
