//! Feature-node camera binding.
//!
//! These cameras take frame rate and exposure directly as float features,
//! so no pixel-clock arithmetic is needed. All three trigger modes are
//! supported; the exposure-active signal is routed to output lines so
//! other cameras can be triggered from this one.

use super::{Adapter, AdapterId, CameraInfo};
use crate::capture::{
    Camera, CameraError, CameraStats, Frame, FrameSize, TriggerMode, TriggerState,
};
use crate::timing::TimingError;
use crate::transport::{FeatureNodes, NodeBus, TransportError};
use std::time::Duration;

const FRAME_RATE: &str = "AcquisitionFrameRate";
const EXPOSURE_TIME: &str = "ExposureTime";
const GRAB_TIMEOUT: Duration = Duration::from_millis(50);

/// Camera driven through feature nodes.
pub struct PylonCamera<N> {
    nodes: N,
    trigger: TriggerState,
    size: FrameSize,
    sequence: u64,
    grab_failures: u64,
}

impl<N: FeatureNodes> PylonCamera<N> {
    /// Applies the default configuration: manual exposure, 8-bit mono,
    /// continuous global-shutter acquisition, exposure signal on line 4 and
    /// timer trigger.
    pub fn open(mut nodes: N) -> Result<Self, CameraError> {
        nodes.set_enum("ExposureAuto", "Off")?;
        nodes.set_enum("PixelFormat", "Mono8")?;
        nodes.set_enum("AcquisitionMode", "Continuous")?;
        nodes.set_enum("ShutterMode", "Global")?;

        route_exposure_active(&mut nodes, "Line4")?;
        program_trigger(&mut nodes, TriggerMode::Timer)?;

        let width = dimension(nodes.get_int("Width")?)?;
        let height = dimension(nodes.get_int("Height")?)?;
        tracing::info!(width, height, "Feature-node camera initialized");

        Ok(Self {
            nodes,
            trigger: TriggerState::new(TriggerMode::Timer),
            size: FrameSize::new(width, height),
            sequence: 0,
            grab_failures: 0,
        })
    }

    /// The underlying node map.
    pub fn nodes(&self) -> &N {
        &self.nodes
    }

    /// Mutable access to the underlying node map.
    pub fn nodes_mut(&mut self) -> &mut N {
        &mut self.nodes
    }

    fn retrieve(&mut self) -> Result<Frame, TransportError> {
        if self.trigger.current() == TriggerMode::Software {
            self.nodes.wait_trigger_ready(GRAB_TIMEOUT)?;
            self.nodes.execute("TriggerSoftware")?;
        }
        let image = self.nodes.retrieve(GRAB_TIMEOUT)?;
        Ok(Frame::new(
            image.data,
            image.width,
            image.height,
            self.sequence + 1,
        ))
    }
}

fn dimension(value: i64) -> Result<u32, CameraError> {
    u32::try_from(value)
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| CameraError::OpenFailed(format!("invalid image dimension {value}")))
}

/// Outputs the exposure-active signal on `line`.
fn route_exposure_active<N: FeatureNodes>(nodes: &mut N, line: &str) -> Result<(), TransportError> {
    nodes.set_enum("LineSelector", line)?;
    nodes.set_enum("LineMode", "Output")?;
    nodes.set_enum("LineSource", "ExposureActive")
}

fn program_trigger<N: FeatureNodes>(nodes: &mut N, mode: TriggerMode) -> Result<(), CameraError> {
    match mode {
        TriggerMode::Software => {
            route_exposure_active(nodes, "Line3")?;
            nodes.set_enum("TriggerSelector", "FrameStart")?;
            nodes.set_enum("TriggerMode", "On")?;
            nodes.set_enum("TriggerSource", "Software")?;
        }
        TriggerMode::Timer => {
            route_exposure_active(nodes, "Line3")?;
            nodes.set_enum("TriggerSelector", "FrameStart")?;
            nodes.set_enum("TriggerMode", "Off")?;
            nodes.set_bool("AcquisitionFrameRateEnable", true)?;
        }
        TriggerMode::External => {
            // Falling edge on line 3, driven by another camera's output.
            nodes.set_enum("TriggerSelector", "FrameStart")?;
            nodes.set_enum("TriggerMode", "On")?;
            nodes.set_enum("TriggerSource", "Line3")?;
            nodes.set_enum("TriggerActivation", "FallingEdge")?;
        }
    }
    Ok(())
}

impl<N: FeatureNodes + Send> Camera for PylonCamera<N> {
    fn trigger(&self) -> TriggerMode {
        self.trigger.current()
    }

    fn set_trigger(&mut self, mode: TriggerMode) -> Result<(), CameraError> {
        let nodes = &mut self.nodes;
        self.trigger
            .transition(mode, |target| program_trigger(nodes, target))?;
        Ok(())
    }

    fn frame_rate(&mut self) -> Result<f64, CameraError> {
        if self.trigger.current() != TriggerMode::Timer {
            return Ok(0.0);
        }
        Ok(self.nodes.get_float(FRAME_RATE)?)
    }

    fn set_frame_rate(&mut self, hz: f64) -> Result<(), CameraError> {
        self.trigger.require(TriggerMode::Timer)?;
        if !hz.is_finite() || hz <= 0.0 {
            return Err(TimingError::InvalidFrameRate(hz).into());
        }
        self.nodes.set_float(FRAME_RATE, hz)?;
        Ok(())
    }

    fn exposure(&mut self) -> Result<f64, CameraError> {
        Ok(self.nodes.get_float(EXPOSURE_TIME)? / 1000.0)
    }

    fn set_exposure(&mut self, ms: f64) -> Result<(), CameraError> {
        if !ms.is_finite() || ms < 0.0 {
            return Err(TimingError::InvalidExposure(ms).into());
        }
        self.nodes.set_float(EXPOSURE_TIME, ms * 1000.0)?;
        Ok(())
    }

    fn frame_size(&self) -> FrameSize {
        self.size
    }

    fn start(&mut self) -> Result<(), CameraError> {
        if !self.nodes.is_grabbing() {
            self.nodes.start_grabbing()?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        if self.nodes.is_grabbing() {
            self.nodes.stop_grabbing()?;
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.nodes.is_grabbing()
    }

    fn grab(&mut self) -> Result<Frame, CameraError> {
        match self.retrieve() {
            Ok(frame) => {
                self.sequence += 1;
                Ok(frame)
            }
            Err(err) => {
                self.grab_failures += 1;
                tracing::warn!(error = %err, trigger = %self.trigger.current(), "Grab failed");
                Err(err.into())
            }
        }
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_grabbed: self.sequence,
            grab_failures: self.grab_failures,
            ..CameraStats::default()
        }
    }
}

/// Adapter for cameras found on a [`NodeBus`].
pub struct PylonAdapter<B> {
    bus: B,
}

impl<B: NodeBus> PylonAdapter<B> {
    /// Creates an adapter over `bus`.
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> Adapter for PylonAdapter<B>
where
    B: NodeBus + Send,
    B::Nodes: Send + 'static,
{
    fn id(&self) -> AdapterId {
        AdapterId::Pylon
    }

    fn version(&self) -> String {
        self.bus.version()
    }

    fn enumerate(&mut self) -> Result<Vec<CameraInfo>, CameraError> {
        Ok(self
            .bus
            .enumerate()?
            .into_iter()
            .map(|device| CameraInfo {
                description: format!("{} via {}", device.user_name, device.device_class),
                id: device.serial,
                name: device.model,
            })
            .collect())
    }

    fn open(&mut self, id: &str) -> Result<Box<dyn Camera>, CameraError> {
        if !self.bus.enumerate()?.iter().any(|device| device.serial == id) {
            return Err(CameraError::DeviceNotFound(id.to_owned()));
        }
        let nodes = self.bus.connect(id)?;
        Ok(Box::new(PylonCamera::open(nodes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SimulatedNodeBus, SimulatedNodeConfig, SimulatedNodeMap};

    fn open() -> PylonCamera<SimulatedNodeMap> {
        PylonCamera::open(SimulatedNodeMap::new(SimulatedNodeConfig {
            width: 8,
            height: 6,
            ..SimulatedNodeConfig::default()
        }))
        .unwrap()
    }

    #[test]
    fn test_open_defaults() {
        let camera = open();
        let nodes = camera.nodes();

        assert_eq!(camera.trigger(), TriggerMode::Timer);
        assert_eq!(camera.frame_size(), FrameSize::new(8, 6));
        assert_eq!(nodes.enum_value("ExposureAuto"), Some("Off"));
        assert_eq!(nodes.enum_value("PixelFormat"), Some("Mono8"));
        assert_eq!(nodes.enum_value("ShutterMode"), Some("Global"));
        assert_eq!(nodes.enum_value("TriggerMode"), Some("Off"));
        assert_eq!(nodes.bool_value("AcquisitionFrameRateEnable"), Some(true));
        assert!(nodes
            .history()
            .iter()
            .any(|entry| entry == "LineSelector=Line4"));
    }

    #[test]
    fn test_same_trigger_is_noop() {
        let mut camera = open();
        let writes = camera.nodes().history().len();

        camera.set_trigger(TriggerMode::Timer).unwrap();

        assert_eq!(camera.nodes().history().len(), writes);
    }

    #[test]
    fn test_frame_rate_timer_only() {
        let mut camera = open();
        camera.set_frame_rate(20.0).unwrap();
        assert_eq!(camera.frame_rate().unwrap(), 20.0);

        camera.set_trigger(TriggerMode::External).unwrap();
        let writes = camera.nodes().history().len();

        assert_eq!(camera.frame_rate().unwrap(), 0.0);
        assert!(matches!(
            camera.set_frame_rate(10.0),
            Err(CameraError::TriggerRequired { .. })
        ));
        assert_eq!(camera.nodes().history().len(), writes);
        assert_eq!(camera.nodes().float_value(FRAME_RATE), Some(20.0));
    }

    #[test]
    fn test_exposure_in_microseconds() {
        let mut camera = open();
        camera.set_exposure(5.0).unwrap();

        assert_eq!(camera.nodes().float_value(EXPOSURE_TIME), Some(5000.0));
        assert_eq!(camera.exposure().unwrap(), 5.0);
    }

    #[test]
    fn test_out_of_range_rate_fails() {
        let mut camera = open();
        assert!(matches!(
            camera.set_frame_rate(10_000.0),
            Err(CameraError::Transport(TransportError::Failed(_)))
        ));
        assert!(matches!(
            camera.set_frame_rate(0.0),
            Err(CameraError::Timing(TimingError::InvalidFrameRate(_)))
        ));
    }

    #[test]
    fn test_external_trigger_configuration() {
        let mut camera = open();
        camera.set_trigger(TriggerMode::External).unwrap();

        let nodes = camera.nodes();
        assert_eq!(nodes.enum_value("TriggerMode"), Some("On"));
        assert_eq!(nodes.enum_value("TriggerSource"), Some("Line3"));
        assert_eq!(nodes.enum_value("TriggerActivation"), Some("FallingEdge"));
    }

    #[test]
    fn test_software_trigger_grab() {
        let mut camera = open();
        camera.set_trigger(TriggerMode::Software).unwrap();
        camera.start().unwrap();

        let frame = camera.grab().unwrap();

        assert_eq!(frame.size(), FrameSize::new(8, 6));
        assert_eq!(frame.sequence(), 1);
        assert!(camera
            .nodes()
            .history()
            .iter()
            .any(|entry| entry == "TriggerSoftware()"));
    }

    #[test]
    fn test_external_grab_times_out_without_pulse() {
        let mut camera = open();
        camera.set_trigger(TriggerMode::External).unwrap();
        camera.start().unwrap();

        assert!(matches!(
            camera.grab(),
            Err(CameraError::Transport(TransportError::Timeout(_)))
        ));
        assert_eq!(camera.stats().grab_failures, 1);

        camera.nodes_mut().pulse_line();
        assert!(camera.grab().is_ok());
        assert_eq!(camera.stats().frames_grabbed, 1);
    }

    #[test]
    fn test_start_stop() {
        let mut camera = open();
        camera.start().unwrap();
        camera.start().unwrap();
        assert!(camera.is_streaming());
        camera.stop().unwrap();
        assert!(!camera.is_streaming());
    }

    #[test]
    fn test_adapter_enumerate_and_open() {
        let mut adapter = PylonAdapter::new(SimulatedNodeBus::single());
        let cameras = adapter.enumerate().unwrap();

        assert_eq!(cameras[0].id, "21900001");
        assert_eq!(cameras[0].description, "sim via SimulatedUsb");
        assert!(adapter.open("21900001").is_ok());
        assert!(matches!(
            adapter.open("nope"),
            Err(CameraError::DeviceNotFound(_))
        ));
    }
}
