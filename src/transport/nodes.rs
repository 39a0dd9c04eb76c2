//! Named-feature camera access.
//!
//! Some cameras expose their settings as a tree of named feature nodes
//! (floats, enumerations, booleans, integers and commands) instead of raw
//! registers, and deliver frames through a grab engine.

use super::TransportError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// One image handed out by a grab engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedImage {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Mono8 samples, row major.
    pub data: Vec<u8>,
}

/// Feature-node access to one camera.
pub trait FeatureNodes {
    /// Writes a float feature.
    fn set_float(&mut self, name: &str, value: f64) -> Result<(), TransportError>;

    /// Reads a float feature.
    fn get_float(&mut self, name: &str) -> Result<f64, TransportError>;

    /// Selects an enumeration entry by its symbolic name.
    fn set_enum(&mut self, name: &str, value: &str) -> Result<(), TransportError>;

    /// Writes a boolean feature.
    fn set_bool(&mut self, name: &str, value: bool) -> Result<(), TransportError>;

    /// Reads an integer feature.
    fn get_int(&mut self, name: &str) -> Result<i64, TransportError>;

    /// Runs a command feature.
    fn execute(&mut self, command: &str) -> Result<(), TransportError>;

    /// Starts the grab engine.
    fn start_grabbing(&mut self) -> Result<(), TransportError>;

    /// Stops the grab engine.
    fn stop_grabbing(&mut self) -> Result<(), TransportError>;

    /// Whether the grab engine is running.
    fn is_grabbing(&self) -> bool;

    /// Blocks until the camera accepts a frame trigger.
    fn wait_trigger_ready(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Blocks until the next image is available.
    fn retrieve(&mut self, timeout: Duration) -> Result<RetrievedImage, TransportError>;
}

/// Identity of a feature-node camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDeviceInfo {
    /// Serial number, used as the camera id.
    pub serial: String,
    /// Model name.
    pub model: String,
    /// User defined name stored in the camera.
    pub user_name: String,
    /// Transport layer class.
    pub device_class: String,
}

/// Discovery and connection for feature-node cameras.
pub trait NodeBus {
    /// Node map produced for a connected camera.
    type Nodes: FeatureNodes;

    /// Version string of the underlying SDK.
    fn version(&self) -> String;

    /// Lists the attached cameras.
    fn enumerate(&mut self) -> Result<Vec<NodeDeviceInfo>, TransportError>;

    /// Connects to the camera with the given serial number.
    fn connect(&mut self, serial: &str) -> Result<Self::Nodes, TransportError>;
}

/// Static description of a simulated feature-node camera.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedNodeConfig {
    /// Reported identity.
    pub info: NodeDeviceInfo,
    /// Sensor width.
    pub width: u32,
    /// Sensor height.
    pub height: u32,
}

impl Default for SimulatedNodeConfig {
    fn default() -> Self {
        Self {
            info: NodeDeviceInfo {
                serial: "21900001".to_owned(),
                model: "SIM-USB-1920".to_owned(),
                user_name: "sim".to_owned(),
                device_class: "SimulatedUsb".to_owned(),
            },
            width: 1920,
            height: 1200,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FloatNode {
    value: f64,
    min: f64,
    max: f64,
}

/// In-memory feature-node camera.
///
/// Frames are only delivered when the configured trigger allows it: freely
/// with the trigger off, after [`execute`](FeatureNodes::execute) of
/// `TriggerSoftware` with a software source, and after
/// [`pulse_line`](Self::pulse_line) with a line source.
#[derive(Debug)]
pub struct SimulatedNodeMap {
    config: SimulatedNodeConfig,
    floats: HashMap<String, FloatNode>,
    enums: HashMap<String, String>,
    bools: HashMap<String, bool>,
    history: Vec<String>,
    pending_triggers: u32,
    failures: VecDeque<TransportError>,
    grabbing: bool,
    frames: u64,
}

impl SimulatedNodeMap {
    /// Creates a camera with power-on feature values.
    pub fn new(config: SimulatedNodeConfig) -> Self {
        let mut floats = HashMap::new();
        floats.insert(
            "AcquisitionFrameRate".to_owned(),
            FloatNode {
                value: 30.0,
                min: 0.1,
                max: 160.0,
            },
        );
        floats.insert(
            "ExposureTime".to_owned(),
            FloatNode {
                value: 5000.0,
                min: 20.0,
                max: 10_000_000.0,
            },
        );

        let mut enums = HashMap::new();
        for (name, value) in [
            ("ExposureAuto", "Continuous"),
            ("PixelFormat", "BayerRG8"),
            ("AcquisitionMode", "SingleFrame"),
            ("ShutterMode", "Rolling"),
            ("TriggerMode", "Off"),
            ("TriggerSelector", "FrameStart"),
            ("TriggerSource", "Line1"),
            ("TriggerActivation", "RisingEdge"),
            ("LineSelector", "Line1"),
            ("LineMode", "Input"),
            ("LineSource", "Off"),
        ] {
            enums.insert(name.to_owned(), value.to_owned());
        }

        let mut bools = HashMap::new();
        bools.insert("AcquisitionFrameRateEnable".to_owned(), false);

        Self {
            config,
            floats,
            enums,
            bools,
            history: Vec::new(),
            pending_triggers: 0,
            failures: VecDeque::new(),
            grabbing: false,
            frames: 0,
        }
    }

    /// Current value of an enumeration feature.
    pub fn enum_value(&self, name: &str) -> Option<&str> {
        self.enums.get(name).map(String::as_str)
    }

    /// Current value of a boolean feature.
    pub fn bool_value(&self, name: &str) -> Option<bool> {
        self.bools.get(name).copied()
    }

    /// Current value of a float feature.
    pub fn float_value(&self, name: &str) -> Option<f64> {
        self.floats.get(name).map(|node| node.value)
    }

    /// Every write and command, in order, as `name=value` or `name()`.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Simulates a falling edge on the trigger input line.
    pub fn pulse_line(&mut self) {
        self.pending_triggers += 1;
    }

    /// Makes the next retrieve fail with `error`.
    pub fn queue_retrieve_error(&mut self, error: TransportError) {
        self.failures.push_back(error);
    }

    /// Frames delivered so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn trigger_source(&self) -> Option<&str> {
        if self.enum_value("TriggerMode") == Some("On") {
            self.enum_value("TriggerSource")
        } else {
            None
        }
    }
}

impl FeatureNodes for SimulatedNodeMap {
    fn set_float(&mut self, name: &str, value: f64) -> Result<(), TransportError> {
        let node = self
            .floats
            .get_mut(name)
            .ok_or_else(|| TransportError::UnknownFeature(name.to_owned()))?;
        if !(node.min..=node.max).contains(&value) {
            return Err(TransportError::Failed(format!(
                "{name} value {value} out of range [{}, {}]",
                node.min, node.max
            )));
        }
        node.value = value;
        self.history.push(format!("{name}={value}"));
        Ok(())
    }

    fn get_float(&mut self, name: &str) -> Result<f64, TransportError> {
        self.float_value(name)
            .ok_or_else(|| TransportError::UnknownFeature(name.to_owned()))
    }

    fn set_enum(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        let entry = self
            .enums
            .get_mut(name)
            .ok_or_else(|| TransportError::UnknownFeature(name.to_owned()))?;
        *entry = value.to_owned();
        self.history.push(format!("{name}={value}"));
        Ok(())
    }

    fn set_bool(&mut self, name: &str, value: bool) -> Result<(), TransportError> {
        let entry = self
            .bools
            .get_mut(name)
            .ok_or_else(|| TransportError::UnknownFeature(name.to_owned()))?;
        *entry = value;
        self.history.push(format!("{name}={value}"));
        Ok(())
    }

    fn get_int(&mut self, name: &str) -> Result<i64, TransportError> {
        match name {
            "Width" => Ok(i64::from(self.config.width)),
            "Height" => Ok(i64::from(self.config.height)),
            _ => Err(TransportError::UnknownFeature(name.to_owned())),
        }
    }

    fn execute(&mut self, command: &str) -> Result<(), TransportError> {
        match command {
            "TriggerSoftware" => {
                if self.trigger_source() == Some("Software") {
                    self.pending_triggers += 1;
                }
            }
            _ => return Err(TransportError::UnknownFeature(command.to_owned())),
        }
        self.history.push(format!("{command}()"));
        Ok(())
    }

    fn start_grabbing(&mut self) -> Result<(), TransportError> {
        self.grabbing = true;
        Ok(())
    }

    fn stop_grabbing(&mut self) -> Result<(), TransportError> {
        self.grabbing = false;
        self.pending_triggers = 0;
        Ok(())
    }

    fn is_grabbing(&self) -> bool {
        self.grabbing
    }

    fn wait_trigger_ready(&mut self, timeout: Duration) -> Result<(), TransportError> {
        if !self.grabbing {
            return Err(TransportError::Timeout(timeout));
        }
        Ok(())
    }

    fn retrieve(&mut self, timeout: Duration) -> Result<RetrievedImage, TransportError> {
        if !self.grabbing {
            return Err(TransportError::Failed("grab engine not started".to_owned()));
        }
        if let Some(error) = self.failures.pop_front() {
            return Err(error);
        }
        if self.trigger_source().is_some() {
            if self.pending_triggers == 0 {
                return Err(TransportError::Timeout(timeout));
            }
            self.pending_triggers -= 1;
        }

        let width = self.config.width;
        let height = self.config.height;
        let shift = self.frames as usize;
        let data = (0..(width as usize) * (height as usize))
            .map(|i| ((i % width.max(1) as usize + shift) % 256) as u8)
            .collect();

        self.frames += 1;
        Ok(RetrievedImage {
            width,
            height,
            data,
        })
    }
}

/// A bus of simulated feature-node cameras.
#[derive(Debug, Clone, Default)]
pub struct SimulatedNodeBus {
    cameras: Vec<SimulatedNodeConfig>,
}

impl SimulatedNodeBus {
    /// Creates a bus with the given cameras attached.
    pub fn new(cameras: Vec<SimulatedNodeConfig>) -> Self {
        Self { cameras }
    }

    /// A bus with a single default camera.
    pub fn single() -> Self {
        Self::new(vec![SimulatedNodeConfig::default()])
    }
}

impl NodeBus for SimulatedNodeBus {
    type Nodes = SimulatedNodeMap;

    fn version(&self) -> String {
        format!("simulated node bus v{}", crate::VERSION)
    }

    fn enumerate(&mut self) -> Result<Vec<NodeDeviceInfo>, TransportError> {
        Ok(self.cameras.iter().map(|c| c.info.clone()).collect())
    }

    fn connect(&mut self, serial: &str) -> Result<Self::Nodes, TransportError> {
        self.cameras
            .iter()
            .find(|c| c.info.serial == serial)
            .cloned()
            .map(SimulatedNodeMap::new)
            .ok_or_else(|| TransportError::Failed(format!("no camera with serial {serial}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SimulatedNodeMap {
        SimulatedNodeMap::new(SimulatedNodeConfig {
            width: 4,
            height: 2,
            ..SimulatedNodeConfig::default()
        })
    }

    #[test]
    fn test_float_range_checked() {
        let mut nodes = small();
        nodes.set_float("ExposureTime", 5000.0).unwrap();
        assert_eq!(nodes.get_float("ExposureTime").unwrap(), 5000.0);
        assert!(nodes.set_float("AcquisitionFrameRate", 1000.0).is_err());
        assert_eq!(nodes.float_value("AcquisitionFrameRate"), Some(30.0));
        assert!(matches!(
            nodes.get_float("Gain"),
            Err(TransportError::UnknownFeature(_))
        ));
    }

    #[test]
    fn test_free_running_retrieve() {
        let mut nodes = small();
        let timeout = Duration::from_millis(50);
        assert!(nodes.retrieve(timeout).is_err());

        nodes.start_grabbing().unwrap();
        let image = nodes.retrieve(timeout).unwrap();
        assert_eq!((image.width, image.height), (4, 2));
        assert_eq!(image.data.len(), 8);
        assert_eq!(nodes.frames(), 1);
    }

    #[test]
    fn test_software_trigger_gates_frames() {
        let mut nodes = small();
        let timeout = Duration::from_millis(50);
        nodes.set_enum("TriggerMode", "On").unwrap();
        nodes.set_enum("TriggerSource", "Software").unwrap();
        nodes.start_grabbing().unwrap();

        assert_eq!(
            nodes.retrieve(timeout),
            Err(TransportError::Timeout(timeout))
        );
        nodes.execute("TriggerSoftware").unwrap();
        assert!(nodes.retrieve(timeout).is_ok());
    }

    #[test]
    fn test_line_trigger_needs_pulse() {
        let mut nodes = small();
        let timeout = Duration::from_millis(50);
        nodes.set_enum("TriggerMode", "On").unwrap();
        nodes.set_enum("TriggerSource", "Line3").unwrap();
        nodes.start_grabbing().unwrap();

        // A software trigger does nothing on a line source.
        nodes.execute("TriggerSoftware").unwrap();
        assert!(nodes.retrieve(timeout).is_err());

        nodes.pulse_line();
        assert!(nodes.retrieve(timeout).is_ok());
    }

    #[test]
    fn test_bus_connect_by_serial() {
        let mut bus = SimulatedNodeBus::single();
        let cameras = bus.enumerate().unwrap();
        assert_eq!(cameras.len(), 1);

        assert!(bus.connect(&cameras[0].serial).is_ok());
        assert!(bus.connect("00000000").is_err());
    }
}
