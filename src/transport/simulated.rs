//! In-memory sensor for tests and demonstrations.
//!
//! Behaves like a register-level sensor behind a vendor SDK: registers
//! hold what was written, modes hold what was set, and grabs produce a
//! synthetic 8-bit pattern. Faults can be injected per register or per
//! grab to exercise retry and error paths.

use super::{
    DeviceDescriptor, FrameTransport, RegisterAccess, SensorBus, SideEffect, TransportError,
};
use std::collections::{HashMap, HashSet, VecDeque};

type RegisterKey = (String, String);

fn key(register: &str, field: &str) -> RegisterKey {
    (register.to_owned(), field.to_owned())
}

/// Static description of a simulated sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedSensorConfig {
    /// Part number reported on probe.
    pub part_number: String,
    /// Serial (fuse id) reported on probe.
    pub serial: String,
    /// Active image width.
    pub width: u32,
    /// Active image height.
    pub height: u32,
    /// Pixel clock in Hz, reported through the `pixclk_freq` mode.
    pub pixel_clock_hz: u32,
}

impl Default for SimulatedSensorConfig {
    fn default() -> Self {
        Self {
            part_number: "SIM-1280x1024".to_owned(),
            serial: "SN-SIM-0001".to_owned(),
            width: 1280,
            height: 1024,
            pixel_clock_hz: 96_000_000,
        }
    }
}

/// A register-level sensor simulated in memory.
#[derive(Debug)]
pub struct SimulatedSensor {
    config: SimulatedSensorConfig,
    registers: HashMap<RegisterKey, u32>,
    modes: HashMap<String, u32>,
    effects: HashMap<RegisterKey, SideEffect>,
    stuck: HashSet<RegisterKey>,
    ignored: HashMap<RegisterKey, u32>,
    failing: HashSet<RegisterKey>,
    grab_results: VecDeque<Result<usize, TransportError>>,
    image_format: Option<String>,
    streaming: bool,
    register_writes: u64,
    register_reads: u64,
    frames: u64,
}

impl SimulatedSensor {
    /// Creates a sensor with power-on register values.
    pub fn new(config: SimulatedSensorConfig) -> Self {
        let mut modes = HashMap::new();
        modes.insert("pixclk_freq".to_owned(), config.pixel_clock_hz);

        let mut effects = HashMap::new();
        effects.insert(key("reset_reg", "soft_reset"), SideEffect::Pause);
        effects.insert(key("lvds_internal_sync", ""), SideEffect::Resume);

        Self {
            config,
            registers: HashMap::new(),
            modes,
            effects,
            stuck: HashSet::new(),
            ignored: HashMap::new(),
            failing: HashSet::new(),
            grab_results: VecDeque::new(),
            image_format: None,
            streaming: false,
            register_writes: 0,
            register_reads: 0,
            frames: 0,
        }
    }

    /// The static description this sensor was built from.
    pub fn config(&self) -> &SimulatedSensorConfig {
        &self.config
    }

    /// Current register value, without counting a read.
    pub fn register(&self, register: &str, field: &str) -> Option<u32> {
        self.registers.get(&key(register, field)).copied()
    }

    /// Current mode value.
    pub fn mode(&self, name: &str) -> Option<u32> {
        self.modes.get(name).copied()
    }

    /// Presets a register value without counting a write.
    pub fn preset_register(&mut self, register: &str, field: &str, value: u32) {
        self.registers.insert(key(register, field), value);
    }

    /// Makes a register ignore every write.
    pub fn stick_register(&mut self, register: &str, field: &str) {
        self.stuck.insert(key(register, field));
    }

    /// Makes a register ignore the next `count` writes.
    pub fn ignore_writes(&mut self, register: &str, field: &str, count: u32) {
        self.ignored.insert(key(register, field), count);
    }

    /// Makes every access to a register fail at the transport level.
    pub fn fail_register(&mut self, register: &str, field: &str) {
        self.failing.insert(key(register, field));
    }

    /// Overrides the side effect reported by writes to a register.
    pub fn set_side_effect(&mut self, register: &str, field: &str, effect: SideEffect) {
        self.effects.insert(key(register, field), effect);
    }

    /// Queues `count` grabs that report [`TransportError::NotEnoughData`].
    pub fn queue_not_enough_data(&mut self, count: usize) {
        for _ in 0..count {
            self.grab_results.push_back(Err(TransportError::NotEnoughData));
        }
    }

    /// Queues a grab that fails with `error`.
    pub fn queue_grab_error(&mut self, error: TransportError) {
        self.grab_results.push_back(Err(error));
    }

    /// Queues a grab that delivers only `bytes` bytes.
    pub fn queue_short_frame(&mut self, bytes: usize) {
        self.grab_results.push_back(Ok(bytes));
    }

    /// Whether streaming is enabled.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Selected image format, if any.
    pub fn image_format(&self) -> Option<&str> {
        self.image_format.as_deref()
    }

    /// Register writes received so far.
    pub fn register_writes(&self) -> u64 {
        self.register_writes
    }

    /// Register reads received so far.
    pub fn register_reads(&self) -> u64 {
        self.register_reads
    }

    /// Frames delivered so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn check_failing(&self, register: &str, field: &str) -> Result<(), TransportError> {
        if self.failing.contains(&key(register, field)) {
            return Err(TransportError::Failed(format!(
                "i2c nack on '{register}' '{field}'"
            )));
        }
        Ok(())
    }

    fn fill_pattern(&self, buffer: &mut [u8], len: usize) {
        let width = self.config.width.max(1) as usize;
        let shift = self.frames as usize;
        for (i, byte) in buffer.iter_mut().take(len).enumerate() {
            let x = i % width;
            let y = i / width;
            *byte = ((x + y + shift) % 256) as u8;
        }
    }
}

impl RegisterAccess for SimulatedSensor {
    fn set_register(
        &mut self,
        register: &str,
        field: &str,
        value: u32,
    ) -> Result<SideEffect, TransportError> {
        self.register_writes += 1;
        self.check_failing(register, field)?;

        let k = key(register, field);
        let effect = self.effects.get(&k).copied().unwrap_or_default();

        if self.stuck.contains(&k) {
            return Ok(effect);
        }
        if let Some(remaining) = self.ignored.get_mut(&k) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(effect);
            }
        }

        self.registers.insert(k, value);
        Ok(effect)
    }

    fn get_register(&mut self, register: &str, field: &str) -> Result<u32, TransportError> {
        self.register_reads += 1;
        self.check_failing(register, field)?;
        Ok(self.register(register, field).unwrap_or(0))
    }

    fn set_mode(&mut self, name: &str, value: u32) -> Result<(), TransportError> {
        if name == "pixclk_freq" {
            return Err(TransportError::Failed("pixclk_freq is read-only".to_owned()));
        }
        self.modes.insert(name.to_owned(), value);
        Ok(())
    }

    fn get_mode(&mut self, name: &str) -> Result<u32, TransportError> {
        self.mode(name)
            .ok_or_else(|| TransportError::UnknownMode(name.to_owned()))
    }
}

impl FrameTransport for SimulatedSensor {
    fn set_image_format(&mut self, format: &str) -> Result<(), TransportError> {
        self.image_format = Some(format.to_owned());
        Ok(())
    }

    fn image_size(&mut self) -> Result<(u32, u32), TransportError> {
        if self.image_format.is_none() {
            return Err(TransportError::Failed("image format not selected".to_owned()));
        }
        Ok((self.config.width, self.config.height))
    }

    fn set_streaming(&mut self, enabled: bool) -> Result<(), TransportError> {
        self.streaming = enabled;
        Ok(())
    }

    fn grab_into(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        let full = (self.config.width as usize) * (self.config.height as usize);

        let len = match self.grab_results.pop_front() {
            Some(Err(err)) => return Err(err),
            Some(Ok(bytes)) => bytes,
            None => full,
        };
        let len = len.min(buffer.len());

        self.fill_pattern(buffer, len);
        self.frames += 1;
        Ok(len)
    }
}

/// A bus of simulated sensors, standing in for the vendor probe API.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    sensors: Vec<SimulatedSensorConfig>,
}

impl SimulatedBus {
    /// Creates a bus with the given sensors attached.
    pub fn new(sensors: Vec<SimulatedSensorConfig>) -> Self {
        Self { sensors }
    }

    /// A bus with a single default sensor.
    pub fn single() -> Self {
        Self::new(vec![SimulatedSensorConfig::default()])
    }
}

impl SensorBus for SimulatedBus {
    type Transport = SimulatedSensor;

    fn version(&self) -> String {
        format!("simulated sensor bus v{}", crate::VERSION)
    }

    fn probe(&mut self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        Ok(self
            .sensors
            .iter()
            .map(|s| DeviceDescriptor {
                part_number: s.part_number.clone(),
                serial: s.serial.clone(),
            })
            .collect())
    }

    fn connect(&mut self, index: usize) -> Result<Self::Transport, TransportError> {
        self.sensors
            .get(index)
            .cloned()
            .map(SimulatedSensor::new)
            .ok_or_else(|| TransportError::Failed(format!("no sensor at index {index}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_hold_written_values() {
        let mut sensor = SimulatedSensor::new(SimulatedSensorConfig::default());
        sensor.set_register("control_mode_reg", "operating_mode", 3).unwrap();

        assert_eq!(sensor.get_register("control_mode_reg", "operating_mode").unwrap(), 3);
        assert_eq!(sensor.get_register("control_mode_reg", "contextb_enable").unwrap(), 0);
        assert_eq!(sensor.register_writes(), 1);
        assert_eq!(sensor.register_reads(), 2);
    }

    #[test]
    fn test_pixel_clock_mode() {
        let mut sensor = SimulatedSensor::new(SimulatedSensorConfig::default());
        assert_eq!(sensor.get_mode("pixclk_freq").unwrap(), 96_000_000);
        assert!(sensor.set_mode("pixclk_freq", 1).is_err());
        assert!(matches!(
            sensor.get_mode("no_such_mode"),
            Err(TransportError::UnknownMode(_))
        ));
    }

    #[test]
    fn test_grab_requires_format_for_size() {
        let mut sensor = SimulatedSensor::new(SimulatedSensorConfig::default());
        assert!(sensor.image_size().is_err());
        sensor.set_image_format("BAYER-8").unwrap();
        assert_eq!(sensor.image_size().unwrap(), (1280, 1024));
    }

    #[test]
    fn test_queued_grab_results() {
        let mut sensor = SimulatedSensor::new(SimulatedSensorConfig {
            width: 8,
            height: 4,
            ..SimulatedSensorConfig::default()
        });
        sensor.queue_not_enough_data(1);
        sensor.queue_short_frame(10);

        let mut buffer = vec![0u8; 64];
        assert_eq!(sensor.grab_into(&mut buffer), Err(TransportError::NotEnoughData));
        assert_eq!(sensor.grab_into(&mut buffer).unwrap(), 10);
        assert_eq!(sensor.grab_into(&mut buffer).unwrap(), 32);
        assert_eq!(sensor.frames(), 2);
    }

    #[test]
    fn test_bus_probe_and_connect() {
        let mut bus = SimulatedBus::single();
        let devices = bus.probe().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial, "SN-SIM-0001");

        assert!(bus.connect(0).is_ok());
        assert!(bus.connect(1).is_err());
    }
}
