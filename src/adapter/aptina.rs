//! Register-level sensor binding.
//!
//! Drives an LVDS-attached CMOS sensor through named registers. Frame rate
//! and exposure are expressed in pixel-clock ticks and programmed through
//! the blanking and shutter width registers using [`TimingModel`].

use super::{Adapter, AdapterId, CameraInfo};
use crate::capture::{
    Camera, CameraError, CameraStats, Frame, FrameSize, SensorConfig, TriggerMode, TriggerState,
};
use crate::timing::{Blanking, BlankingBounds, ExposureWidth, SensorGeometry, TimingModel};
use crate::transport::{
    FrameTransport, RegisterAccess, RegisterError, RegisterWriter, RetryPolicy, SensorBus,
    SensorTransport, SideEffect, WriteRequest,
};
use std::time::Duration;

const HORZ_BLANK: &str = "horz_blank_contexta_reg";
const VERT_BLANK: &str = "vert_blank_contexta_reg";
const COARSE_SHUTTER: &str = "coarse_shutter_width_total_contexta";
const FINE_SHUTTER: &str = "fine_shutter_width_total_contexta";
const CONTROL_MODE: &str = "control_mode_reg";
const AUTO_BLOCK: &str = "auto_block_control";

const RESET_SETTLE: Duration = Duration::from_micros(500);
const I2C_SPEED_KHZ: u32 = 100;

/// Camera built on a register-level sensor.
pub struct AptinaCamera<T> {
    transport: T,
    writer: RegisterWriter,
    timing: TimingModel,
    trigger: TriggerState,
    padding: usize,
    streaming: bool,
    sequence: u64,
    grab_failures: u64,
    transient_retries: u64,
}

impl<T: SensorTransport> AptinaCamera<T> {
    /// Initializes the sensor behind `transport`.
    ///
    /// Resets the sensor, brings up the LVDS link, disables the automatic
    /// exposure and gain loops, selects the image format and programs
    /// timer (master) mode.
    pub fn open(
        mut transport: T,
        sensor: &SensorConfig,
        policy: RetryPolicy,
    ) -> Result<Self, CameraError> {
        let mut writer = RegisterWriter::new(policy);

        transport.set_mode("sensor_reset", 1)?;
        std::thread::sleep(RESET_SETTLE);
        transport.set_mode("ship_speed", I2C_SPEED_KHZ)?;

        let pixel_clock = transport.get_mode("pixclk_freq")?;
        if pixel_clock == 0 {
            return Err(CameraError::OpenFailed("sensor reports no pixel clock".to_owned()));
        }

        transport.set_streaming(false)?;
        setup_lvds(&mut writer, &mut transport)?;

        writer.write(&mut transport, WriteRequest::new(AUTO_BLOCK, "aec_enable_contexta", 0))?;
        writer.write(&mut transport, WriteRequest::new(AUTO_BLOCK, "agch_enable_contexta", 0))?;
        transport.set_mode("unswizzle_mode", 0)?;
        writer.write(&mut transport, WriteRequest::new(CONTROL_MODE, "contextb_enable", 0))?;

        transport.set_image_format(&sensor.image_format)?;
        let (width, height) = transport.image_size()?;
        let geometry = SensorGeometry::new(width, height)?;
        let timing = TimingModel::new(f64::from(pixel_clock), geometry, sensor.bounds())?;

        program_trigger(&mut writer, &mut transport, timing.bounds(), TriggerMode::Timer)?;

        tracing::info!(
            width,
            height,
            pixel_clock,
            format = %sensor.image_format,
            "Register-level sensor initialized"
        );

        Ok(Self {
            transport,
            writer,
            timing,
            trigger: TriggerState::new(TriggerMode::Timer),
            padding: sensor.frame_padding,
            streaming: false,
            sequence: 0,
            grab_failures: 0,
            transient_retries: 0,
        })
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The timing model built from the sensor's clock and geometry.
    pub fn timing(&self) -> &TimingModel {
        &self.timing
    }

    fn write(&mut self, request: WriteRequest<'_>) -> Result<(), RegisterError> {
        self.writer.write(&mut self.transport, request)
    }

    fn read(&mut self, register: &str) -> Result<u32, RegisterError> {
        self.writer.read(&mut self.transport, register, "")
    }

    fn blanking(&mut self) -> Result<Blanking, RegisterError> {
        Ok(Blanking {
            horizontal: self.read(HORZ_BLANK)?,
            vertical: self.read(VERT_BLANK)?,
        })
    }

    fn frame_pixels(&mut self) -> Result<u64, RegisterError> {
        let blanking = self.blanking()?;
        Ok(self.timing.frame_pixels(blanking))
    }

    fn exposure_pixels(&mut self, readout_overhead: bool) -> Result<u64, RegisterError> {
        let width = ExposureWidth {
            coarse: self.read(COARSE_SHUTTER)?,
            fine: self.read(FINE_SHUTTER)?,
        };
        let horizontal = self.read(HORZ_BLANK)?;
        Ok(self
            .timing
            .combine_exposure(width, horizontal, readout_overhead))
    }

    /// Writes both shutter widths. Both writes are attempted; a failure of
    /// either fails the call and may leave the other one applied.
    fn set_exposure_pixels(&mut self, pixels: u64) -> Result<(), CameraError> {
        let horizontal = self.read(HORZ_BLANK)?;
        let width = self.timing.split_exposure(pixels, horizontal)?;

        let coarse = self.write(WriteRequest::new(COARSE_SHUTTER, "", width.coarse));
        let fine = self.write(WriteRequest::new(FINE_SHUTTER, "", width.fine));
        coarse.and(fine)?;
        Ok(())
    }
}

impl<T: SensorTransport + Send> Camera for AptinaCamera<T> {
    fn trigger(&self) -> TriggerMode {
        self.trigger.current()
    }

    fn set_trigger(&mut self, mode: TriggerMode) -> Result<(), CameraError> {
        let Self {
            transport,
            writer,
            timing,
            trigger,
            ..
        } = self;
        trigger.transition(mode, |target| {
            program_trigger(writer, transport, timing.bounds(), target)
        })?;
        Ok(())
    }

    fn frame_rate(&mut self) -> Result<f64, CameraError> {
        if self.trigger.current() != TriggerMode::Timer {
            return Ok(0.0);
        }
        let frame = self.frame_pixels()?;
        let exposure = self.exposure_pixels(true)?;
        Ok(self.timing.frame_rate_hz(frame, exposure))
    }

    fn set_frame_rate(&mut self, hz: f64) -> Result<(), CameraError> {
        self.trigger.require(TriggerMode::Timer)?;

        let solution = self.timing.solve_blanking(hz)?;
        let exposure = self.exposure_pixels(false)?;

        if self.timing.exposure_exceeds_frame(exposure, hz) {
            tracing::warn!(
                hz,
                exposure_ms = self.timing.exposure_ms(exposure),
                "Exposure too long to support frame rate"
            );
        }

        let horizontal = self.write(WriteRequest::new(
            HORZ_BLANK,
            "",
            solution.blanking.horizontal,
        ));
        let vertical = self.write(WriteRequest::new(VERT_BLANK, "", solution.blanking.vertical));
        let restored = self.set_exposure_pixels(exposure);

        horizontal.and(vertical)?;
        restored
    }

    fn exposure(&mut self) -> Result<f64, CameraError> {
        let pixels = self.exposure_pixels(false)?;
        Ok(self.timing.exposure_ms(pixels))
    }

    fn set_exposure(&mut self, ms: f64) -> Result<(), CameraError> {
        let pixels = self.timing.exposure_pixels(ms)?;
        self.set_exposure_pixels(pixels)
    }

    fn frame_size(&self) -> FrameSize {
        let geometry = self.timing.geometry();
        FrameSize::new(geometry.width(), geometry.height())
    }

    fn start(&mut self) -> Result<(), CameraError> {
        if !self.streaming {
            self.transport.set_streaming(true)?;
            self.streaming = true;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        if self.streaming {
            self.transport.set_streaming(false)?;
            self.streaming = false;
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn grab(&mut self) -> Result<Frame, CameraError> {
        let size = self.frame_size();
        let expected = size.pixels();
        let mut frame = Frame::zeroed(size.width, size.height, self.padding, self.sequence + 1);

        let length = loop {
            match self.transport.grab_into(frame.buffer_mut()) {
                Ok(length) => break length,
                Err(err) if err.is_transient() => self.transient_retries += 1,
                Err(err) => {
                    self.grab_failures += 1;
                    tracing::warn!(error = %err, "Grab failed");
                    return Err(err.into());
                }
            }
        };

        if length != expected && length != expected + self.padding {
            tracing::warn!(
                expected,
                received = length,
                missing = expected.saturating_sub(length),
                "Missing frame data"
            );
        }

        self.sequence += 1;
        Ok(frame)
    }

    fn stats(&self) -> CameraStats {
        let writes = self.writer.stats();
        CameraStats {
            frames_grabbed: self.sequence,
            grab_failures: self.grab_failures,
            transient_retries: self.transient_retries,
            register_writes: writes.writes,
            register_retries: writes.retries,
            register_failures: writes.failures,
        }
    }
}

/// Brings up the LVDS link in 8-bit mode.
fn setup_lvds<B: RegisterAccess + ?Sized>(
    writer: &mut RegisterWriter,
    bus: &mut B,
) -> Result<(), RegisterError> {
    writer.write(bus, WriteRequest::new("lvds_use_10bit_pixels", "", 0))?;
    writer.write(bus, WriteRequest::new("lvds_shft_clk_control", "powerdown", 0))?;
    writer.write(bus, WriteRequest::new("lvds_master_control", "lvds_powerdown", 0))?;
    writer.write(
        bus,
        WriteRequest::new("reset_reg", "soft_reset", 1)
            .expecting(SideEffect::Pause)
            .unverified(),
    )?;
    writer.write(
        bus,
        WriteRequest::new("lvds_internal_sync", "", 1).expecting(SideEffect::Resume),
    )?;
    writer.write(
        bus,
        WriteRequest::new("lvds_internal_sync", "", 0).expecting(SideEffect::Resume),
    )
}

/// Programs the control registers for a trigger mode.
fn program_trigger<B: RegisterAccess + ?Sized>(
    writer: &mut RegisterWriter,
    bus: &mut B,
    bounds: BlankingBounds,
    mode: TriggerMode,
) -> Result<(), CameraError> {
    match mode {
        TriggerMode::Timer => {
            writer.write(bus, WriteRequest::new(CONTROL_MODE, "operating_mode", 1))?;
            writer.write(bus, WriteRequest::new(CONTROL_MODE, "simultaneous_seq", 1))?;
        }
        TriggerMode::External => {
            writer.write(bus, WriteRequest::new(CONTROL_MODE, "operating_mode", 3))?;
            writer.write(bus, WriteRequest::new(CONTROL_MODE, "simultaneous_seq", 1))?;
            // Minimum blanking so the sensor keeps up with the fastest trigger.
            writer.write(bus, WriteRequest::new(VERT_BLANK, "", bounds.min_vertical))?;
            writer.write(bus, WriteRequest::new(HORZ_BLANK, "", bounds.min_horizontal))?;
        }
        TriggerMode::Software => return Err(CameraError::UnsupportedTrigger(mode)),
    }
    Ok(())
}

/// Adapter for register-level sensors found on a [`SensorBus`].
pub struct AptinaAdapter<B> {
    bus: B,
    sensor: SensorConfig,
    policy: RetryPolicy,
}

impl<B: SensorBus> AptinaAdapter<B> {
    /// Creates an adapter opening every sensor with the same settings.
    pub fn new(bus: B, sensor: SensorConfig, policy: RetryPolicy) -> Self {
        Self {
            bus,
            sensor,
            policy,
        }
    }
}

impl<B> Adapter for AptinaAdapter<B>
where
    B: SensorBus + Send,
    B::Transport: Send + 'static,
{
    fn id(&self) -> AdapterId {
        AdapterId::Aptina
    }

    fn version(&self) -> String {
        self.bus.version()
    }

    fn enumerate(&mut self) -> Result<Vec<CameraInfo>, CameraError> {
        Ok(self
            .bus
            .probe()?
            .into_iter()
            .map(|device| CameraInfo {
                id: device.serial,
                name: device.part_number,
                description: String::new(),
            })
            .collect())
    }

    fn open(&mut self, id: &str) -> Result<Box<dyn Camera>, CameraError> {
        let index = self
            .bus
            .probe()?
            .iter()
            .position(|device| device.serial == id)
            .ok_or_else(|| CameraError::DeviceNotFound(id.to_owned()))?;

        let transport = self.bus.connect(index)?;
        let camera = AptinaCamera::open(transport, &self.sensor, self.policy)?;
        Ok(Box::new(camera))
    }
}
