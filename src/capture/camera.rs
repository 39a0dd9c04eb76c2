//! Camera capability interface.
//!
//! Every sensor binding implements [`Camera`], so client code can
//! configure and stream from any attached device without depending on a
//! vendor API.

use super::{Frame, FrameSize, TriggerMode, TriggerState};
use crate::timing::TimingError;
use crate::transport::{RegisterError, TransportError};
use thiserror::Error;

/// Errors that can occur during camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),
    #[error("failed to open camera: {0}")]
    OpenFailed(String),
    #[error("trigger mode {0} is not supported by this camera")]
    UnsupportedTrigger(TriggerMode),
    #[error("operation requires {required} trigger mode, camera is in {current} mode")]
    TriggerRequired {
        required: TriggerMode,
        current: TriggerMode,
    },
    #[error("{0} is not supported by this camera")]
    Unsupported(&'static str),
    #[error(transparent)]
    Timing(#[from] TimingError),
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("failed to capture frame: {0}")]
    CaptureFailed(String),
}

/// Counters maintained by a camera.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CameraStats {
    /// Frames returned by `grab`.
    pub frames_grabbed: u64,
    /// Grabs that failed.
    pub grab_failures: u64,
    /// Transient "not enough data" results retried inside `grab`.
    pub transient_retries: u64,
    /// Register writes issued.
    pub register_writes: u64,
    /// Register writes repeated after a mismatch.
    pub register_retries: u64,
    /// Register writes that were never applied.
    pub register_failures: u64,
}

/// Uniform camera contract.
///
/// Operations block until the device answers. A camera is driven from a
/// single thread at a time; concurrent control of one camera must be
/// serialized by the caller. Different cameras are independent.
pub trait Camera: Send {
    /// Active trigger mode.
    fn trigger(&self) -> TriggerMode;

    /// Switches trigger mode. Requesting the active mode is a no-op.
    fn set_trigger(&mut self, mode: TriggerMode) -> Result<(), CameraError>;

    /// Achievable frame rate in Hz; `0.0` outside [`TriggerMode::Timer`].
    fn frame_rate(&mut self) -> Result<f64, CameraError>;

    /// Programs the frame rate. Fails without side effects outside
    /// [`TriggerMode::Timer`].
    fn set_frame_rate(&mut self, hz: f64) -> Result<(), CameraError>;

    /// Exposure in milliseconds.
    fn exposure(&mut self) -> Result<f64, CameraError>;

    /// Programs the exposure in milliseconds.
    fn set_exposure(&mut self, ms: f64) -> Result<(), CameraError>;

    /// Image size, fixed once the camera is open.
    fn frame_size(&self) -> FrameSize;

    /// Starts frame acquisition. Idempotent.
    fn start(&mut self) -> Result<(), CameraError>;

    /// Stops frame acquisition. Idempotent.
    fn stop(&mut self) -> Result<(), CameraError>;

    /// Whether acquisition is running.
    fn is_streaming(&self) -> bool;

    /// Grabs the next frame, blocking until it arrives.
    fn grab(&mut self) -> Result<Frame, CameraError>;

    /// Counters since the camera was opened.
    fn stats(&self) -> CameraStats {
        CameraStats::default()
    }
}

/// Software-only camera producing a fixed test image.
///
/// The upper half is a left-to-right gradient, the lower half the same
/// gradient mirrored.
#[derive(Debug)]
pub struct DummyCamera {
    trigger: TriggerState,
    streaming: bool,
    sequence: u64,
}

impl DummyCamera {
    /// Image width of the dummy camera.
    pub const WIDTH: u32 = 640;
    /// Image height of the dummy camera.
    pub const HEIGHT: u32 = 480;

    /// Creates a stopped camera in software trigger mode.
    pub fn new() -> Self {
        Self {
            trigger: TriggerState::new(TriggerMode::Software),
            streaming: false,
            sequence: 0,
        }
    }
}

impl Default for DummyCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl Camera for DummyCamera {
    fn trigger(&self) -> TriggerMode {
        self.trigger.current()
    }

    fn set_trigger(&mut self, mode: TriggerMode) -> Result<(), CameraError> {
        self.trigger
            .transition(mode, |target| Err(CameraError::UnsupportedTrigger(target)))?;
        Ok(())
    }

    fn frame_rate(&mut self) -> Result<f64, CameraError> {
        Ok(0.0)
    }

    fn set_frame_rate(&mut self, _hz: f64) -> Result<(), CameraError> {
        self.trigger.require(TriggerMode::Timer)
    }

    fn exposure(&mut self) -> Result<f64, CameraError> {
        Err(CameraError::Unsupported("exposure control"))
    }

    fn set_exposure(&mut self, _ms: f64) -> Result<(), CameraError> {
        Err(CameraError::Unsupported("exposure control"))
    }

    fn frame_size(&self) -> FrameSize {
        FrameSize::new(Self::WIDTH, Self::HEIGHT)
    }

    fn start(&mut self) -> Result<(), CameraError> {
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        self.streaming = false;
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn grab(&mut self) -> Result<Frame, CameraError> {
        self.sequence += 1;
        let mut frame = Frame::zeroed(Self::WIDTH, Self::HEIGHT, 0, self.sequence);

        for y in 0..Self::HEIGHT {
            for x in 0..Self::WIDTH {
                let column = if y < Self::HEIGHT / 2 {
                    x
                } else {
                    Self::WIDTH - x
                };
                if let Some(sample) = frame.at_mut(x, y) {
                    *sample = (f64::from(column) / 2.5) as u8;
                }
            }
        }

        Ok(frame)
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_grabbed: self.sequence,
            ..CameraStats::default()
        }
    }
}
