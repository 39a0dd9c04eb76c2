//! Sensor timing arithmetic.
//!
//! Converts between human units (frame rate in Hz, exposure in
//! milliseconds) and the pixel-clock counts a sensor is programmed with.
//! Everything here is pure arithmetic: register access lives in the
//! sensor bindings, which consult the [`TimingModel`] before writing and
//! after reading back.
//!
//! # Timing relationships
//!
//! ```text
//! row_pixels    = width + horizontal_blank
//! frame_pixels  = (height + vertical_blank) * row_pixels + 4
//! frame_rate_hz = pixel_clock / frame_pixels
//! exposure_ms   = exposure_pixels * 1000 / pixel_clock
//! ```

mod blanking;
mod model;

pub use blanking::BlankingSolution;
pub use model::{
    Blanking, BlankingBounds, ExposureWidth, SensorGeometry, TimingModel, FRAME_OVERHEAD_PIXELS,
    READOUT_OVERHEAD_ROWS,
};

use thiserror::Error;

/// Errors produced by timing conversions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimingError {
    #[error("invalid sensor geometry {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },
    #[error("invalid blanking bounds: horizontal {min_horizontal}..={max_horizontal}, vertical {min_vertical}..={max_vertical}")]
    InvalidBounds {
        min_horizontal: u32,
        max_horizontal: u32,
        min_vertical: u32,
        max_vertical: u32,
    },
    #[error("invalid pixel clock: {0} Hz")]
    InvalidPixelClock(f64),
    #[error("invalid frame rate: {0} Hz")]
    InvalidFrameRate(f64),
    #[error("invalid exposure: {0} ms")]
    InvalidExposure(f64),
    #[error("exposure of {pixels} pixels is shorter than the {minimum} pixel overhead")]
    ExposureTooShort { pixels: u64, minimum: u64 },
    #[error("frame rate {0} Hz leaves no pixel budget")]
    RateTooHigh(f64),
    #[error("no blanking solution for {hz} Hz: vertical blank range {start}..{end} is empty")]
    EmptySearchRange { hz: f64, start: i64, end: i64 },
    #[error("{what} value {value} does not fit in a 32-bit register")]
    RegisterOverflow { what: &'static str, value: u64 },
}
