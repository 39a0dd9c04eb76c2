//! Sensor geometry, blanking bounds and unit conversions.

use super::TimingError;
use serde::{Deserialize, Serialize};

/// Fixed inter-frame overhead, in pixels, added to every frame and exposure.
pub const FRAME_OVERHEAD_PIXELS: u64 = 4;

/// Extra row-times the readout pipeline needs beyond nominal exposure.
pub const READOUT_OVERHEAD_ROWS: u64 = 2;

/// Active image dimensions of a sensor.
///
/// Fixed once a sensor format is selected. Both dimensions are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorGeometry {
    width: u32,
    height: u32,
}

impl SensorGeometry {
    /// Creates a geometry, rejecting zero-sized images.
    pub fn new(width: u32, height: u32) -> Result<Self, TimingError> {
        if width == 0 || height == 0 {
            return Err(TimingError::InvalidGeometry { width, height });
        }
        Ok(Self { width, height })
    }

    /// Active image width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Active image height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of active pixels.
    #[inline]
    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Datasheet limits for the blanking registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlankingBounds {
    /// Minimum horizontal blank in pixels.
    pub min_horizontal: u32,
    /// Maximum horizontal blank in pixels.
    pub max_horizontal: u32,
    /// Minimum vertical blank in rows.
    pub min_vertical: u32,
    /// Maximum vertical blank in rows (register width).
    pub max_vertical: u32,
}

impl Default for BlankingBounds {
    fn default() -> Self {
        Self {
            min_horizontal: 61,
            max_horizontal: 1023,
            min_vertical: 4,
            max_vertical: u32::from(u16::MAX),
        }
    }
}

impl BlankingBounds {
    /// Checks that both ranges are non-empty.
    pub fn validate(&self) -> Result<(), TimingError> {
        if self.min_horizontal > self.max_horizontal || self.min_vertical > self.max_vertical {
            return Err(TimingError::InvalidBounds {
                min_horizontal: self.min_horizontal,
                max_horizontal: self.max_horizontal,
                min_vertical: self.min_vertical,
                max_vertical: self.max_vertical,
            });
        }
        Ok(())
    }
}

/// A horizontal/vertical blanking register pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blanking {
    /// Horizontal blank in pixels per row.
    pub horizontal: u32,
    /// Vertical blank in rows per frame.
    pub vertical: u32,
}

/// Exposure expressed as whole rows plus a remainder in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExposureWidth {
    /// Whole rows.
    pub coarse: u32,
    /// Remaining pixels, always less than one row.
    pub fine: u32,
}

/// Converts between human units and pixel-clock counts for one sensor.
///
/// The pixel clock and geometry are read once when a camera is opened
/// and never change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingModel {
    pixel_clock: f64,
    geometry: SensorGeometry,
    bounds: BlankingBounds,
}

impl TimingModel {
    /// Creates a model for a sensor running at `pixel_clock_hz`.
    pub fn new(
        pixel_clock_hz: f64,
        geometry: SensorGeometry,
        bounds: BlankingBounds,
    ) -> Result<Self, TimingError> {
        if !pixel_clock_hz.is_finite() || pixel_clock_hz <= 0.0 {
            return Err(TimingError::InvalidPixelClock(pixel_clock_hz));
        }
        bounds.validate()?;
        Ok(Self {
            pixel_clock: pixel_clock_hz,
            geometry,
            bounds,
        })
    }

    /// Pixel clock in Hz.
    #[inline]
    pub fn pixel_clock(&self) -> f64 {
        self.pixel_clock
    }

    /// Active image geometry.
    #[inline]
    pub fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    /// Blanking register limits.
    #[inline]
    pub fn bounds(&self) -> BlankingBounds {
        self.bounds
    }

    /// Length of one row in pixels for the given horizontal blank.
    #[inline]
    pub fn row_pixels(&self, horizontal_blank: u32) -> u64 {
        u64::from(self.geometry.width) + u64::from(horizontal_blank)
    }

    /// Duration of one frame in pixels, including the fixed overhead.
    pub fn frame_pixels(&self, blanking: Blanking) -> u64 {
        let rows = u64::from(self.geometry.height) + u64::from(blanking.vertical);
        rows * self.row_pixels(blanking.horizontal) + FRAME_OVERHEAD_PIXELS
    }

    /// Converts an exposure in milliseconds to pixels.
    pub fn exposure_pixels(&self, ms: f64) -> Result<u64, TimingError> {
        if !ms.is_finite() || ms < 0.0 {
            return Err(TimingError::InvalidExposure(ms));
        }
        let pixels = (ms * self.pixel_clock / 1000.0).round();
        if pixels > u64::MAX as f64 {
            return Err(TimingError::InvalidExposure(ms));
        }
        Ok(pixels as u64)
    }

    /// Converts an exposure in pixels to milliseconds.
    pub fn exposure_ms(&self, pixels: u64) -> f64 {
        pixels as f64 * 1000.0 / self.pixel_clock
    }

    /// Splits an exposure into coarse rows and fine pixels.
    ///
    /// The fixed overhead is removed first so that
    /// [`combine_exposure`](Self::combine_exposure) gives back `pixels`.
    /// Exposures shorter than the overhead cannot be programmed.
    pub fn split_exposure(
        &self,
        pixels: u64,
        horizontal_blank: u32,
    ) -> Result<ExposureWidth, TimingError> {
        let programmed = pixels.checked_sub(FRAME_OVERHEAD_PIXELS).ok_or(
            TimingError::ExposureTooShort {
                pixels,
                minimum: FRAME_OVERHEAD_PIXELS,
            },
        )?;
        let row = self.row_pixels(horizontal_blank);

        let coarse = programmed / row;
        let fine = programmed % row;

        Ok(ExposureWidth {
            coarse: u32::try_from(coarse).map_err(|_| TimingError::RegisterOverflow {
                what: "coarse shutter width",
                value: coarse,
            })?,
            fine: u32::try_from(fine).map_err(|_| TimingError::RegisterOverflow {
                what: "fine shutter width",
                value: fine,
            })?,
        })
    }

    /// Recombines coarse and fine widths into an exposure in pixels.
    ///
    /// With `readout_overhead` the two extra readout rows are included.
    /// That form is only for frame-rate feasibility, never for reporting
    /// exposure.
    pub fn combine_exposure(
        &self,
        width: ExposureWidth,
        horizontal_blank: u32,
        readout_overhead: bool,
    ) -> u64 {
        let mut coarse = u64::from(width.coarse);
        if readout_overhead {
            coarse += READOUT_OVERHEAD_ROWS;
        }
        coarse * self.row_pixels(horizontal_blank) + u64::from(width.fine) + FRAME_OVERHEAD_PIXELS
    }

    /// Achievable frame rate given the frame period and the exposure
    /// (with readout overhead), whichever is longer.
    pub fn frame_rate_hz(&self, frame_pixels: u64, exposure_pixels_with_overhead: u64) -> f64 {
        let pixels = frame_pixels.max(exposure_pixels_with_overhead).max(1);
        self.pixel_clock / pixels as f64
    }

    /// Total pixel budget for one frame at `hz`, minus the fixed overhead.
    pub fn pixel_budget(&self, hz: f64) -> Result<u64, TimingError> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(TimingError::InvalidFrameRate(hz));
        }
        let total = (self.pixel_clock / hz).round();
        if total <= FRAME_OVERHEAD_PIXELS as f64 {
            return Err(TimingError::RateTooHigh(hz));
        }
        if total > u64::MAX as f64 {
            return Err(TimingError::InvalidFrameRate(hz));
        }
        Ok(total as u64 - FRAME_OVERHEAD_PIXELS)
    }

    /// True if an exposure is longer than one frame period at `hz`.
    pub fn exposure_exceeds_frame(&self, exposure_pixels: u64, hz: f64) -> bool {
        exposure_pixels as f64 > self.pixel_clock / hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reference_model() -> TimingModel {
        TimingModel::new(
            96_000_000.0,
            SensorGeometry::new(1280, 1024).unwrap(),
            BlankingBounds::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_geometry_rejects_zero() {
        assert!(SensorGeometry::new(0, 480).is_err());
        assert!(SensorGeometry::new(640, 0).is_err());
        assert_eq!(SensorGeometry::new(640, 480).unwrap().pixels(), 307_200);
    }

    #[test]
    fn test_bounds_validation() {
        let bounds = BlankingBounds {
            min_horizontal: 100,
            max_horizontal: 50,
            ..BlankingBounds::default()
        };
        assert!(matches!(
            bounds.validate(),
            Err(TimingError::InvalidBounds { .. })
        ));
        assert!(BlankingBounds::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_pixel_clock() {
        let geometry = SensorGeometry::new(640, 480).unwrap();
        assert!(TimingModel::new(0.0, geometry, BlankingBounds::default()).is_err());
        assert!(TimingModel::new(f64::NAN, geometry, BlankingBounds::default()).is_err());
    }

    #[test]
    fn test_exposure_pixels_scenario() {
        let model = reference_model();
        assert_eq!(model.exposure_pixels(5.0).unwrap(), 480_000);
        assert!(model.exposure_pixels(-1.0).is_err());
        assert!(model.exposure_pixels(f64::INFINITY).is_err());
    }

    #[test]
    fn test_split_and_combine_round_trip() {
        let model = reference_model();
        let width = model.split_exposure(480_000, 61).unwrap();

        assert_eq!(width.coarse, 479_996 / 1341);
        assert_eq!(width.fine, 479_996 % 1341);
        assert!(u64::from(width.fine) < model.row_pixels(61));

        let pixels = model.combine_exposure(width, 61, false);
        assert_eq!(pixels, 480_000);
        assert!((model.exposure_ms(pixels) - 5.0).abs() < 1000.0 / 96_000_000.0);
    }

    #[test]
    fn test_exposure_below_overhead_rejected() {
        let model = reference_model();
        for pixels in 0..FRAME_OVERHEAD_PIXELS {
            assert_eq!(
                model.split_exposure(pixels, 61),
                Err(TimingError::ExposureTooShort {
                    pixels,
                    minimum: FRAME_OVERHEAD_PIXELS,
                })
            );
        }
        let floor = model.split_exposure(FRAME_OVERHEAD_PIXELS, 61).unwrap();
        assert_eq!(floor, ExposureWidth::default());
        assert_eq!(model.combine_exposure(floor, 61, false), FRAME_OVERHEAD_PIXELS);
    }

    #[test]
    fn test_readout_overhead_adds_two_rows() {
        let model = reference_model();
        let width = ExposureWidth {
            coarse: 10,
            fine: 7,
        };
        let nominal = model.combine_exposure(width, 100, false);
        let with_overhead = model.combine_exposure(width, 100, true);
        assert_eq!(with_overhead - nominal, 2 * 1380);
    }

    #[test]
    fn test_frame_rate_capped_by_exposure() {
        let model = reference_model();
        let blanking = Blanking {
            horizontal: 61,
            vertical: 4,
        };
        let frame = model.frame_pixels(blanking);
        assert_eq!(frame, 1028 * 1341 + 4);

        let short = model.frame_rate_hz(frame, 1000);
        assert!((short - 96_000_000.0 / frame as f64).abs() < 1e-9);

        let long = model.frame_rate_hz(frame, frame * 2);
        assert!((long - short / 2.0).abs() < 1e-9);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_exposure_round_trip_within_one_tick(
            clock in 1_000_000u32..200_000_000,
            horizontal_blank in 61u32..=1023,
            ticks in prop_oneof![0.0f64..8.0, 8.0f64..2_000_000.0],
        ) {
            let model = TimingModel::new(
                f64::from(clock),
                SensorGeometry::new(1280, 1024).unwrap(),
                BlankingBounds::default(),
            )
            .unwrap();
            let tick_ms = 1000.0 / f64::from(clock);
            let ms = ticks * tick_ms;

            let pixels = model.exposure_pixels(ms).unwrap();
            match model.split_exposure(pixels, horizontal_blank) {
                Ok(width) => {
                    prop_assert!(u64::from(width.fine) < model.row_pixels(horizontal_blank));
                    let pixels_back = model.combine_exposure(width, horizontal_blank, false);
                    let back = model.exposure_ms(pixels_back);
                    prop_assert!(
                        (back - ms).abs() <= tick_ms,
                        "set {} ms, read {} ms", ms, back
                    );
                }
                Err(TimingError::ExposureTooShort { pixels: short, minimum }) => {
                    prop_assert!(short < minimum);
                    prop_assert_eq!(short, pixels);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }
    }

    #[test]
    fn test_pixel_budget() {
        let model = reference_model();
        assert_eq!(model.pixel_budget(30.0).unwrap(), 3_199_996);
        assert!(matches!(
            model.pixel_budget(0.0),
            Err(TimingError::InvalidFrameRate(_))
        ));
        assert!(matches!(
            model.pixel_budget(96_000_000.0),
            Err(TimingError::RateTooHigh(_))
        ));
    }
}
