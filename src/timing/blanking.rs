//! Blanking selection for a requested frame rate.
//!
//! The frame period `(width + h) * (height + v)` is a hyperbola in the
//! blanking pair, and both registers are integral, so an exact solution
//! rarely exists. The search walks every admissible vertical blank, picks
//! the nearest horizontal blank for it and keeps the pair closest to the
//! target pixel budget.

use super::model::{Blanking, TimingModel};
use super::TimingError;
use std::ops::Range;

/// Result of a blanking search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlankingSolution {
    /// Chosen blanking pair.
    pub blanking: Blanking,
    /// Pixel budget the search aimed for (fixed overhead excluded).
    pub target_pixels: u64,
    /// `(width + h) * (height + v)` for the chosen pair.
    pub achieved_pixels: u64,
    /// Absolute difference between target and achieved pixels.
    pub error: u64,
    /// Number of vertical blanks evaluated.
    pub candidates: u64,
}

impl TimingModel {
    /// Vertical blank values worth searching for a pixel budget.
    ///
    /// Derived from the hyperbola at the two horizontal extremes and
    /// clamped to the vertical register limits. The upper end is exclusive.
    pub fn vertical_search_range(&self, target_pixels: u64) -> Range<i64> {
        let geometry = self.geometry();
        let bounds = self.bounds();

        let pixels = target_pixels as f64;
        let width = f64::from(geometry.width());
        let height = f64::from(geometry.height());

        let v_min = (pixels / (width + f64::from(bounds.max_horizontal)) - height).ceil() as i64;
        let v_max = (pixels / (width + f64::from(bounds.min_horizontal)) - height).floor() as i64;

        let start = v_min.max(i64::from(bounds.min_vertical));
        let end = v_max.min(i64::from(bounds.max_vertical) + 1);
        start..end
    }

    /// Finds the blanking pair whose frame period best matches `hz`.
    ///
    /// Ties keep the smallest vertical blank. An empty search range is an
    /// error; no pair is ever returned that was not evaluated.
    pub fn solve_blanking(&self, hz: f64) -> Result<BlankingSolution, TimingError> {
        let target = self.pixel_budget(hz)?;
        let range = self.vertical_search_range(target);

        let geometry = self.geometry();
        let bounds = self.bounds();
        let width = i64::from(geometry.width());
        let height = i64::from(geometry.height());
        let target_signed = i64::try_from(target).map_err(|_| TimingError::RegisterOverflow {
            what: "frame pixel budget",
            value: target,
        })?;

        let mut best: Option<BlankingSolution> = None;
        let mut best_error = target;
        let mut candidates = 0u64;

        for v in range.clone() {
            candidates += 1;
            let rows = height + v;
            let h = (target as f64 / rows as f64 - width as f64).round() as i64;
            let h = h.clamp(
                i64::from(bounds.min_horizontal),
                i64::from(bounds.max_horizontal),
            );
            let achieved = (width + h) * rows;
            let error = (target_signed - achieved).unsigned_abs();

            if error < best_error {
                best_error = error;
                best = Some(BlankingSolution {
                    blanking: Blanking {
                        horizontal: register_value("horizontal blank", h)?,
                        vertical: register_value("vertical blank", v)?,
                    },
                    target_pixels: target,
                    achieved_pixels: achieved.unsigned_abs(),
                    error,
                    candidates: 0,
                });
            }
        }

        let mut solution = best.ok_or(TimingError::EmptySearchRange {
            hz,
            start: range.start,
            end: range.end,
        })?;
        solution.candidates = candidates;

        tracing::debug!(
            hz,
            target = solution.target_pixels,
            horizontal = solution.blanking.horizontal,
            vertical = solution.blanking.vertical,
            error = solution.error,
            candidates,
            "Blanking solution found"
        );

        Ok(solution)
    }
}

fn register_value(what: &'static str, value: i64) -> Result<u32, TimingError> {
    u32::try_from(value).map_err(|_| TimingError::RegisterOverflow {
        what,
        value: value.unsigned_abs(),
    })
}
