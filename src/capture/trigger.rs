//! Trigger mode state machine.
//!
//! A camera is in exactly one trigger mode. The mode only changes through
//! an explicit [`TriggerState::transition`], and only after the binding's
//! mode-specific setup succeeded.

use super::CameraError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which entity initiates each frame capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Triggered by the controlling software on grab.
    Software,
    /// Triggered by the sensor's internal timer at the frame rate.
    Timer,
    /// Triggered by an external signal (e.g. another camera).
    External,
}

impl std::fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software => write!(f, "software"),
            Self::Timer => write!(f, "timer"),
            Self::External => write!(f, "external"),
        }
    }
}

impl FromStr for TriggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "software" => Ok(Self::Software),
            "timer" => Ok(Self::Timer),
            "external" => Ok(Self::External),
            other => Err(format!("unknown trigger mode '{other}'")),
        }
    }
}

/// Outcome of a trigger transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The target was already active; nothing was programmed.
    Unchanged,
    /// Setup succeeded and the mode was committed.
    Changed {
        /// Previous mode.
        from: TriggerMode,
        /// New mode.
        to: TriggerMode,
    },
}

/// Tracks the active trigger mode of one camera.
#[derive(Debug, Clone)]
pub struct TriggerState {
    current: TriggerMode,
}

impl TriggerState {
    /// Starts in `initial`.
    pub fn new(initial: TriggerMode) -> Self {
        Self { current: initial }
    }

    /// The active mode.
    #[inline]
    pub fn current(&self) -> TriggerMode {
        self.current
    }

    /// Moves to `target`, running `setup` first.
    ///
    /// Same-mode requests return [`Transition::Unchanged`] without calling
    /// `setup`. If `setup` fails the current mode is kept.
    pub fn transition<E, F>(&mut self, target: TriggerMode, setup: F) -> Result<Transition, E>
    where
        F: FnOnce(TriggerMode) -> Result<(), E>,
    {
        if target == self.current {
            return Ok(Transition::Unchanged);
        }

        setup(target)?;

        let from = self.current;
        self.current = target;
        tracing::info!(%from, to = %target, "Trigger mode changed");
        Ok(Transition::Changed { from, to: target })
    }

    /// Fails unless `required` is the active mode.
    pub fn require(&self, required: TriggerMode) -> Result<(), CameraError> {
        if self.current != required {
            return Err(CameraError::TriggerRequired {
                required,
                current: self.current,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_mode_skips_setup() {
        let mut state = TriggerState::new(TriggerMode::Timer);
        let mut calls = 0;

        let result = state.transition(TriggerMode::Timer, |_| -> Result<(), ()> {
            calls += 1;
            Ok(())
        });

        assert_eq!(result, Ok(Transition::Unchanged));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_commit_after_setup() {
        let mut state = TriggerState::new(TriggerMode::Timer);

        let result = state.transition(TriggerMode::External, |_| Ok::<(), ()>(()));

        assert_eq!(
            result,
            Ok(Transition::Changed {
                from: TriggerMode::Timer,
                to: TriggerMode::External
            })
        );
        assert_eq!(state.current(), TriggerMode::External);
    }

    #[test]
    fn test_failed_setup_keeps_mode() {
        let mut state = TriggerState::new(TriggerMode::Timer);

        let result = state.transition(TriggerMode::Software, |_| Err("not supported"));

        assert_eq!(result, Err("not supported"));
        assert_eq!(state.current(), TriggerMode::Timer);
    }

    #[test]
    fn test_require() {
        let state = TriggerState::new(TriggerMode::External);
        assert!(state.require(TriggerMode::External).is_ok());
        assert!(matches!(
            state.require(TriggerMode::Timer),
            Err(CameraError::TriggerRequired {
                required: TriggerMode::Timer,
                current: TriggerMode::External
            })
        ));
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("Timer".parse::<TriggerMode>(), Ok(TriggerMode::Timer));
        assert_eq!(TriggerMode::External.to_string(), "external");
        assert!("sometimes".parse::<TriggerMode>().is_err());
    }
}
