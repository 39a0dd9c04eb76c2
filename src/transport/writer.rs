//! Verified register writes with bounded retry.

use super::{RegisterAccess, SideEffect, TransportError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from a register write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// Read-back kept differing from the written value.
    #[error("failed to set '{register}' '{field}' to {expected} after {attempts} attempts (read back {actual:?})")]
    Mismatch {
        register: String,
        field: String,
        expected: u32,
        actual: Option<u32>,
        attempts: u32,
    },
    #[error("register '{register}' '{field}': {source}")]
    Transport {
        register: String,
        field: String,
        #[source]
        source: TransportError,
    },
}

/// Retry policy for verified writes.
///
/// The delay is a blocking sleep after every write, giving the sensor
/// time to settle before the read-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Settle delay after each write.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// A policy without settle delay, for simulated transports.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: Duration::ZERO,
        }
    }
}

/// One register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRequest<'a> {
    /// Register name.
    pub register: &'a str,
    /// Field name, empty for the whole register.
    pub field: &'a str,
    /// Value to write.
    pub value: u32,
    /// Side effect the caller expects the device to report.
    pub expected_effect: SideEffect,
    /// Whether to read the value back and retry on mismatch.
    pub verify: bool,
}

impl<'a> WriteRequest<'a> {
    /// A verified write expecting no side effect.
    pub fn new(register: &'a str, field: &'a str, value: u32) -> Self {
        Self {
            register,
            field,
            value,
            expected_effect: SideEffect::None,
            verify: true,
        }
    }

    /// Sets the side effect the device should report.
    pub fn expecting(mut self, effect: SideEffect) -> Self {
        self.expected_effect = effect;
        self
    }

    /// Skips read-back verification (single attempt).
    pub fn unverified(mut self) -> Self {
        self.verify = false;
        self
    }
}

/// Counters kept by a [`RegisterWriter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Register writes issued to the transport.
    pub writes: u64,
    /// Writes repeated after a failed attempt.
    pub retries: u64,
    /// Requests that ended in an error.
    pub failures: u64,
    /// Writes whose side effect differed from the expectation.
    pub unexpected_effects: u64,
}

/// Issues register writes according to a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RegisterWriter {
    policy: RetryPolicy,
    stats: WriteStats,
}

impl RegisterWriter {
    /// Creates a writer with the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: RetryPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
            stats: WriteStats::default(),
        }
    }

    /// The active retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Counters since creation.
    pub fn stats(&self) -> WriteStats {
        self.stats
    }

    /// Writes a register, optionally verifying it by read-back.
    ///
    /// An unexpected side effect is logged but does not fail the write.
    /// A verified write that succeeds on its final attempt is a success.
    pub fn write<B: RegisterAccess + ?Sized>(
        &mut self,
        bus: &mut B,
        request: WriteRequest<'_>,
    ) -> Result<(), RegisterError> {
        let WriteRequest {
            register,
            field,
            value,
            expected_effect,
            verify,
        } = request;

        let mut last_read = None;
        let mut last_error = None;

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                self.stats.retries += 1;
                tracing::debug!(register, field, value, attempt, "Retrying register write");
            }

            self.stats.writes += 1;
            match bus.set_register(register, field, value) {
                Ok(effect) => {
                    if effect != expected_effect {
                        self.stats.unexpected_effects += 1;
                        tracing::warn!(
                            register,
                            field,
                            effect = %effect,
                            expected = %expected_effect,
                            "Unexpected side effect from register write"
                        );
                    }
                    last_error = None;
                }
                Err(err) => {
                    tracing::warn!(register, field, error = %err, "Failed to set register");
                    last_error = Some(err);
                }
            }

            if !self.policy.delay.is_zero() {
                std::thread::sleep(self.policy.delay);
            }

            if !verify {
                return match last_error {
                    Some(source) => {
                        self.stats.failures += 1;
                        Err(RegisterError::Transport {
                            register: register.to_owned(),
                            field: field.to_owned(),
                            source,
                        })
                    }
                    None => Ok(()),
                };
            }

            match bus.get_register(register, field) {
                Ok(read) if read == value && last_error.is_none() => return Ok(()),
                Ok(read) => last_read = Some(read),
                Err(err) => {
                    tracing::warn!(register, field, error = %err, "Failed to read back register");
                    last_error = Some(err);
                }
            }
        }

        self.stats.failures += 1;
        tracing::error!(
            register,
            field,
            value,
            attempts = self.policy.max_attempts,
            "Register write not applied"
        );

        Err(RegisterError::Mismatch {
            register: register.to_owned(),
            field: field.to_owned(),
            expected: value,
            actual: last_read,
            attempts: self.policy.max_attempts,
        })
    }

    /// Reads a register, wrapping transport failures with its name.
    pub fn read<B: RegisterAccess + ?Sized>(
        &self,
        bus: &mut B,
        register: &str,
        field: &str,
    ) -> Result<u32, RegisterError> {
        bus.get_register(register, field)
            .map_err(|source| RegisterError::Transport {
                register: register.to_owned(),
                field: field.to_owned(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SimulatedSensor, SimulatedSensorConfig};

    fn sensor() -> SimulatedSensor {
        SimulatedSensor::new(SimulatedSensorConfig::default())
    }

    #[test]
    fn test_verified_write_succeeds_first_attempt() {
        let mut bus = sensor();
        let mut writer = RegisterWriter::new(RetryPolicy::immediate(3));

        writer
            .write(&mut bus, WriteRequest::new("vert_blank_contexta_reg", "", 42))
            .unwrap();

        assert_eq!(bus.register("vert_blank_contexta_reg", ""), Some(42));
        assert_eq!(writer.stats().writes, 1);
        assert_eq!(writer.stats().retries, 0);
    }

    #[test]
    fn test_stuck_register_exhausts_retries() {
        let mut bus = sensor();
        bus.stick_register("vert_blank_contexta_reg", "");
        let mut writer = RegisterWriter::new(RetryPolicy::immediate(3));

        let result = writer.write(&mut bus, WriteRequest::new("vert_blank_contexta_reg", "", 42));

        assert!(matches!(
            result,
            Err(RegisterError::Mismatch { attempts: 3, .. })
        ));
        assert_eq!(writer.stats().writes, 3);
        assert_eq!(writer.stats().retries, 2);
        assert_eq!(writer.stats().failures, 1);
    }

    #[test]
    fn test_success_on_final_attempt() {
        let mut bus = sensor();
        bus.ignore_writes("horz_blank_contexta_reg", "", 2);
        let mut writer = RegisterWriter::new(RetryPolicy::immediate(3));

        writer
            .write(&mut bus, WriteRequest::new("horz_blank_contexta_reg", "", 100))
            .unwrap();

        assert_eq!(writer.stats().writes, 3);
        assert_eq!(writer.stats().failures, 0);
    }

    #[test]
    fn test_unexpected_side_effect_is_not_failure() {
        let mut bus = sensor();
        let mut writer = RegisterWriter::new(RetryPolicy::immediate(3));

        // Soft reset reports Pause, but the caller expects nothing.
        writer
            .write(
                &mut bus,
                WriteRequest::new("reset_reg", "soft_reset", 1).unverified(),
            )
            .unwrap();

        assert_eq!(writer.stats().unexpected_effects, 1);
        assert_eq!(writer.stats().failures, 0);
    }

    #[test]
    fn test_expected_side_effect_not_counted() {
        let mut bus = sensor();
        let mut writer = RegisterWriter::new(RetryPolicy::immediate(3));

        writer
            .write(
                &mut bus,
                WriteRequest::new("reset_reg", "soft_reset", 1)
                    .expecting(SideEffect::Pause)
                    .unverified(),
            )
            .unwrap();

        assert_eq!(writer.stats().unexpected_effects, 0);
    }

    #[test]
    fn test_unverified_transport_failure_propagates() {
        let mut bus = sensor();
        bus.fail_register("reset_reg", "soft_reset");
        let mut writer = RegisterWriter::new(RetryPolicy::immediate(3));

        let result = writer.write(
            &mut bus,
            WriteRequest::new("reset_reg", "soft_reset", 1).unverified(),
        );

        assert!(matches!(result, Err(RegisterError::Transport { .. })));
        assert_eq!(writer.stats().writes, 1);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let writer = RegisterWriter::new(RetryPolicy {
            max_attempts: 0,
            delay: Duration::ZERO,
        });
        assert_eq!(writer.policy().max_attempts, 1);
    }
}
