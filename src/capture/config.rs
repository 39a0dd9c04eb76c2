//! Camera and sensor configuration.
//!
//! Settings are read from a TOML file at startup. Every section is
//! optional and falls back to defaults that match the reference sensor.

use crate::adapter::AdapterId;
use crate::capture::TriggerMode;
use crate::timing::BlankingBounds;
use crate::transport::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which camera to open and how to set it up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Adapter the camera belongs to.
    pub adapter: AdapterId,
    /// Camera id within the adapter; the first camera if unset.
    pub id: Option<String>,
    /// Trigger mode applied after opening.
    pub trigger: TriggerMode,
    /// Exposure applied after opening, in milliseconds.
    pub exposure_ms: Option<f64>,
    /// Frame rate applied after opening, in Hz (timer trigger only).
    pub frame_rate_hz: Option<f64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterId::Dummy,
            id: None,
            trigger: TriggerMode::Timer,
            exposure_ms: None,
            frame_rate_hz: None,
        }
    }
}

impl CameraConfig {
    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ms) = self.exposure_ms {
            if !ms.is_finite() || ms <= 0.0 {
                return Err(ConfigError::InvalidExposure);
            }
        }
        if let Some(hz) = self.frame_rate_hz {
            if !hz.is_finite() || hz <= 0.0 {
                return Err(ConfigError::InvalidFrameRate);
            }
        }
        Ok(())
    }
}

/// Datasheet constants of a register-level sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Minimum horizontal blank in pixels.
    pub min_horizontal_blank: u32,
    /// Maximum horizontal blank in pixels.
    pub max_horizontal_blank: u32,
    /// Minimum vertical blank in rows.
    pub min_vertical_blank: u32,
    /// Maximum vertical blank in rows.
    pub max_vertical_blank: u32,
    /// Vendor image format name.
    pub image_format: String,
    /// Extra trailing bytes the transport may write past the image.
    pub frame_padding: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        let bounds = BlankingBounds::default();
        Self {
            min_horizontal_blank: bounds.min_horizontal,
            max_horizontal_blank: bounds.max_horizontal,
            min_vertical_blank: bounds.min_vertical,
            max_vertical_blank: bounds.max_vertical,
            image_format: "BAYER-8".to_owned(),
            frame_padding: 512,
        }
    }
}

impl SensorConfig {
    /// Blanking register limits.
    pub fn bounds(&self) -> BlankingBounds {
        BlankingBounds {
            min_horizontal: self.min_horizontal_blank,
            max_horizontal: self.max_horizontal_blank,
            min_vertical: self.min_vertical_blank,
            max_vertical: self.max_vertical_blank,
        }
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bounds()
            .validate()
            .map_err(|e| ConfigError::InvalidBlanking(e.to_string()))?;
        if self.image_format.is_empty() {
            return Err(ConfigError::InvalidImageFormat);
        }
        Ok(())
    }
}

/// Register write retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterConfig {
    /// Total write attempts before giving up.
    pub max_attempts: u32,
    /// Settle delay after each write, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            retry_delay_ms: policy.delay.as_millis() as u64,
        }
    }
}

impl RegisterConfig {
    /// The retry policy described by this section.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry);
        }
        Ok(())
    }
}

/// Metrics exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Metrics server port (0 to disable).
    pub port: u16,
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid exposure time (must be positive)")]
    InvalidExposure,
    #[error("invalid frame rate (must be positive)")]
    InvalidFrameRate,
    #[error("invalid blanking limits: {0}")]
    InvalidBlanking(String),
    #[error("image format must not be empty")]
    InvalidImageFormat,
    #[error("register writes need at least one attempt")]
    InvalidRetry,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub registers: RegisterConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.camera.validate()?;
        self.sensor.validate()?;
        self.registers.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = FileConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registers.retry_policy(), RetryPolicy::default());
        assert_eq!(config.sensor.bounds(), BlankingBounds::default());
    }

    #[test]
    fn test_parse_partial_file() {
        let config = FileConfig::from_toml(
            r#"
            [camera]
            adapter = "aptina"
            trigger = "external"
            exposure_ms = 5.0

            [registers]
            retry_delay_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.camera.adapter, AdapterId::Aptina);
        assert_eq!(config.camera.trigger, TriggerMode::External);
        assert_eq!(config.camera.exposure_ms, Some(5.0));
        assert_eq!(config.registers.max_attempts, 3);
        assert_eq!(config.registers.retry_policy().delay, Duration::ZERO);
        assert_eq!(config.sensor.frame_padding, 512);
    }

    #[test]
    fn test_inverted_blanking_invalid() {
        let result = FileConfig::from_toml(
            r#"
            [sensor]
            min_horizontal_blank = 500
            max_horizontal_blank = 100
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidBlanking(_))));
    }

    #[test]
    fn test_negative_rate_invalid() {
        let mut config = CameraConfig::default();
        config.frame_rate_hz = Some(-1.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFrameRate)
        ));
    }

    #[test]
    fn test_zero_attempts_invalid() {
        let result = FileConfig::from_toml("[registers]\nmax_attempts = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidRetry)));
    }

    #[test]
    fn test_parse_error() {
        let result = FileConfig::from_toml("[camera]\nadapter = \"webcam\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
