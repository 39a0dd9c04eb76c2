//! Metrics collection and registry.

use crate::capture::{Camera, CameraError, TriggerMode};
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of camera state for metrics update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Frames returned by grab.
    pub frames_grabbed: u64,
    /// Grabs that failed.
    pub grab_failures: u64,
    /// Transient grab results retried.
    pub transient_retries: u64,
    /// Register writes issued.
    pub register_writes: u64,
    /// Register writes repeated after a mismatch.
    pub register_retries: u64,
    /// Register writes never applied.
    pub register_failures: u64,
    /// Achievable frame rate, 0 outside timer trigger.
    pub frame_rate_hz: f64,
    /// Exposure in milliseconds.
    pub exposure_ms: f64,
    /// Whether acquisition is running.
    pub streaming: bool,
    /// Active trigger mode.
    pub trigger: Option<TriggerMode>,
}

impl MetricsSnapshot {
    /// Reads counters and current settings from a camera.
    ///
    /// Cameras without exposure control report an exposure of zero.
    pub fn from_camera(camera: &mut dyn Camera) -> Result<Self, CameraError> {
        let stats = camera.stats();
        let exposure_ms = match camera.exposure() {
            Ok(ms) => ms,
            Err(CameraError::Unsupported(_)) => 0.0,
            Err(e) => return Err(e),
        };

        Ok(Self {
            frames_grabbed: stats.frames_grabbed,
            grab_failures: stats.grab_failures,
            transient_retries: stats.transient_retries,
            register_writes: stats.register_writes,
            register_retries: stats.register_retries,
            register_failures: stats.register_failures,
            frame_rate_hz: camera.frame_rate()?,
            exposure_ms,
            streaming: camera.is_streaming(),
            trigger: Some(camera.trigger()),
        })
    }
}

/// Prometheus metrics registry for camera monitoring.
pub struct MetricsRegistry {
    registry: Registry,

    // Acquisition counters
    frames_grabbed: IntCounter,
    grab_failures: IntCounter,
    transient_retries: IntCounter,

    // Register counters
    register_writes: IntCounter,
    register_retries: IntCounter,
    register_failures: IntCounter,

    // Settings
    frame_rate_hz: Gauge,
    exposure_ms: Gauge,
    streaming: IntGauge,
    trigger_mode: IntGauge,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all camera metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let frames_grabbed =
            IntCounter::new("camio_frames_grabbed_total", "Total frames grabbed")?;
        let grab_failures =
            IntCounter::new("camio_grab_failures_total", "Total grabs that failed")?;
        let transient_retries = IntCounter::new(
            "camio_transient_retries_total",
            "Grab attempts retried because the frame was not complete",
        )?;

        let register_writes =
            IntCounter::new("camio_register_writes_total", "Total register writes issued")?;
        let register_retries = IntCounter::new(
            "camio_register_retries_total",
            "Register writes repeated after a read-back mismatch",
        )?;
        let register_failures = IntCounter::new(
            "camio_register_failures_total",
            "Register writes not applied after all attempts",
        )?;

        let frame_rate_hz = Gauge::new(
            "camio_frame_rate_hz",
            "Achievable frame rate in Hz (0 outside timer trigger)",
        )?;
        let exposure_ms = Gauge::new("camio_exposure_ms", "Exposure in milliseconds")?;
        let streaming = IntGauge::new("camio_streaming", "Acquisition running (1) or stopped (0)")?;
        let trigger_mode = IntGauge::new(
            "camio_trigger_mode",
            "Active trigger mode (0=software, 1=timer, 2=external, -1=unknown)",
        )?;

        registry.register(Box::new(frames_grabbed.clone()))?;
        registry.register(Box::new(grab_failures.clone()))?;
        registry.register(Box::new(transient_retries.clone()))?;
        registry.register(Box::new(register_writes.clone()))?;
        registry.register(Box::new(register_retries.clone()))?;
        registry.register(Box::new(register_failures.clone()))?;
        registry.register(Box::new(frame_rate_hz.clone()))?;
        registry.register(Box::new(exposure_ms.clone()))?;
        registry.register(Box::new(streaming.clone()))?;
        registry.register(Box::new(trigger_mode.clone()))?;

        Ok(Self {
            registry,
            frames_grabbed,
            grab_failures,
            transient_retries,
            register_writes,
            register_retries,
            register_failures,
            frame_rate_hz,
            exposure_ms,
            streaming,
            trigger_mode,
        })
    }

    /// Updates all metrics from a snapshot of camera state.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        // Counters only move forward by the difference
        advance(&self.frames_grabbed, snapshot.frames_grabbed);
        advance(&self.grab_failures, snapshot.grab_failures);
        advance(&self.transient_retries, snapshot.transient_retries);
        advance(&self.register_writes, snapshot.register_writes);
        advance(&self.register_retries, snapshot.register_retries);
        advance(&self.register_failures, snapshot.register_failures);

        self.frame_rate_hz.set(snapshot.frame_rate_hz);
        self.exposure_ms.set(snapshot.exposure_ms);
        self.streaming.set(i64::from(snapshot.streaming));
        self.trigger_mode.set(match snapshot.trigger {
            Some(TriggerMode::Software) => 0,
            Some(TriggerMode::Timer) => 1,
            Some(TriggerMode::External) => 2,
            None => -1,
        });
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::DummyCamera;

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();

        let snapshot = MetricsSnapshot {
            frames_grabbed: 12,
            register_writes: 40,
            register_retries: 2,
            frame_rate_hz: 30.0,
            exposure_ms: 5.0,
            streaming: true,
            trigger: Some(TriggerMode::External),
            ..MetricsSnapshot::default()
        };

        registry.update(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains("camio_frames_grabbed_total 12"));
        assert!(output.contains("camio_register_retries_total 2"));
        assert!(output.contains("camio_frame_rate_hz 30"));
        assert!(output.contains("camio_streaming 1"));
        assert!(output.contains("camio_trigger_mode 2"));
    }

    #[test]
    fn test_counters_never_decrease() {
        let registry = MetricsRegistry::new().unwrap();

        registry.update(&MetricsSnapshot {
            frames_grabbed: 10,
            ..MetricsSnapshot::default()
        });
        registry.update(&MetricsSnapshot {
            frames_grabbed: 4,
            ..MetricsSnapshot::default()
        });

        let output = registry.encode().unwrap();
        assert!(output.contains("camio_frames_grabbed_total 10"));
    }

    #[test]
    fn test_snapshot_from_dummy_camera() {
        let mut camera = DummyCamera::new();
        camera.start().unwrap();
        camera.grab().unwrap();

        let snapshot = MetricsSnapshot::from_camera(&mut camera).unwrap();

        assert_eq!(snapshot.frames_grabbed, 1);
        assert_eq!(snapshot.exposure_ms, 0.0);
        assert_eq!(snapshot.frame_rate_hz, 0.0);
        assert!(snapshot.streaming);
        assert_eq!(snapshot.trigger, Some(TriggerMode::Software));
    }

    #[test]
    fn test_metrics_encode() {
        let registry = MetricsRegistry::new().unwrap();
        let output = registry.encode().unwrap();

        assert!(output.contains("camio_frames_grabbed_total"));
        assert!(output.contains("camio_register_failures_total"));
        assert!(output.contains("camio_exposure_ms"));
    }
}
