//! HTTP server exposing camera metrics and health.
//!
//! `/metrics` serves the Prometheus text format. `/health` reports which
//! camera is attached and whether it is streaming, as JSON.

use crate::adapter::CameraHandle;
use crate::capture::TriggerMode;
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

/// Errors that can occur during metrics server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),

    #[error("server error: {0}")]
    Server(String),
}

/// Configuration for the metrics server.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 9090).into(),
        }
    }
}

impl MetricsServerConfig {
    /// Creates a config with a custom port.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], port).into(),
        }
    }
}

/// Acquisition state reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    /// No snapshot has arrived yet.
    Waiting,
    /// The camera is streaming and every register write has landed.
    Streaming,
    /// Acquisition is stopped.
    Stopped,
    /// Streaming, but register writes have failed since opening.
    Degraded,
}

/// Body of the `/health` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Overall acquisition state.
    pub status: CameraStatus,
    /// Camera the exporter was started for.
    pub camera: Option<CameraHandle>,
    /// Trigger mode at the last update.
    pub trigger: Option<TriggerMode>,
    /// Frames grabbed so far.
    pub frames_grabbed: u64,
    /// Grabs that failed so far.
    pub grab_failures: u64,
    /// Register writes never applied.
    pub register_failures: u64,
    /// Time of the last update.
    pub updated: Option<DateTime<Utc>>,
}

impl HealthReport {
    /// HTTP status for the report. Only a camera that never reported is
    /// unavailable.
    pub fn status_code(&self) -> StatusCode {
        match self.status {
            CameraStatus::Waiting => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::OK,
        }
    }
}

/// Shared state for the metrics server.
pub struct MetricsState {
    registry: MetricsRegistry,
    camera: Option<CameraHandle>,
    last: Option<(MetricsSnapshot, DateTime<Utc>)>,
}

impl MetricsState {
    /// Records the camera the metrics describe.
    pub fn attach(&mut self, camera: CameraHandle) {
        tracing::debug!(adapter = %camera.adapter, id = %camera.info.id, "Exporter attached");
        self.camera = Some(camera);
    }

    /// Updates the metrics from a snapshot.
    pub fn update(&mut self, snapshot: &MetricsSnapshot) {
        self.registry.update(snapshot);
        self.last = Some((snapshot.clone(), Utc::now()));
    }

    /// Summarizes the attached camera from the last snapshot.
    pub fn health(&self) -> HealthReport {
        let camera = self.camera.clone();
        let Some((snapshot, updated)) = &self.last else {
            return HealthReport {
                status: CameraStatus::Waiting,
                camera,
                trigger: None,
                frames_grabbed: 0,
                grab_failures: 0,
                register_failures: 0,
                updated: None,
            };
        };

        let status = match (snapshot.streaming, snapshot.register_failures) {
            (false, _) => CameraStatus::Stopped,
            (true, 0) => CameraStatus::Streaming,
            (true, _) => CameraStatus::Degraded,
        };

        HealthReport {
            status,
            camera,
            trigger: snapshot.trigger,
            frames_grabbed: snapshot.frames_grabbed,
            grab_failures: snapshot.grab_failures,
            register_failures: snapshot.register_failures,
            updated: Some(*updated),
        }
    }
}

/// HTTP server for exposing Prometheus metrics.
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: Arc<RwLock<MetricsState>>,
}

impl MetricsServer {
    /// Creates a server with no camera attached.
    pub fn new(config: MetricsServerConfig, registry: MetricsRegistry) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(MetricsState {
                registry,
                camera: None,
                last: None,
            })),
        }
    }

    /// Returns a reference to the shared state for updating metrics.
    pub fn state(&self) -> Arc<RwLock<MetricsState>> {
        Arc::clone(&self.state)
    }

    /// Serves `/metrics` and `/health` until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Metrics server listening");

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Server(e.to_string()))
    }
}

async fn metrics_handler(
    State(state): State<Arc<RwLock<MetricsState>>>,
) -> impl IntoResponse {
    let state = state.read().await;

    match state.registry.encode() {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

async fn health_handler(State(state): State<Arc<RwLock<MetricsState>>>) -> impl IntoResponse {
    let report = state.read().await.health();
    (report.status_code(), Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterId, CameraInfo};

    fn server() -> MetricsServer {
        MetricsServer::new(
            MetricsServerConfig::default(),
            MetricsRegistry::new().unwrap(),
        )
    }

    fn aptina_handle() -> CameraHandle {
        CameraHandle {
            adapter: AdapterId::Aptina,
            info: CameraInfo {
                id: "0x1234".to_owned(),
                name: "MT9M031".to_owned(),
                description: String::new(),
            },
        }
    }

    #[test]
    fn test_config_with_port() {
        assert_eq!(MetricsServerConfig::default().bind_addr.port(), 9090);
        assert_eq!(MetricsServerConfig::with_port(8080).bind_addr.port(), 8080);
    }

    #[tokio::test]
    async fn test_health_waits_for_first_snapshot() {
        let server = server();
        let state = server.state();
        state.write().await.attach(aptina_handle());

        let report = state.read().await.health();
        assert_eq!(report.status, CameraStatus::Waiting);
        assert_eq!(report.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.camera, Some(aptina_handle()));
        assert!(report.updated.is_none());
    }

    #[tokio::test]
    async fn test_health_reports_streaming_camera() {
        let server = server();
        let state = server.state();
        state.write().await.attach(aptina_handle());

        state.write().await.update(&MetricsSnapshot {
            frames_grabbed: 3,
            streaming: true,
            trigger: Some(TriggerMode::Timer),
            ..MetricsSnapshot::default()
        });

        let state = state.read().await;
        let report = state.health();
        assert_eq!(report.status, CameraStatus::Streaming);
        assert_eq!(report.status_code(), StatusCode::OK);
        assert_eq!(report.trigger, Some(TriggerMode::Timer));
        assert_eq!(report.frames_grabbed, 3);
        assert!(report.updated.is_some());
        assert!(state
            .registry
            .encode()
            .unwrap()
            .contains("camio_frames_grabbed_total 3"));
    }

    #[tokio::test]
    async fn test_health_degraded_and_stopped() {
        let server = server();
        let state = server.state();

        state.write().await.update(&MetricsSnapshot {
            streaming: true,
            register_failures: 1,
            ..MetricsSnapshot::default()
        });
        assert_eq!(state.read().await.health().status, CameraStatus::Degraded);

        state.write().await.update(&MetricsSnapshot {
            streaming: false,
            register_failures: 1,
            ..MetricsSnapshot::default()
        });
        assert_eq!(state.read().await.health().status, CameraStatus::Stopped);
    }
}
