//! Application state
//!
//! Holds the process configuration and the per-camera pipeline registry.
//! Every pipeline owns its own session and controller state; nothing here
//! is shared between cameras beyond the config values they start from.

use crate::error::{Error, Result};
use crate::importance_scorer::SidecarScorer;
use crate::pipeline::{CameraConfig, Pipeline};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Directory recording files are written into
    pub recordings_dir: PathBuf,
    /// Scoring sidecar base URL (optional; without it the control loop is idle)
    pub scorer_url: Option<String>,
    /// Scoring cadence, decimated relative to frame rate
    pub score_interval: Duration,
    /// Minimum time between two accepted remote configuration changes
    pub cooldown: Duration,
    /// Fixed backoff between capture reconnect attempts
    pub reconnect_backoff: Duration,
    /// Camera feeds, one pipeline each
    pub cameras: Vec<CameraConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            recordings_dir: std::env::var("RECORDINGS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/edgecam/recordings")),
            scorer_url: std::env::var("SCORER_URL").ok(),
            score_interval: Duration::from_millis(
                std::env::var("SCORE_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
            cooldown: Duration::from_secs(
                std::env::var("COOLDOWN_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3),
            ),
            reconnect_backoff: Duration::from_millis(
                std::env::var("RECONNECT_BACKOFF_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
            ),
            cameras: cameras_from_env(),
        }
    }
}

/// Camera set: either a `CAMERAS_JSON` array
/// (`[{"camera_id": "...", "stream_url": "...", "control_url": "..."}]`)
/// or the single-camera `STREAM_URL` / `CAMERA_API_URL` / `CAMERA_ID` vars.
fn cameras_from_env() -> Vec<CameraConfig> {
    if let Ok(raw) = std::env::var("CAMERAS_JSON") {
        match serde_json::from_str::<Vec<CameraConfig>>(&raw) {
            Ok(cameras) => return cameras,
            Err(e) => {
                tracing::error!(error = %e, "CAMERAS_JSON is not valid, ignoring it");
            }
        }
    }

    match std::env::var("STREAM_URL") {
        Ok(stream_url) => vec![CameraConfig {
            camera_id: std::env::var("CAMERA_ID").unwrap_or_else(|_| "cam1".to_string()),
            stream_url,
            control_url: std::env::var("CAMERA_API_URL").ok(),
        }],
        Err(_) => Vec::new(),
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// One running pipeline per camera
    pub pipelines: Arc<HashMap<String, Arc<Pipeline>>>,
    /// Scoring sidecar handle (health checks)
    pub scorer: Option<Arc<SidecarScorer>>,
}

impl AppState {
    /// Look up a pipeline by camera id
    pub fn pipeline(&self, camera_id: &str) -> Result<Arc<Pipeline>> {
        self.pipelines
            .get(camera_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("camera {}", camera_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cameras_json_parses() {
        let raw = r#"[
            {"camera_id": "front", "stream_url": "rtsp://10.0.0.2/main",
             "control_url": "http://10.0.0.2:8080"},
            {"camera_id": "yard", "stream_url": "http://10.0.0.3:8081/video",
             "control_url": null}
        ]"#;
        let cameras: Vec<CameraConfig> = serde_json::from_str(raw).unwrap();
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].camera_id, "front");
        assert!(cameras[1].control_url.is_none());
    }
}
