//! CameraClient - Remote Camera Settings Adapter
//!
//! ## Responsibilities
//!
//! - Translate (setting, value) into idempotent GET requests against the
//!   camera's settings endpoint
//! - Clamp quality values to the wire-legal range before sending
//!
//! The client is stateless besides its base URL; tracking of what was last
//! applied belongs to the adaptive controller.

use crate::error::Result;
use crate::models::FrameSize;
use std::future::Future;
use std::time::Duration;

/// Request timeout. A timed-out call fails that command only; the caller
/// retries on its own cadence.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How much of the remote response body is retained for logging
const BODY_PREFIX_LEN: usize = 120;

/// Result of one settings command
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Remote HTTP status code
    pub status: u16,
    /// Truncated response body, informational only, never parsed for
    /// control flow
    pub body_prefix: String,
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Remote settings operations, seam for the adaptive controller
pub trait CameraControl: Send + Sync {
    fn set_resolution(
        &self,
        size: FrameSize,
    ) -> impl Future<Output = Result<CommandOutcome>> + Send;

    fn set_quality(&self, quality: i32) -> impl Future<Output = Result<CommandOutcome>> + Send;
}

/// CameraClient instance
pub struct CameraClient {
    client: reqwest::Client,
    base_url: String,
}

impl CameraClient {
    /// Create new CameraClient
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    async fn send_setting(&self, setting: &str, value: &str) -> Result<CommandOutcome> {
        let url = format!("{}/settings/{}?set={}", self.base_url, setting, value);

        let resp = self.client.get(&url).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let body_prefix: String = body.chars().take(BODY_PREFIX_LEN).collect();

        tracing::debug!(
            setting = setting,
            value = value,
            status = status,
            body = %body_prefix,
            "Camera setting pushed"
        );

        Ok(CommandOutcome {
            status,
            body_prefix,
        })
    }
}

impl CameraControl for CameraClient {
    async fn set_resolution(&self, size: FrameSize) -> Result<CommandOutcome> {
        self.send_setting("video_size", &size.to_string()).await
    }

    async fn set_quality(&self, quality: i32) -> Result<CommandOutcome> {
        // Wire contract: out-of-range values must never reach the camera
        let clamped = quality.clamp(0, 100);
        self.send_setting("jpeg_quality", &clamped.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Spin up a loopback camera that records every `set` value it receives
    async fn fake_camera() -> (String, Arc<Mutex<Vec<(String, String)>>>) {
        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));

        let record = |setting: &'static str, seen: Arc<Mutex<Vec<(String, String)>>>| {
            get(move |Query(params): Query<HashMap<String, String>>| async move {
                let value = params.get("set").cloned().unwrap_or_default();
                seen.lock().unwrap().push((setting.to_string(), value));
                "OK"
            })
        };

        let app = Router::new()
            .route("/settings/video_size", record("video_size", seen.clone()))
            .route("/settings/jpeg_quality", record("jpeg_quality", seen.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), seen)
    }

    #[tokio::test]
    async fn test_set_resolution_encodes_wxh() {
        let (base_url, seen) = fake_camera().await;
        let client = CameraClient::new(base_url);

        let outcome = client
            .set_resolution(FrameSize::new(1280, 720))
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.body_prefix, "OK");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], ("video_size".to_string(), "1280x720".to_string()));
    }

    #[tokio::test]
    async fn test_quality_clamped_before_wire() {
        let (base_url, seen) = fake_camera().await;
        let client = CameraClient::new(base_url);

        for requested in [-1000, -1, 0, 50, 100, 101, 1000] {
            client.set_quality(requested).await.unwrap();
        }

        let seen = seen.lock().unwrap();
        let sent: Vec<i32> = seen.iter().map(|(_, v)| v.parse().unwrap()).collect();
        assert_eq!(sent, vec![0, 0, 0, 50, 100, 100, 100]);
        assert!(sent.iter().all(|q| (0..=100).contains(q)));
    }

    #[tokio::test]
    async fn test_unreachable_camera_is_an_error_not_a_panic() {
        // Nothing listens here; the call must come back as Err for the
        // controller to retry later.
        let client = CameraClient::new("http://127.0.0.1:1".to_string());
        assert!(client.set_resolution(FrameSize::new(640, 480)).await.is_err());
    }
}
