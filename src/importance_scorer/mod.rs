//! ImportanceScorer - Scoring Sidecar Adapter
//!
//! ## Responsibilities
//!
//! - Send sampled frames to the scoring sidecar
//! - Normalize its answer into an [`ImportanceSample`] in [0,1]
//!
//! The sidecar is a black box (a detection model lives behind it); this
//! module only owns the interface. Anything that prevents a usable score
//! (sidecar down, timeout, malformed body) is "no sample this tick", never
//! an error that could stop the control loop.

use crate::error::Result;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// One importance observation
#[derive(Debug, Clone, Copy)]
pub struct ImportanceSample {
    /// Normalized importance, [0,1]
    pub score: f32,
    /// When the sample was produced
    pub observed_at: DateTime<Utc>,
}

/// Scoring oracle seam
pub trait ImportanceScorer: Send + Sync {
    /// Score one JPEG frame. `Ok(None)` means no sample is available this
    /// tick; the controller holds its state and tries again later.
    fn score(
        &self,
        camera_id: &str,
        jpeg: &[u8],
    ) -> impl Future<Output = Result<Option<ImportanceSample>>> + Send;
}

/// Sidecar response body
#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f32,
}

/// HTTP scoring sidecar client
pub struct SidecarScorer {
    client: reqwest::Client,
    base_url: String,
}

impl SidecarScorer {
    /// Create new SidecarScorer
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// Create new SidecarScorer with custom timeout
    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Check sidecar health
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

impl ImportanceScorer for SidecarScorer {
    async fn score(&self, camera_id: &str, jpeg: &[u8]) -> Result<Option<ImportanceSample>> {
        let url = format!("{}/v1/score", self.base_url);

        let form = Form::new()
            .part(
                "frame",
                Part::bytes(jpeg.to_vec())
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")?,
            )
            .text("camera_id", camera_id.to_string());

        let resp = match self.client.post(&url).multipart(form).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!(camera_id = %camera_id, error = %e, "Scorer unreachable");
                return Ok(None);
            }
        };

        if !resp.status().is_success() {
            tracing::debug!(
                camera_id = %camera_id,
                status = %resp.status(),
                "Scorer returned non-success"
            );
            return Ok(None);
        }

        match resp.json::<ScoreResponse>().await {
            Ok(body) => Ok(normalize_score(body.score).map(|score| ImportanceSample {
                score,
                observed_at: Utc::now(),
            })),
            Err(e) => {
                tracing::debug!(camera_id = %camera_id, error = %e, "Scorer response malformed");
                Ok(None)
            }
        }
    }
}

/// Clamp into [0,1]; a non-finite score is no sample at all.
fn normalize_score(raw: f32) -> Option<f32> {
    if !raw.is_finite() {
        return None;
    }
    Some(raw.clamp(0.0, 1.0))
}
