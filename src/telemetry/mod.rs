//! Telemetry - Per-Pipeline Reporting Snapshot
//!
//! ## Responsibilities
//!
//! - Collect lock-free counters from the ingestion loop and scoring task
//! - Recompute fps / bandwidth once per reporting tick (~1 Hz)
//! - Serve a pull-only snapshot to the web API
//!
//! The bandwidth figure is a proxy derived from decoded frame size
//! (`bytes x fps x 8 / 1e6` Mbps), not a measurement of network traffic.

use crate::models::FrameSize;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Snapshot served by `/meta/:camera_id`
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    /// Latest importance score, [0,1]
    pub score: f32,
    /// Frames ingested during the last reporting tick
    pub fps: u32,
    /// Estimated bandwidth in Mbps (decoded-size proxy)
    pub bandwidth: f64,
    /// Resolution last pushed to the camera, e.g. "1280x720"
    pub resolution: Option<String>,
    /// Stream source URL
    pub url: String,
    /// Size of the most recently decoded frame
    pub frame_size: Option<String>,
    /// Whether recording is currently enabled
    pub recording: bool,
    /// Whether the recorder failed and disabled itself
    pub recording_failed: bool,
}

/// TelemetryService instance
pub struct TelemetryService {
    url: String,
    frames_this_tick: AtomicU64,
    last_frame_bytes: AtomicU64,
    frame_width: AtomicU32,
    frame_height: AtomicU32,
    score_bits: AtomicU32,
    recording_failed: AtomicBool,
    snapshot: RwLock<TelemetrySnapshot>,
}

impl TelemetryService {
    /// Create new TelemetryService for one pipeline
    pub fn new(url: String) -> Self {
        let snapshot = TelemetrySnapshot {
            score: 0.0,
            fps: 0,
            bandwidth: 0.0,
            resolution: None,
            url: url.clone(),
            frame_size: None,
            recording: false,
            recording_failed: false,
        };
        Self {
            url,
            frames_this_tick: AtomicU64::new(0),
            last_frame_bytes: AtomicU64::new(0),
            frame_width: AtomicU32::new(0),
            frame_height: AtomicU32::new(0),
            score_bits: AtomicU32::new(0.0f32.to_bits()),
            recording_failed: AtomicBool::new(false),
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Record one ingested frame (called from the ingestion thread)
    pub fn observe_frame(&self, bytes: usize, size: FrameSize) {
        self.frames_this_tick.fetch_add(1, Ordering::Relaxed);
        self.last_frame_bytes.store(bytes as u64, Ordering::Relaxed);
        self.frame_width.store(size.width, Ordering::Relaxed);
        self.frame_height.store(size.height, Ordering::Relaxed);
    }

    /// Record the latest importance score (called from the scoring task)
    pub fn set_score(&self, score: f32) {
        self.score_bits.store(score.to_bits(), Ordering::Relaxed);
    }

    pub fn set_recording_failed(&self, failed: bool) {
        self.recording_failed.store(failed, Ordering::Relaxed);
    }

    pub fn recording_failed(&self) -> bool {
        self.recording_failed.load(Ordering::Relaxed)
    }

    /// Recompute the published snapshot. Called once per reporting tick;
    /// resets the frame counter so the count IS the fps at a 1 s cadence.
    pub async fn tick(&self, applied_resolution: Option<FrameSize>, recording: bool) {
        let fps = self.frames_this_tick.swap(0, Ordering::Relaxed) as u32;
        let last_bytes = self.last_frame_bytes.load(Ordering::Relaxed);
        let bandwidth = bandwidth_mbps(last_bytes, fps);

        let width = self.frame_width.load(Ordering::Relaxed);
        let height = self.frame_height.load(Ordering::Relaxed);
        let frame_size = (width > 0 && height > 0).then(|| FrameSize::new(width, height));

        let next = TelemetrySnapshot {
            score: f32::from_bits(self.score_bits.load(Ordering::Relaxed)),
            fps,
            bandwidth,
            resolution: applied_resolution.map(|r| r.to_string()),
            url: self.url.clone(),
            frame_size: frame_size.map(|s| s.to_string()),
            recording,
            recording_failed: self.recording_failed(),
        };

        *self.snapshot.write().await = next;
    }

    /// Current snapshot (pull-only, never blocks producers)
    pub async fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot.read().await.clone()
    }
}

/// bytes x fps x 8 / 1e6
fn bandwidth_mbps(last_frame_bytes: u64, fps: u32) -> f64 {
    (last_frame_bytes as f64) * (fps as f64) * 8.0 / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bandwidth_formula() {
        // 100 kB frames at 20 fps -> 16 Mbps
        assert!((bandwidth_mbps(100_000, 20) - 16.0).abs() < f64::EPSILON);
        assert_eq!(bandwidth_mbps(0, 20), 0.0);
        assert_eq!(bandwidth_mbps(100_000, 0), 0.0);
    }

    #[tokio::test]
    async fn test_tick_resets_frame_counter() {
        let telemetry = TelemetryService::new("http://cam/video".into());
        for _ in 0..15 {
            telemetry.observe_frame(50_000, FrameSize::new(640, 480));
        }

        telemetry.tick(Some(FrameSize::new(1280, 720)), true).await;
        let snap = telemetry.snapshot().await;
        assert_eq!(snap.fps, 15);
        assert_eq!(snap.resolution.as_deref(), Some("1280x720"));
        assert_eq!(snap.frame_size.as_deref(), Some("640x480"));
        assert!(snap.recording);

        // next tick with no frames observed
        telemetry.tick(None, false).await;
        assert_eq!(telemetry.snapshot().await.fps, 0);
    }
}
