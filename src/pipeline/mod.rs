//! Pipeline - Per-Camera Composition
//!
//! ## Responsibilities
//!
//! - Own every moving part of one camera feed: capture source, fan-out,
//!   frame hub, telemetry, adaptive controller, scorer handle
//! - Run the ingestion thread and the decimated scoring / telemetry tasks
//! - Orderly shutdown: signal, join, flush the recorder
//!
//! One pipeline per camera, zero shared state between pipelines. The
//! ingestion loop runs on a dedicated OS thread because the decode handle
//! is a blocking child-process pipe; everything else is a tokio task. All
//! loops observe the pipeline's shutdown flag at their suspension points.

use crate::adaptive_controller::{AdaptiveController, ControllerTuning};
use crate::camera_client::CameraClient;
use crate::capture_source::{
    CaptureSource, DecoderFactory, FfmpegDecoderFactory, Frame,
};
use crate::error::{Error, Result};
use crate::frame_fanout::{FfmpegRecordingBackend, FrameFanout, RecordingBackend};
use crate::frame_hub::FrameHub;
use crate::importance_scorer::{ImportanceScorer, SidecarScorer};
use crate::telemetry::{TelemetryService, TelemetrySnapshot};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Static description of one camera feed
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CameraConfig {
    /// Identifier used in routes and recording file names
    pub camera_id: String,
    /// Stream source URL (RTSP or HTTP/MJPEG)
    pub stream_url: String,
    /// Base URL of the camera's settings API; without it the feed is
    /// ingested but never remotely tuned
    pub control_url: Option<String>,
}

/// Knobs shared by every pipeline of one process
#[derive(Clone)]
pub struct PipelineSettings {
    pub recordings_dir: PathBuf,
    pub scorer: Option<Arc<SidecarScorer>>,
    pub tuning: ControllerTuning,
    pub reconnect_backoff: Duration,
    pub score_interval: Duration,
}

/// Pipeline instance
pub struct Pipeline {
    camera_id: String,
    stream_url: String,
    hub: Arc<FrameHub>,
    telemetry: Arc<TelemetryService>,
    recording_enabled: Arc<AtomicBool>,
    controller: Option<Arc<AdaptiveController<CameraClient>>>,
    shutdown: Arc<AtomicBool>,
    ingest_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Pipeline {
    /// Open the capture source and start all loops for one camera.
    ///
    /// Failure to open the initial decode handle is fatal here: it means
    /// the configured URL is wrong, and the operator should know at startup
    /// rather than from a silent retry loop.
    pub async fn start(config: CameraConfig, settings: PipelineSettings) -> Result<Arc<Self>> {
        let CameraConfig {
            camera_id,
            stream_url,
            control_url,
        } = config;

        let backoff = settings.reconnect_backoff;
        let source = {
            let url = stream_url.clone();
            tokio::task::spawn_blocking(move || {
                CaptureSource::connect(FfmpegDecoderFactory, &url, backoff)
            })
            .await
            .map_err(|e| Error::Internal(format!("capture connect task failed: {}", e)))??
        };

        let hub = Arc::new(FrameHub::new());
        let telemetry = Arc::new(TelemetryService::new(stream_url.clone()));
        let recording_enabled = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        let controller = control_url.map(|base_url| {
            Arc::new(AdaptiveController::new(
                Arc::new(CameraClient::new(base_url)),
                settings.tuning.clone(),
            ))
        });

        let fanout = FrameFanout::new(
            camera_id.clone(),
            FfmpegRecordingBackend,
            settings.recordings_dir.clone(),
            recording_enabled.clone(),
            hub.clone(),
            telemetry.clone(),
        );

        let pipeline = Arc::new(Self {
            camera_id: camera_id.clone(),
            stream_url,
            hub,
            telemetry,
            recording_enabled,
            controller,
            shutdown,
            ingest_handle: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        pipeline.spawn_ingest_thread(source, fanout)?;
        pipeline.spawn_scoring_task(settings.scorer.clone(), settings.score_interval);
        pipeline.spawn_telemetry_task();

        tracing::info!(
            camera_id = %camera_id,
            controller = pipeline.controller.is_some(),
            scorer = settings.scorer.is_some(),
            "Pipeline started"
        );

        Ok(pipeline)
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    /// Flip the recording toggle, returning the new state. Idempotent in
    /// the sense that re-applying a state is harmless: the fan-out opens or
    /// closes sessions only on actual transitions.
    pub fn toggle_recording(&self) -> bool {
        let was = self.recording_enabled.fetch_xor(true, Ordering::Relaxed);
        let now = !was;
        tracing::info!(camera_id = %self.camera_id, enabled = now, "Recording toggled");
        now
    }

    pub fn recording_enabled(&self) -> bool {
        self.recording_enabled.load(Ordering::Relaxed)
    }

    /// Latest-frame subscription for one live viewer
    pub fn subscribe_frames(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.hub.subscribe()
    }

    pub async fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot().await
    }

    /// Signal every loop, join the ingestion thread (which flushes any open
    /// recording session on its way out), then wait for the tasks.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);

        let handle = self.ingest_handle.lock().expect("ingest handle lock").take();
        if let Some(handle) = handle {
            let camera_id = self.camera_id.clone();
            let _ = tokio::task::spawn_blocking(move || {
                if handle.join().is_err() {
                    tracing::error!(camera_id = %camera_id, "Ingestion thread panicked");
                }
            })
            .await;
        }

        let tasks: Vec<_> = self.tasks.lock().expect("task list lock").drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        tracing::info!(camera_id = %self.camera_id, "Pipeline stopped");
    }

    fn spawn_ingest_thread<F, B>(
        &self,
        source: CaptureSource<F>,
        fanout: FrameFanout<B>,
    ) -> Result<()>
    where
        F: DecoderFactory + 'static,
        B: RecordingBackend + 'static,
    {
        let shutdown = self.shutdown.clone();
        let camera_id = self.camera_id.clone();

        let handle = std::thread::Builder::new()
            .name(format!("ingest-{}", camera_id))
            .spawn(move || ingest_loop(source, fanout, shutdown, camera_id))
            .map_err(|e| Error::Internal(format!("ingestion thread spawn failed: {}", e)))?;

        *self.ingest_handle.lock().expect("ingest handle lock") = Some(handle);
        Ok(())
    }

    fn spawn_scoring_task(&self, scorer: Option<Arc<SidecarScorer>>, interval: Duration) {
        let Some(scorer) = scorer else {
            tracing::info!(camera_id = %self.camera_id, "No scorer configured, control loop idle");
            return;
        };
        let Some(controller) = self.controller.clone() else {
            tracing::info!(camera_id = %self.camera_id, "No control URL configured, control loop idle");
            return;
        };

        let hub = self.hub.clone();
        let telemetry = self.telemetry.clone();
        let shutdown = self.shutdown.clone();
        let camera_id = self.camera_id.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                // decimation: only ever the latest frame, at our own cadence
                let Some(frame) = hub.latest() else {
                    continue;
                };

                match scorer.score(&camera_id, &frame.jpeg).await {
                    Ok(Some(sample)) => {
                        telemetry.set_score(sample.score);
                        controller.observe(sample).await;
                    }
                    Ok(None) => {
                        // no sample this tick; controller holds its state
                    }
                    Err(e) => {
                        tracing::debug!(camera_id = %camera_id, error = %e, "Scoring failed");
                    }
                }
            }
        });

        self.tasks.lock().expect("task list lock").push(task);
    }

    fn spawn_telemetry_task(&self) {
        let telemetry = self.telemetry.clone();
        let controller = self.controller.clone();
        let recording_enabled = self.recording_enabled.clone();
        let shutdown = self.shutdown.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                let applied_resolution = match controller.as_ref() {
                    Some(c) => c.state_snapshot().await.applied_resolution,
                    None => None,
                };
                telemetry
                    .tick(applied_resolution, recording_enabled.load(Ordering::Relaxed))
                    .await;
            }
        });

        self.tasks.lock().expect("task list lock").push(task);
    }
}

/// The ingestion loop: pull, fan out, repeat until shutdown. Its cadence is
/// the natural clock for size-change handling and recording writes.
fn ingest_loop<F: DecoderFactory, B: RecordingBackend>(
    mut source: CaptureSource<F>,
    mut fanout: FrameFanout<B>,
    shutdown: Arc<AtomicBool>,
    camera_id: String,
) {
    tracing::info!(camera_id = %camera_id, "Ingestion loop running");

    while let Some(captured) = source.next_frame(&shutdown) {
        fanout.on_frame(Arc::new(captured.frame), captured.size_changed);
    }

    // next_frame returned None: shutdown requested. Flush before exit.
    fanout.close();
    tracing::info!(camera_id = %camera_id, "Ingestion loop stopped");
}
