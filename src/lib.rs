//! Edgecam - Adaptive Visual Edge Node
//!
//! ## Architecture (9 Components)
//!
//! 1. CaptureSource - resilient stream ingestion (reconnect, size changes)
//! 2. FrameFanout - frame distribution + recording session lifecycle
//! 3. FrameHub - shared latest-frame cell for viewers and the scorer
//! 4. CameraClient - remote camera settings adapter
//! 5. ImportanceScorer - scoring sidecar interface
//! 6. AdaptiveController - score -> stable camera settings (hysteresis + cooldown)
//! 7. Telemetry - per-pipeline reporting snapshot
//! 8. Pipeline - per-camera composition and lifecycle
//! 9. WebAPI - MJPEG live stream, recording toggle, telemetry
//!
//! ## Design Principles
//!
//! - One pipeline per camera, zero shared state between pipelines
//! - Ingestion never blocks on consumers; consumers skip, never queue
//! - Capture failures are retried forever; only the initial open is fatal

pub mod adaptive_controller;
pub mod camera_client;
pub mod capture_source;
pub mod frame_fanout;
pub mod frame_hub;
pub mod importance_scorer;
pub mod pipeline;
pub mod telemetry;
pub mod web_api;
pub mod error;
pub mod models;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
