//! AdaptiveController - Closed-Loop Camera Tuning
//!
//! ## Responsibilities
//!
//! - Map the importance score onto a resolution tier and a JPEG quality
//! - Suppress redundant and flapping changes (hysteresis + cooldown)
//! - Push accepted changes through the camera client and track what was
//!   applied
//!
//! Tier boundaries, quality steps and the cooldown are tuning parameters,
//! not constants. Resolution and quality are evaluated independently each
//! tick but share a single cooldown gate: an accepted change of either
//! setting debounces both until the cooldown expires. A decision blocked by
//! the cooldown is dropped outright; the next tick re-derives it from the
//! then-current score, so a regime change landing just inside the window is
//! acted on one tick late.

use crate::camera_client::CameraControl;
use crate::importance_scorer::ImportanceSample;
use crate::models::FrameSize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// One resolution target, selected when `score >= min_score`
#[derive(Debug, Clone, Copy)]
pub struct ResolutionTier {
    pub min_score: f32,
    pub size: FrameSize,
}

/// One quality step, selected when `score >= min_score`
#[derive(Debug, Clone, Copy)]
pub struct QualityStep {
    pub min_score: f32,
    pub quality: i32,
}

/// Controller tuning parameters
#[derive(Debug, Clone)]
pub struct ControllerTuning {
    /// Tiers ordered by descending `min_score`; the last entry is the floor
    pub tiers: Vec<ResolutionTier>,
    /// Steps ordered by descending `min_score`; the last entry is the floor
    pub quality_steps: Vec<QualityStep>,
    /// Hard quality band applied after step selection
    pub quality_floor: i32,
    pub quality_ceiling: i32,
    /// Minimum time between two accepted changes
    pub cooldown: Duration,
}

impl Default for ControllerTuning {
    fn default() -> Self {
        Self {
            tiers: vec![
                ResolutionTier {
                    min_score: 0.7,
                    size: FrameSize::new(1920, 1080),
                },
                ResolutionTier {
                    min_score: 0.3,
                    size: FrameSize::new(1280, 720),
                },
                ResolutionTier {
                    min_score: 0.0,
                    size: FrameSize::new(640, 480),
                },
            ],
            quality_steps: vec![
                QualityStep {
                    min_score: 0.7,
                    quality: 50,
                },
                QualityStep {
                    min_score: 0.3,
                    quality: 35,
                },
                QualityStep {
                    min_score: 0.0,
                    quality: 20,
                },
            ],
            quality_floor: 20,
            quality_ceiling: 50,
            cooldown: Duration::from_secs(3),
        }
    }
}

impl ControllerTuning {
    /// Resolution tier for a score: first tier whose threshold the score
    /// meets, otherwise the floor tier.
    pub fn select_tier(&self, score: f32) -> FrameSize {
        self.tiers
            .iter()
            .find(|t| score >= t.min_score)
            .or(self.tiers.last())
            .map(|t| t.size)
            .expect("tuning has at least one tier")
    }

    /// Quality for a score, clamped into the hard band. The clamp happens
    /// before comparison against applied state so post-clamp equality
    /// suppresses a redundant push.
    pub fn select_quality(&self, score: f32) -> i32 {
        self.quality_steps
            .iter()
            .find(|s| score >= s.min_score)
            .or(self.quality_steps.last())
            .map(|s| s.quality)
            .expect("tuning has at least one quality step")
            .clamp(self.quality_floor, self.quality_ceiling)
    }
}

/// What this process believes it last pushed to the camera. Best-effort:
/// updated on HTTP success only, with no read-back confirmation.
#[derive(Debug, Clone, Default)]
pub struct ControllerState {
    pub applied_resolution: Option<FrameSize>,
    pub applied_quality: Option<i32>,
    pub last_change_at: Option<Instant>,
    pub last_score: f32,
}

/// AdaptiveController instance. `observe` is called serially from the
/// scoring task; other tasks only read snapshots.
pub struct AdaptiveController<C: CameraControl> {
    client: Arc<C>,
    tuning: ControllerTuning,
    state: RwLock<ControllerState>,
}

impl<C: CameraControl> AdaptiveController<C> {
    /// Create new AdaptiveController
    pub fn new(client: Arc<C>, tuning: ControllerTuning) -> Self {
        Self {
            client,
            tuning,
            state: RwLock::new(ControllerState::default()),
        }
    }

    pub fn tuning(&self) -> &ControllerTuning {
        &self.tuning
    }

    /// Consistent snapshot for telemetry readers
    pub async fn state_snapshot(&self) -> ControllerState {
        self.state.read().await.clone()
    }

    /// Evaluate one importance sample. Issues at most one remote command
    /// per setting, and only for settled decisions.
    pub async fn observe(&self, sample: ImportanceSample) {
        let score = sample.score;
        // Work on a local copy so the lock is never held across the HTTP
        // calls; this task is the only writer.
        let mut state = self.state.read().await.clone();
        state.last_score = score;

        let now = Instant::now();
        let cooldown_over = |state: &ControllerState| {
            state
                .last_change_at
                .map_or(true, |t| now.duration_since(t) >= self.tuning.cooldown)
        };

        let target = self.tuning.select_tier(score);
        if state.applied_resolution != Some(target) {
            if cooldown_over(&state) {
                match self.client.set_resolution(target).await {
                    Ok(outcome) if outcome.is_success() => {
                        tracing::info!(
                            score = score,
                            resolution = %target,
                            status = outcome.status,
                            "Camera resolution updated"
                        );
                        state.applied_resolution = Some(target);
                        state.last_change_at = Some(now);
                    }
                    Ok(outcome) => {
                        tracing::warn!(
                            resolution = %target,
                            status = outcome.status,
                            body = %outcome.body_prefix,
                            "Resolution push rejected by camera"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            resolution = %target,
                            error = %e,
                            "Resolution push failed"
                        );
                    }
                }
            } else {
                // Dropped, not queued: re-derived next tick
                tracing::trace!(
                    score = score,
                    resolution = %target,
                    "Resolution change suppressed by cooldown"
                );
            }
        }

        // Quality shares the cooldown gate, so re-check: a resolution
        // change accepted above consumes it for this tick.
        let target_quality = self.tuning.select_quality(score);
        if state.applied_quality != Some(target_quality) {
            if cooldown_over(&state) {
                match self.client.set_quality(target_quality).await {
                    Ok(outcome) if outcome.is_success() => {
                        tracing::info!(
                            score = score,
                            quality = target_quality,
                            status = outcome.status,
                            "Camera quality updated"
                        );
                        state.applied_quality = Some(target_quality);
                        state.last_change_at = Some(now);
                    }
                    Ok(outcome) => {
                        tracing::warn!(
                            quality = target_quality,
                            status = outcome.status,
                            body = %outcome.body_prefix,
                            "Quality push rejected by camera"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            quality = target_quality,
                            error = %e,
                            "Quality push failed"
                        );
                    }
                }
            } else {
                tracing::trace!(
                    score = score,
                    quality = target_quality,
                    "Quality change suppressed by cooldown"
                );
            }
        }

        *self.state.write().await = state;
    }
}
