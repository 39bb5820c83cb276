// THEORY:
// The `pipeline` module is the top-level API of the occupancy engine. A
// `DetectionEngine` owns everything that outlives a single frame: the oracle models,
// the previous processing frame used for motion, the frame counter and the caller's
// settings. Each `detect` call runs the full stack for one frame:
//
//   normalize -> extract features -> classify -> gate/verify -> stabilize -> report
//
// Regions never depend on each other within a frame. They share only the motion score
// and the read-only oracle models, so verification fans out across regions while the
// motion snapshot is touched by one call at a time.

use crate::core_modules::classifier::{self, DEFAULT_STABILITY};
use crate::core_modules::features;
use crate::core_modules::frame::{FrameSnapshot, RasterSource};
use crate::core_modules::motion::{MotionEstimator, MotionMap};
use crate::core_modules::oracle::{OracleLoader, OracleModels, OracleRegistry};
use crate::core_modules::region::{self, Region, RegionInput};
use crate::core_modules::space::{ParkingSpace, history_capacity};
use crate::core_modules::stabilizer;
use crate::core_modules::verification::{self, OracleInputs};
use crate::error::{LotError, LotResult};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub use crate::core_modules::oracle::{ModelLoadConfig, ModelStatus};

/// Tunable limits of the engine. Weights and thresholds of the individual stages live
/// next to the code that uses them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Box the processing frame is fitted into, aspect ratio preserved.
    pub target_width: u32,
    pub target_height: u32,
    /// Regions whose processing bounding box is narrower or shorter than this are not
    /// assessed.
    pub min_region_size: u32,
    /// Smallest full-resolution crop sent to the oracles.
    pub min_verification_crop: u32,
    /// Every n-th frame verifies regardless of confidence.
    pub verification_interval: u64,
    pub min_consecutive_frames: u32,
    pub inference_timeout_ms: u64,
    pub model_load: ModelLoadConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_width: 1280,
            target_height: 720,
            min_region_size: 20,
            min_verification_crop: 10,
            verification_interval: 3,
            min_consecutive_frames: 3,
            inference_timeout_ms: 10_000,
            model_load: ModelLoadConfig::default(),
        }
    }
}

/// Caller toggles, read once per `detect` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub motion_detection: bool,
    pub model_verification: bool,
    pub temporal_smoothing: bool,
    pub adaptive_verification: bool,
    pub show_debug_overlay: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            motion_detection: true,
            model_verification: true,
            temporal_smoothing: true,
            adaptive_verification: true,
            show_debug_overlay: false,
        }
    }
}

/// Partial settings change for `DetectionEngine::configure`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub motion_detection: Option<bool>,
    pub model_verification: Option<bool>,
    pub temporal_smoothing: Option<bool>,
    pub adaptive_verification: Option<bool>,
    pub show_debug_overlay: Option<bool>,
}

impl SettingsUpdate {
    fn apply(&self, settings: &mut Settings) {
        let fields = [
            (self.motion_detection, &mut settings.motion_detection),
            (self.model_verification, &mut settings.model_verification),
            (self.temporal_smoothing, &mut settings.temporal_smoothing),
            (self.adaptive_verification, &mut settings.adaptive_verification),
            (self.show_debug_overlay, &mut settings.show_debug_overlay),
        ];
        for (update, slot) in fields {
            if let Some(value) = update {
                *slot = value;
            }
        }
    }
}

/// Result of one `detect` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    pub total: usize,
    pub occupied: usize,
    pub available: usize,
    pub spaces: Vec<ParkingSpace>,
    pub processing_time_ms: f64,
}

impl DetectionReport {
    fn new(spaces: Vec<ParkingSpace>, started: Instant) -> Self {
        let occupied = spaces.iter().filter(|s| s.is_occupied).count();
        Self {
            total: spaces.len(),
            occupied,
            available: spaces.len() - occupied,
            spaces,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

/// State carried from one frame to the next.
struct FrameState {
    counter: u64,
    motion: MotionEstimator,
}

/// Everything the per-region passes share within one frame.
struct FrameContext<'a> {
    snapshot: &'a FrameSnapshot,
    motion: &'a MotionMap,
    frame_counter: u64,
    settings: Settings,
    oracles_ready: bool,
    now: u64,
}

/// A space after heuristics, waiting for verification and smoothing.
struct Pending {
    space: ParkingSpace,
    region: Region,
    assessed: bool,
    verify: bool,
}

pub struct DetectionEngine {
    config: PipelineConfig,
    settings: RwLock<Settings>,
    oracles: Arc<OracleRegistry>,
    frame: tokio::sync::Mutex<FrameState>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl DetectionEngine {
    /// An engine without oracles: detection is heuristic-only.
    pub fn new(config: PipelineConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_loader(config: PipelineConfig, loader: Arc<dyn OracleLoader>) -> Self {
        Self::build(config, Some(loader))
    }

    fn build(config: PipelineConfig, loader: Option<Arc<dyn OracleLoader>>) -> Self {
        let oracles = Arc::new(OracleRegistry::new(loader, config.model_load.clone()));
        Self {
            config,
            settings: RwLock::new(Settings::default()),
            oracles,
            frame: tokio::sync::Mutex::new(FrameState {
                counter: 0,
                motion: MotionEstimator::new(),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn settings(&self) -> Settings {
        *self.settings.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies a partial settings change; takes effect on the next `detect` call.
    pub fn configure(&self, update: SettingsUpdate) -> Settings {
        let mut settings = self.settings.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        update.apply(&mut settings);
        debug!(settings = ?*settings, "settings updated");
        *settings
    }

    pub fn model_status(&self) -> ModelStatus {
        self.oracles.status()
    }

    /// Loads the oracle models now instead of on first use. Returns whether they are
    /// ready; failure leaves the engine heuristic-only.
    pub async fn load_models(&self) -> bool {
        self.oracles.load().await
    }

    /// Releases the oracle models and forgets the motion snapshot and frame counter.
    pub async fn reset_state(&self) {
        self.oracles.teardown();
        let mut frame = self.frame.lock().await;
        frame.counter = 0;
        frame.motion.reset();
        info!("detection state reset");
    }

    /// Decides the occupancy of every region in `source`. `previous` is the last call's
    /// `spaces`, matched by id.
    pub async fn detect(
        &self,
        source: &dyn RasterSource,
        regions: &[RegionInput],
        previous: &[ParkingSpace],
    ) -> LotResult<DetectionReport> {
        let started = Instant::now();
        let settings = self.settings();

        if source.has_ended() {
            if previous.is_empty() {
                return Err(LotError::invalid_source(
                    "video playback has ended and there is no earlier result",
                ));
            }
            debug!(spaces = previous.len(), "playback ended, returning last known spaces");
            return Ok(DetectionReport::new(previous.to_vec(), started));
        }

        let snapshot = FrameSnapshot::capture(
            source,
            (self.config.target_width, self.config.target_height),
        )?;
        let regions = region::ingest(regions);

        let (frame_counter, motion) = {
            let mut frame = self.frame.lock().await;
            frame.counter += 1;
            let motion = if settings.motion_detection {
                frame.motion.update(&snapshot.processed)
            } else {
                frame.motion.remember(&snapshot.processed);
                MotionMap::still()
            };
            (frame.counter, motion)
        };

        let models = if settings.model_verification {
            self.oracles.ensure_loading();
            self.oracles.ready()
        } else {
            None
        };

        let now = now_ms();
        let context = FrameContext {
            snapshot: &snapshot,
            motion: &motion,
            frame_counter,
            settings,
            oracles_ready: models.is_some(),
            now,
        };
        let pending: Vec<Pending> = regions
            .into_iter()
            .map(|(id, region)| {
                let prior = previous.iter().find(|p| p.id == id);
                self.assess(id, region, prior, &context)
            })
            .collect();

        let pending = match models {
            Some(models) => self.verify_all(pending, &snapshot, &models).await,
            None => pending,
        };

        let spaces: Vec<ParkingSpace> = pending
            .into_iter()
            .map(|p| {
                let mut space = p.space;
                match previous.iter().find(|prior| prior.id == space.id) {
                    Some(prior) if p.assessed && settings.temporal_smoothing => {
                        stabilizer::stabilize(&mut space, prior, now);
                    }
                    // Verification may have flipped the provisional state.
                    Some(prior) if p.assessed && prior.is_occupied != space.is_occupied => {
                        space.last_state_change = now;
                    }
                    _ => {}
                }
                if settings.show_debug_overlay {
                    info!(
                        id = space.id,
                        region = %p.region.id,
                        occupied = space.is_occupied,
                        confidence = space.confidence,
                        vehicle = ?space.vehicle_type,
                        features = ?space.features,
                        "space"
                    );
                }
                space
            })
            .collect();

        let report = DetectionReport::new(spaces, started);
        debug!(
            frame = frame_counter,
            total = report.total,
            occupied = report.occupied,
            motion = motion.score,
            elapsed_ms = report.processing_time_ms,
            "frame processed"
        );
        Ok(report)
    }

    /// Heuristic pass for one region.
    fn assess(
        &self,
        id: usize,
        region: Region,
        prior: Option<&ParkingSpace>,
        context: &FrameContext<'_>,
    ) -> Pending {
        let FrameContext {
            snapshot,
            motion,
            frame_counter,
            settings,
            oracles_ready,
            now,
        } = *context;
        let intrinsic = snapshot.intrinsic_size();
        let (width, height) = snapshot.processing_size();
        let normalized = region.to_normalized(intrinsic);
        let bounds = region.bounds_in(width, height, intrinsic);

        if bounds.is_smaller_than(self.config.min_region_size) {
            let reason = LotError::RegionTooSmall {
                id: region.id.clone(),
                width: bounds.width,
                height: bounds.height,
            };
            debug!(error = %reason, "skipping assessment");
            return Pending {
                space: ParkingSpace::empty(id, normalized, now),
                region,
                assessed: false,
                verify: false,
            };
        }

        let stability = prior.map(ParkingSpace::stability).unwrap_or(DEFAULT_STABILITY);
        let mut features = features::extract(&snapshot.crop_processed(bounds));
        features.perspective_score = region.perspective_score(width, height, intrinsic);
        features.heatmap_score = motion.fraction_within(bounds);
        features.motion_score = motion.score;
        features.stability_score = stability;

        let verdict = classifier::classify(&features, motion.score, stability);
        let verify = oracles_ready
            && (!settings.adaptive_verification
                || verification::should_verify(
                    &verdict,
                    motion.score,
                    frame_counter,
                    self.config.verification_interval,
                ));

        let space = ParkingSpace::provisional(
            id,
            normalized,
            &verdict,
            features,
            prior,
            now,
            history_capacity(self.config.min_consecutive_frames),
        );
        Pending {
            space,
            region,
            assessed: true,
            verify,
        }
    }

    /// Runs the oracles over every pending space that asked for it, a bounded number
    /// of regions at a time. Order is preserved.
    async fn verify_all(
        &self,
        pending: Vec<Pending>,
        snapshot: &FrameSnapshot,
        models: &OracleModels,
    ) -> Vec<Pending> {
        let timeout = Duration::from_millis(self.config.inference_timeout_ms);
        let (full_width, full_height) = snapshot.intrinsic_size();

        stream::iter(pending)
            .map(|mut p| async move {
                if !p.verify {
                    return p;
                }
                let full = (full_width, full_height);
                let crop = snapshot.crop_full(p.region.bounds_in(full_width, full_height, full));
                let min_crop = self.config.min_verification_crop;
                let outcome = match OracleInputs::prepare(&crop, min_crop) {
                    Ok(inputs) => verification::consult(models, &inputs, timeout).await,
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(report) => {
                        let merged = verification::merge(&mut p.space, &report);
                        debug!(region = %p.region.id, ?merged, "verified");
                    }
                    Err(e) => {
                        warn!(
                            region = %p.region.id,
                            error = %e,
                            "verification skipped, keeping heuristic result"
                        );
                    }
                }
                p
            })
            .buffered(num_cpus::get().max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::frame::{StillImage, VideoFrame};
    use crate::core_modules::region::{Point, Shape};
    use image::{DynamicImage, Rgba, RgbaImage};

    fn gray_frame(width: u32, height: u32, level: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([level, level, level, 255]))
    }

    fn rect(id: &str, x: f64, y: f64, w: f64, h: f64) -> RegionInput {
        RegionInput::new(
            id,
            vec![
                Point::new(x, y),
                Point::new(x + w, y),
                Point::new(x + w, y + h),
                Point::new(x, y + h),
            ],
            Shape::Rectangle,
        )
    }

    #[test]
    fn settings_update_is_partial() {
        let mut settings = Settings::default();
        SettingsUpdate {
            temporal_smoothing: Some(false),
            show_debug_overlay: Some(true),
            ..SettingsUpdate::default()
        }
        .apply(&mut settings);
        assert!(!settings.temporal_smoothing);
        assert!(settings.show_debug_overlay);
        assert!(settings.motion_detection && settings.model_verification);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "min_region_size": 32, "model_load": { "attempts": 1 } }"#)
                .unwrap();
        assert_eq!(config.min_region_size, 32);
        assert_eq!(config.target_width, 1280);
        assert_eq!(config.model_load.attempts, 1);
        assert_eq!(config.model_load.attempt_timeout_secs, 60);
    }

    #[tokio::test]
    async fn pixel_regions_come_back_normalized() {
        let engine = DetectionEngine::new(PipelineConfig::default());
        let source = StillImage::new(DynamicImage::ImageRgba8(gray_frame(640, 480, 128)));
        let report = engine
            .detect(&source, &[rect("p1", 64.0, 48.0, 320.0, 240.0)], &[])
            .await
            .unwrap();
        let points = report.spaces[0].region.coordinates.points();
        assert!((points[0].x - 0.1).abs() < 1e-9 && (points[2].y - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_sized_video_is_rejected() {
        let engine = DetectionEngine::new(PipelineConfig::default());
        let source = VideoFrame::new(RgbaImage::new(0, 0));
        let err = engine.detect(&source, &[], &[]).await.unwrap_err();
        assert!(matches!(err, LotError::InvalidSource(_)));
    }

    #[tokio::test]
    async fn frame_counter_and_motion_reset() {
        let engine = DetectionEngine::new(PipelineConfig::default());
        let regions = [rect("a", 0.0, 0.0, 1.0, 1.0)];
        let dark = VideoFrame::new(gray_frame(160, 90, 20));
        let bright = VideoFrame::new(gray_frame(160, 90, 220));

        engine.detect(&dark, &regions, &[]).await.unwrap();
        let moved = engine.detect(&bright, &regions, &[]).await.unwrap();
        assert_eq!(moved.spaces[0].features.motion_score, 1.0);
        assert_eq!(moved.spaces[0].features.heatmap_score, 1.0);

        engine.reset_state().await;
        assert_eq!(engine.frame.lock().await.counter, 0);
        let fresh = engine.detect(&dark, &regions, &[]).await.unwrap();
        assert_eq!(fresh.spaces[0].features.motion_score, 0.0);
    }

    #[tokio::test]
    async fn disabled_motion_reports_none() {
        let engine = DetectionEngine::new(PipelineConfig::default());
        engine.configure(SettingsUpdate {
            motion_detection: Some(false),
            ..SettingsUpdate::default()
        });
        let regions = [rect("a", 0.0, 0.0, 1.0, 1.0)];
        engine.detect(&VideoFrame::new(gray_frame(160, 90, 20)), &regions, &[]).await.unwrap();
        let report = engine
            .detect(&VideoFrame::new(gray_frame(160, 90, 220)), &regions, &[])
            .await
            .unwrap();
        assert_eq!(report.spaces[0].features.motion_score, 0.0);
    }
}
