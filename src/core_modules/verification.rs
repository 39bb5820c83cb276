// THEORY:
// The verification gate decides, per region per frame, whether a heuristic verdict is
// worth checking against the oracles, and folds the oracles' answer back into the space.
//
// Key architectural principles:
// 1.  **Spend inference where it matters**: besides a periodic check, only uncertain
//     verdicts are sent out: weak positives, strong-ish negatives, and borderline
//     scores under heavy motion.
// 2.  **Full-resolution crops**: the oracles see the region cut from the source image,
//     not from the downscaled processing frame.
// 3.  **Augment, never block**: a crop that is too small, a timeout or an oracle error
//     leaves the heuristic result untouched.

use crate::core_modules::classifier::Verdict;
use crate::core_modules::oracle::{
    CLASSIFIER_INPUT, ClassLabel, DETECTOR_MIN_INPUT, DetectedObject, OracleModels,
};
use crate::core_modules::space::ParkingSpace;
use crate::error::{LotError, LotResult};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb32FImage, RgbImage, RgbaImage};
use std::time::Duration;

const LOW_CONFIDENCE_POSITIVE: f64 = 0.85;
const UNCERTAINTY_THRESHOLD: f64 = 0.35;
const UNCERTAINTY_FRACTION: f64 = 0.8;
const HIGH_MOTION: f64 = 0.25;
const BOUNDARY_GAP: f64 = 0.1;

pub const VERIFY_BOOST: f64 = 1.2;
const MIN_DETECTION_SCORE: f32 = 0.6;
const MIN_LABEL_PROBABILITY: f32 = 0.5;
const DETECTION_STABILITY_GAIN: f64 = 0.2;
const LABEL_STABILITY_GAIN: f64 = 0.1;
const REJECTION_STABILITY_PENALTY: f64 = 0.1;

const VEHICLE_CLASSES: [&str; 8] = [
    "car",
    "truck",
    "bus",
    "motorcycle",
    "van",
    "suv",
    "pickup",
    "vehicle",
];

/// Substrings of classifier labels that denote a vehicle.
const VEHICLE_KEYWORDS: &[&str] = &[
    "car",
    "truck",
    "bus",
    "van",
    "motorcycle",
    "moped",
    "scooter",
    "pickup",
    "jeep",
    "limousine",
    "minivan",
    "convertible",
    "cab",
    "wagon",
    "ambulance",
    "vehicle",
];

/// Whether a heuristic verdict should be sent to the oracles.
pub fn should_verify(
    verdict: &Verdict,
    motion_score: f64,
    frame_counter: u64,
    interval: u64,
) -> bool {
    let periodic = interval > 0 && frame_counter % interval == 0;
    let weak_positive = verdict.is_occupied && verdict.confidence < LOW_CONFIDENCE_POSITIVE;
    let doubtful_negative =
        !verdict.is_occupied && verdict.confidence > UNCERTAINTY_THRESHOLD * UNCERTAINTY_FRACTION;
    let moving_boundary = motion_score > HIGH_MOTION && verdict.threshold_gap() < BOUNDARY_GAP;
    periodic || weak_positive || doubtful_negative || moving_boundary
}

/// The two oracle inputs derived from one region crop.
pub struct OracleInputs {
    pub detection: RgbImage,
    pub classification: Rgb32FImage,
}

impl OracleInputs {
    pub fn prepare(crop: &RgbaImage, min_crop: u32) -> LotResult<Self> {
        let (width, height) = crop.dimensions();
        if width < min_crop || height < min_crop {
            return Err(LotError::verification(format!(
                "crop {width}x{height} is below {min_crop}x{min_crop}"
            )));
        }
        let detection = DynamicImage::ImageRgba8(imageops::resize(
            crop,
            DETECTOR_MIN_INPUT,
            DETECTOR_MIN_INPUT,
            FilterType::Triangle,
        ))
        .into_rgb8();
        let classification = DynamicImage::ImageRgba8(imageops::resize(
            crop,
            CLASSIFIER_INPUT,
            CLASSIFIER_INPUT,
            FilterType::Triangle,
        ))
        .into_rgb32f();
        Ok(Self {
            detection,
            classification,
        })
    }
}

/// What the oracles said about one crop.
#[derive(Debug, Clone, Default)]
pub struct OracleReport {
    pub detections: Vec<DetectedObject>,
    pub labels: Vec<ClassLabel>,
}

/// Runs both oracles concurrently, each bounded by `timeout`.
pub async fn consult(
    models: &OracleModels,
    inputs: &OracleInputs,
    timeout: Duration,
) -> LotResult<OracleReport> {
    let (detections, labels) = tokio::join!(
        tokio::time::timeout(timeout, models.detector.detect(&inputs.detection)),
        tokio::time::timeout(timeout, models.classifier.classify(&inputs.classification)),
    );
    let detections = detections
        .map_err(|_| LotError::verification(format!("object detector exceeded {timeout:?}")))??;
    let labels = labels
        .map_err(|_| LotError::verification(format!("image classifier exceeded {timeout:?}")))??;
    Ok(OracleReport { detections, labels })
}

/// Which rule of the merge policy applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Detected,
    Classified,
    Rejected,
}

fn is_vehicle_class(class: &str) -> bool {
    let class = class.to_ascii_lowercase();
    VEHICLE_CLASSES.contains(&class.as_str())
}

fn is_vehicle_label(label: &str) -> bool {
    let label = label.to_ascii_lowercase();
    VEHICLE_KEYWORDS.iter().any(|keyword| label.contains(keyword))
}

fn mark_occupied(space: &mut ParkingSpace) {
    space.is_occupied = true;
    if let Some(vote) = space.state_history.last_mut() {
        *vote = true;
    }
}

/// Folds the oracle report into `space`. A vehicle sighting also replaces this frame's
/// vote in the history.
pub fn merge(space: &mut ParkingSpace, report: &OracleReport) -> MergeOutcome {
    let best_box = report
        .detections
        .iter()
        .filter(|d| d.score > MIN_DETECTION_SCORE && is_vehicle_class(&d.class))
        .max_by(|a, b| a.score.total_cmp(&b.score));
    if let Some(detection) = best_box {
        mark_occupied(space);
        space.confidence = (detection.score as f64 * VERIFY_BOOST).min(1.0);
        space.vehicle_type = Some(detection.class.to_ascii_lowercase());
        space.nudge_stability(DETECTION_STABILITY_GAIN);
        return MergeOutcome::Detected;
    }

    let best_label = report
        .labels
        .iter()
        .filter(|l| l.probability > MIN_LABEL_PROBABILITY && is_vehicle_label(&l.class_name))
        .max_by(|a, b| a.probability.total_cmp(&b.probability));
    if let Some(label) = best_label {
        let name = label.class_name.split(',').next().unwrap_or_default().trim();
        mark_occupied(space);
        space.confidence = (label.probability as f64 * VERIFY_BOOST).min(1.0);
        space.vehicle_type = Some(name.to_string());
        space.nudge_stability(LABEL_STABILITY_GAIN);
        return MergeOutcome::Classified;
    }

    space.nudge_stability(-REJECTION_STABILITY_PENALTY);
    MergeOutcome::Rejected
}
