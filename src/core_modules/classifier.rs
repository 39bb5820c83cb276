// THEORY:
// The `classifier` is the heuristic decision layer. It takes a space's feature bundle,
// the frame-wide motion score and the space's current stability, and produces a
// provisional verdict: occupied or not, and how sure we are.
//
// Key architectural principles:
// 1.  **Shadow veto**: a space that looks like a shadow is never called occupied,
//     however high its occupancy score. Shadows can fill a space visually, but they
//     rarely carry sharp edges, texture or color variation.
// 2.  **Adaptive threshold**: the occupancy score is compared against the space's
//     dynamic threshold, not a global constant.
// 3.  **Margin as confidence**: decisions far from the threshold are more trustworthy,
//     so the distance to the threshold doubles as the confidence proxy.

use crate::core_modules::features::Features;

pub const SHADOW_THRESHOLD: f64 = 0.45;
pub const TEXTURE_THRESHOLD: f64 = 0.5;
pub const EDGE_THRESHOLD: f64 = 0.15;
pub const COLOR_THRESHOLD: f64 = 0.02;
pub const MOTION_INFLUENCE: f64 = 0.3;

/// Stability assumed for a space with no history.
pub const DEFAULT_STABILITY: f64 = 0.5;

const COVERAGE_WEIGHT: f64 = 0.35;
const TEXTURE_WEIGHT: f64 = 0.25;
const EDGE_WEIGHT: f64 = 0.25;
const COLOR_WEIGHT: f64 = 0.10;
const MOTION_WEIGHT: f64 = 0.05;

const SHADOW_CONFIDENCE: f64 = 0.3;
const MIN_DECISION_CONFIDENCE: f64 = 0.5;
const MOTION_CONFIDENCE_GAIN: f64 = 0.2;
const MIN_STABILITY_FACTOR: f64 = 0.7;

/// Provisional, heuristic-only decision for one space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub is_occupied: bool,
    pub confidence: f64,
    pub occupancy_score: f64,
    pub threshold: f64,
    pub is_shadow: bool,
}

impl Verdict {
    /// Distance between the occupancy score and the dynamic threshold.
    pub fn threshold_gap(&self) -> f64 {
        (self.occupancy_score - self.threshold).abs()
    }
}

fn indicator(condition: bool) -> f64 {
    if condition { 1.0 } else { 0.0 }
}

pub fn occupancy_score(features: &Features, motion_score: f64, stability: f64) -> f64 {
    COVERAGE_WEIGHT * features.non_zero_coverage
        + TEXTURE_WEIGHT * indicator(features.texture_complexity > TEXTURE_THRESHOLD)
        + EDGE_WEIGHT * indicator(features.edge_density > EDGE_THRESHOLD)
        + COLOR_WEIGHT * indicator(features.color_variance > COLOR_THRESHOLD)
        + MOTION_WEIGHT * indicator(motion_score > MOTION_INFLUENCE * stability)
}

pub fn classify(features: &Features, motion_score: f64, stability: f64) -> Verdict {
    let is_shadow = features.shadow_score < SHADOW_THRESHOLD;
    let occupancy_score = occupancy_score(features, motion_score, stability);
    let threshold = features.dynamic_threshold();
    let is_occupied = !is_shadow && occupancy_score > threshold;

    let base = if is_shadow {
        SHADOW_CONFIDENCE
    } else {
        (1.0 - (occupancy_score - threshold).abs()).max(MIN_DECISION_CONFIDENCE)
    };
    let confidence = (base
        * (1.0 + MOTION_CONFIDENCE_GAIN * motion_score)
        * stability.max(MIN_STABILITY_FACTOR))
    .clamp(0.0, 1.0);

    Verdict {
        is_occupied,
        confidence,
        occupancy_score,
        threshold,
        is_shadow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::features::extract;
    use image::{Rgba, RgbaImage};

    fn features(coverage: f64, edge: f64, texture: f64, color: f64, shadow: f64) -> Features {
        Features {
            non_zero_coverage: coverage,
            brightness: 0.5,
            edge_density: edge,
            texture_complexity: texture,
            color_variance: color,
            shadow_score: shadow,
            ..Features::default()
        }
    }

    #[test]
    fn shadows_are_never_occupied() {
        let levels = [0.0, 0.25, 0.5, 0.75, 1.0];
        for &coverage in &levels {
            for &edge in &levels {
                for &texture in &levels {
                    for &shadow in &[0.0, 0.2, 0.44] {
                        for &motion in &[0.0, 1.0] {
                            let f = features(coverage, edge, texture, 0.05, shadow);
                            let verdict = classify(&f, motion, 1.0);
                            assert!(!verdict.is_occupied);
                            assert!(verdict.is_shadow);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn shadow_confidence_sits_at_the_penalty_floor() {
        let verdict = classify(&features(1.0, 1.0, 1.0, 1.0, 0.1), 0.0, DEFAULT_STABILITY);
        assert!((verdict.confidence - SHADOW_CONFIDENCE * MIN_STABILITY_FACTOR).abs() < 1e-12);
    }

    #[test]
    fn mid_gray_space_crosses_the_threshold() {
        let crop = RgbaImage::from_pixel(40, 40, Rgba([128, 128, 128, 255]));
        let f = extract(&crop);
        let verdict = classify(&f, 0.0, DEFAULT_STABILITY);
        // Coverage (0.35) plus the uniform-texture vote (0.25) beats a ~0.5 threshold.
        assert!((verdict.occupancy_score - 0.6).abs() < 1e-9);
        assert!((verdict.threshold - 0.5).abs() < 0.01);
        assert!(verdict.is_occupied);
    }

    #[test]
    fn coverage_alone_stays_below_the_threshold() {
        let f = features(0.9, 0.0, 0.0, 0.0, 0.9);
        let verdict = classify(&f, 0.0, DEFAULT_STABILITY);
        assert!((verdict.occupancy_score - 0.315).abs() < 1e-12);
        assert!(!verdict.is_occupied);
    }

    #[test]
    fn empty_space_is_unoccupied_with_low_confidence() {
        let verdict = classify(&features(0.0, 0.01, 0.1, 0.0, 0.95), 0.0, DEFAULT_STABILITY);
        assert!(!verdict.is_occupied);
        assert!((verdict.confidence - 0.35).abs() < 1e-12);
    }

    #[test]
    fn motion_votes_relative_to_stability() {
        let f = features(0.0, 0.0, 0.0, 0.0, 0.9);
        assert_eq!(occupancy_score(&f, 0.2, 1.0), 0.0);
        assert!((occupancy_score(&f, 0.2, 0.5) - MOTION_WEIGHT).abs() < 1e-12);
    }

    #[test]
    fn confidence_is_clamped() {
        let verdict = classify(&features(1.0, 1.0, 1.0, 1.0, 0.9), 1.0, 1.0);
        assert!(verdict.confidence <= 1.0);
    }
}
