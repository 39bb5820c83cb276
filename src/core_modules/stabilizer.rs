// THEORY:
// The `stabilizer` suppresses flicker. A single frame's verdict is only a vote; the final
// state of a space comes from the recent vote history, weighted toward the newest votes,
// and judged against how stable the space has been and how consistent its appearance
// is between the last two frames.
//
// Key architectural principles:
// 1.  **Exponential recency**: vote i of n weighs DECAY^(n-1-i), so the newest vote
//     counts most but a single outlier cannot flip a long-held state.
// 2.  **Appearance consistency**: a large jump in edges, texture, color or brightness is
//     evidence that the scene changed for real, so it lowers the bar a flip must clear.
// 3.  **Self-accumulating stability**: every held state earns a little stability and
//     every flip costs more, so chattering spaces become easy to flip again while quiet
//     ones resist noise.

use crate::core_modules::classifier::{COLOR_THRESHOLD, EDGE_THRESHOLD, TEXTURE_THRESHOLD};
use crate::core_modules::features::Features;
use crate::core_modules::space::ParkingSpace;

const DECAY: f64 = 0.85;
const STATE_THRESHOLD: f64 = 0.65;
const PREVIOUS_STABILITY_WEIGHT: f64 = 0.7;
const CONSISTENCY_WEIGHT: f64 = 0.3;
const STABILITY_GAIN: f64 = 0.08;
const STABILITY_LOSS: f64 = 0.15;

/// Exponentially weighted share of occupied votes, newest last.
pub fn weighted_average(history: &[bool]) -> f64 {
    let n = history.len();
    if n == 0 {
        return 0.0;
    }
    let (votes, total) = history
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(votes, total), (i, &occupied)| {
            let weight = DECAY.powi((n - 1 - i) as i32);
            (votes + if occupied { weight } else { 0.0 }, total + weight)
        });
    votes / total
}

/// 1.0 when the two frames look identical, lower as the appearance drifts.
pub fn feature_consistency(current: &Features, previous: &Features) -> f64 {
    0.3 * (1.0 - (current.edge_density - previous.edge_density).abs())
        + 0.3 * (1.0 - (current.texture_complexity - previous.texture_complexity).abs())
        + 0.2 * (1.0 - (current.color_variance - previous.color_variance).abs())
        + 0.2 * (1.0 - (current.brightness - previous.brightness).abs())
}

/// Multiplier rewarding features that look like a vehicle.
fn feature_confidence(features: &Features) -> f64 {
    let edge = if features.edge_density > EDGE_THRESHOLD { 1.2 } else { 0.9 };
    let texture = if features.texture_complexity > TEXTURE_THRESHOLD { 1.1 } else { 0.9 };
    let color = if features.color_variance > COLOR_THRESHOLD { 1.1 } else { 0.8 };
    edge * texture * color
}

/// Replaces the provisional state of `current` with the smoothed one. `current` already
/// carries this frame's vote at the end of its history.
///
/// The stability of `current` on entry is the previous score plus any verification nudge
/// from this frame; it weighs into this frame's decision only. The score carried to the
/// next round moves from the previous score alone.
pub fn stabilize(current: &mut ParkingSpace, previous: &ParkingSpace, now_ms: u64) {
    let weighted = weighted_average(&current.state_history);
    let consistency = feature_consistency(&current.features, &previous.features);
    let stability_factor =
        PREVIOUS_STABILITY_WEIGHT * current.stability() + CONSISTENCY_WEIGHT * consistency;

    let is_occupied = weighted > STATE_THRESHOLD * stability_factor;
    let held = is_occupied == previous.is_occupied;

    current.last_state_change = if held { previous.last_state_change } else { now_ms };
    current.is_occupied = is_occupied;
    let delta = if held { STABILITY_GAIN } else { -STABILITY_LOSS };
    current.features.stability_score = (previous.stability() + delta).clamp(0.0, 1.0);
    current.confidence =
        (weighted * stability_factor * feature_confidence(&current.features)).clamp(0.0, 1.0);
}
