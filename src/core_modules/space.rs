// THEORY:
// A `ParkingSpace` is the per-region, per-frame result handed back to the caller. It is
// a value: every detection call builds a fresh one from the region and, when the caller
// threads it back in, the previous call's space with the same id. Carry-over is limited
// to the vote history, the stability score and the time of the last state change.
//
// The region inside a space is always expressed in normalized [0,1] coordinates, so a
// consumer can draw it at whatever resolution it displays the frame.

use crate::core_modules::classifier::{DEFAULT_STABILITY, Verdict};
use crate::core_modules::features::Features;
use crate::core_modules::region::Region;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkingSpace {
    /// Index of the region in the caller's input list.
    pub id: usize,
    pub region: Region,
    pub is_occupied: bool,
    pub confidence: f64,
    /// Milliseconds since the UNIX epoch.
    pub last_state_change: u64,
    /// Raw per-frame votes, oldest first.
    pub state_history: Vec<bool>,
    pub vehicle_type: Option<String>,
    pub features: Features,
}

/// Longest vote history kept for `min_consecutive_frames`.
pub fn history_capacity(min_consecutive_frames: u32) -> usize {
    (min_consecutive_frames as f64 * 1.5).ceil() as usize
}

impl ParkingSpace {
    /// A space too small to assess: never occupied, zero confidence.
    pub fn empty(id: usize, region: Region, now_ms: u64) -> Self {
        Self {
            id,
            region,
            is_occupied: false,
            confidence: 0.0,
            last_state_change: now_ms,
            state_history: Vec::new(),
            vehicle_type: None,
            features: Features {
                stability_score: DEFAULT_STABILITY,
                ..Features::default()
            },
        }
    }

    /// The heuristic result for this frame, with the previous space's history extended
    /// by the new vote.
    pub fn provisional(
        id: usize,
        region: Region,
        verdict: &Verdict,
        features: Features,
        previous: Option<&ParkingSpace>,
        now_ms: u64,
        capacity: usize,
    ) -> Self {
        let mut state_history = previous
            .map(|p| p.state_history.clone())
            .unwrap_or_default();
        state_history.push(verdict.is_occupied);
        if state_history.len() > capacity {
            state_history.drain(..state_history.len() - capacity);
        }

        let last_state_change = match previous {
            Some(p) if p.is_occupied == verdict.is_occupied => p.last_state_change,
            _ => now_ms,
        };

        Self {
            id,
            region,
            is_occupied: verdict.is_occupied,
            confidence: verdict.confidence,
            last_state_change,
            state_history,
            vehicle_type: None,
            features,
        }
    }

    pub fn stability(&self) -> f64 {
        self.features.stability_score
    }

    pub(crate) fn nudge_stability(&mut self, delta: f64) {
        self.features.stability_score = (self.features.stability_score + delta).clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::region::{Coordinates, Point, Shape};

    fn region() -> Region {
        Region {
            id: "A1".to_string(),
            shape: Shape::Rectangle,
            coordinates: Coordinates::Normalized(vec![
                Point::new(0.0, 0.0),
                Point::new(0.5, 0.0),
                Point::new(0.5, 0.5),
            ]),
        }
    }

    fn verdict(is_occupied: bool) -> Verdict {
        Verdict {
            is_occupied,
            confidence: 0.7,
            occupancy_score: 0.6,
            threshold: 0.5,
            is_shadow: false,
        }
    }

    fn vote(
        occupied: bool,
        previous: Option<&ParkingSpace>,
        now_ms: u64,
        capacity: usize,
    ) -> ParkingSpace {
        let (verdict, features) = (verdict(occupied), Features::default());
        ParkingSpace::provisional(0, region(), &verdict, features, previous, now_ms, capacity)
    }

    #[test]
    fn capacity_rounds_up() {
        assert_eq!(history_capacity(3), 5);
        assert_eq!(history_capacity(4), 6);
    }

    #[test]
    fn history_evicts_oldest_first() {
        let mut space = vote(true, None, 1, 3);
        for _ in 0..4 {
            space = vote(false, Some(&space), 2, 3);
        }
        assert_eq!(space.state_history, vec![false, false, false]);
    }

    #[test]
    fn last_change_only_moves_on_flips() {
        let first = vote(true, None, 100, 5);
        let held = vote(true, Some(&first), 200, 5);
        assert_eq!(held.last_state_change, 100);
        let flipped = vote(false, Some(&held), 300, 5);
        assert_eq!(flipped.last_state_change, 300);
    }

    #[test]
    fn empty_space_has_neutral_stability() {
        let space = ParkingSpace::empty(2, region(), 0);
        assert!(!space.is_occupied);
        assert_eq!(space.confidence, 0.0);
        assert_eq!(space.stability(), 0.5);
        assert!(space.state_history.is_empty());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(ParkingSpace::empty(0, region(), 0)).unwrap();
        assert!(json.get("isOccupied").is_some());
        assert!(json["features"].get("stabilityScore").is_some());
    }
}
