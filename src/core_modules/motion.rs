// THEORY:
// The `motion` module answers one question per frame: how much of the scene changed
// since the last frame? It keeps exactly one grayscale snapshot of the previous
// processing frame and differences the new frame against it.
//
// The answer comes in two granularities:
// - a global score (fraction of pixels that changed meaningfully), shared by every
//   region in the frame, and
// - a change mask, from which each region reads its own local "heat".
//
// Differences below ~5% of full intensity are treated as sensor noise and compression
// shimmer rather than motion.

use crate::core_modules::pixel::pixel::Pixel;
use crate::core_modules::region::BoundingBox;
use image::{GrayImage, Luma, RgbaImage};

/// Minimum absolute luma difference (0..255) that counts as a change.
const CHANGE_THRESHOLD: f64 = 0.05 * 255.0;

/// Per-frame motion result.
#[derive(Debug, Clone)]
pub struct MotionMap {
    pub score: f64,
    width: u32,
    changed: Vec<bool>,
}

impl MotionMap {
    /// A map with no motion anywhere.
    pub fn still() -> Self {
        Self {
            score: 0.0,
            width: 0,
            changed: Vec::new(),
        }
    }

    /// Fraction of changed pixels inside `bounds` (processing coordinates).
    pub fn fraction_within(&self, bounds: BoundingBox) -> f64 {
        if self.changed.is_empty() || bounds.area() == 0 {
            return 0.0;
        }
        let height = self.changed.len() as u32 / self.width.max(1);
        let mut total = 0u64;
        let mut changed = 0u64;
        for y in bounds.y..(bounds.y + bounds.height).min(height) {
            for x in bounds.x..(bounds.x + bounds.width).min(self.width) {
                total += 1;
                if self.changed[(y * self.width + x) as usize] {
                    changed += 1;
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            changed as f64 / total as f64
        }
    }
}

pub fn to_gray(frame: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let luma = Pixel::from(frame.get_pixel(x, y)).luminance();
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// Frame differencer holding the previous processing frame.
#[derive(Debug, Default)]
pub struct MotionEstimator {
    previous: Option<GrayImage>,
}

impl MotionEstimator {
    pub fn new() -> Self {
        Self { previous: None }
    }

    /// Compares `frame` against the stored snapshot, then replaces the snapshot.
    /// The first frame, or a frame whose size differs from the snapshot, has no motion.
    pub fn update(&mut self, frame: &RgbaImage) -> MotionMap {
        let current = to_gray(frame);
        let map = match &self.previous {
            Some(previous) if previous.dimensions() == current.dimensions() => {
                difference(previous, &current)
            }
            _ => MotionMap::still(),
        };
        self.previous = Some(current);
        map
    }

    /// Stores `frame` as the snapshot without measuring motion.
    pub fn remember(&mut self, frame: &RgbaImage) {
        self.previous = Some(to_gray(frame));
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

fn difference(previous: &GrayImage, current: &GrayImage) -> MotionMap {
    let changed: Vec<bool> = previous
        .pixels()
        .zip(current.pixels())
        .map(|(a, b)| (a.0[0] as f64 - b.0[0] as f64).abs() > CHANGE_THRESHOLD)
        .collect();
    let count = changed.iter().filter(|&&c| c).count();
    let score = if changed.is_empty() {
        0.0
    } else {
        count as f64 / changed.len() as f64
    };
    MotionMap {
        score,
        width: current.width(),
        changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn flat(level: u8) -> RgbaImage {
        RgbaImage::from_pixel(20, 10, Rgba([level, level, level, 255]))
    }

    #[test]
    fn first_frame_has_no_motion() {
        let mut estimator = MotionEstimator::new();
        assert_eq!(estimator.update(&flat(100)).score, 0.0);
        assert_eq!(estimator.update(&flat(255)).score, 1.0);
    }

    #[test]
    fn small_flicker_is_ignored() {
        let mut estimator = MotionEstimator::new();
        estimator.update(&flat(100));
        assert_eq!(estimator.update(&flat(110)).score, 0.0);
    }

    #[test]
    fn half_changed_frame_scores_half() {
        let mut estimator = MotionEstimator::new();
        estimator.update(&flat(100));
        let half = RgbaImage::from_fn(20, 10, |x, _| {
            if x < 10 {
                Rgba([200, 200, 200, 255])
            } else {
                Rgba([100, 100, 100, 255])
            }
        });
        let map = estimator.update(&half);
        assert!((map.score - 0.5).abs() < 1e-12);

        let left = BoundingBox {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        };
        let right = BoundingBox { x: 10, ..left };
        assert_eq!(map.fraction_within(left), 1.0);
        assert_eq!(map.fraction_within(right), 0.0);
    }

    #[test]
    fn resized_frames_restart_the_comparison() {
        let mut estimator = MotionEstimator::new();
        estimator.update(&flat(0));
        let bigger = RgbaImage::from_pixel(40, 20, Rgba([255, 255, 255, 255]));
        assert_eq!(estimator.update(&bigger).score, 0.0);
    }

    #[test]
    fn reset_forgets_the_snapshot() {
        let mut estimator = MotionEstimator::new();
        estimator.remember(&flat(0));
        estimator.reset();
        assert_eq!(estimator.update(&flat(255)).score, 0.0);
    }
}
