// THEORY:
// The `region` module is the ingestion edge of the engine. Users draw parking spaces
// either on a normalized canvas (every coordinate in [0,1]) or directly in image
// pixels. The convention is resolved exactly once, here, and attached to every region as
// a `Coordinates` tag, so the feature extractor and the verification crop can never
// disagree about what a point means.
//
// Key architectural principles:
// 1.  **Validate, don't abort**: a region with fewer than three points, a non-finite
//     coordinate or an empty id is dropped with a warning. Its neighbors are unaffected.
// 2.  **Scene-wide convention**: the normalized/pixel decision looks at all points of all
//     valid regions together, matching how the regions were drawn (on one canvas).
// 3.  **Resolution independence**: any region can be re-expressed in normalized space or
//     in the pixel space of an arbitrary resolution, which is how the same region is
//     mapped onto the processing frame and onto the full-resolution source.

use crate::error::{LotError, LotResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

const MIN_POINTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    fn is_unit(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Rectangle,
    Quadrilateral,
}

/// A parking space exactly as the caller drew it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInput {
    pub id: String,
    pub points: Vec<Point>,
    #[serde(rename = "type")]
    pub shape: Shape,
}

impl RegionInput {
    pub fn new(id: impl Into<String>, points: Vec<Point>, shape: Shape) -> Self {
        Self {
            id: id.into(),
            points,
            shape,
        }
    }

    /// Geometry check: non-empty id, at least three points, all coordinates finite.
    pub fn validate(&self) -> LotResult<()> {
        if self.id.trim().is_empty() {
            return Err(LotError::region_invalid(&self.id, "empty id"));
        }
        if self.points.len() < MIN_POINTS {
            return Err(LotError::region_invalid(
                &self.id,
                format!("{} points, need at least {}", self.points.len(), MIN_POINTS),
            ));
        }
        if let Some(bad) = self.points.iter().find(|p| !p.is_finite()) {
            return Err(LotError::region_invalid(
                &self.id,
                format!("non-finite coordinate ({}, {})", bad.x, bad.y),
            ));
        }
        Ok(())
    }
}

/// Which space a region's points live in, resolved once at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "space", content = "points", rename_all = "lowercase")]
pub enum Coordinates {
    Normalized(Vec<Point>),
    Pixel(Vec<Point>),
}

impl Coordinates {
    pub fn points(&self) -> &[Point] {
        match self {
            Coordinates::Normalized(points) | Coordinates::Pixel(points) => points,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub shape: Shape,
    pub coordinates: Coordinates,
}

impl Region {
    /// The same region expressed in [0,1] space. `intrinsic` is the size pixel
    /// coordinates were drawn against; points past the frame edge are clamped onto it.
    pub fn to_normalized(&self, intrinsic: (u32, u32)) -> Region {
        let points = match &self.coordinates {
            Coordinates::Normalized(points) => points.clone(),
            Coordinates::Pixel(points) => {
                let (w, h) = (intrinsic.0.max(1) as f64, intrinsic.1.max(1) as f64);
                points
                    .iter()
                    .map(|p| Point::new((p.x / w).clamp(0.0, 1.0), (p.y / h).clamp(0.0, 1.0)))
                    .collect()
            }
        };
        Region {
            id: self.id.clone(),
            shape: self.shape,
            coordinates: Coordinates::Normalized(points),
        }
    }

    /// Points projected into a `width` x `height` raster.
    pub fn points_in(&self, width: u32, height: u32, intrinsic: (u32, u32)) -> Vec<Point> {
        let (w, h) = (width as f64, height as f64);
        match &self.coordinates {
            Coordinates::Normalized(points) => {
                points.iter().map(|p| Point::new(p.x * w, p.y * h)).collect()
            }
            Coordinates::Pixel(points) => {
                let sx = w / intrinsic.0.max(1) as f64;
                let sy = h / intrinsic.1.max(1) as f64;
                points.iter().map(|p| Point::new(p.x * sx, p.y * sy)).collect()
            }
        }
    }

    /// Bounding box in a `width` x `height` raster, clamped to its bounds.
    pub fn bounds_in(&self, width: u32, height: u32, intrinsic: (u32, u32)) -> BoundingBox {
        BoundingBox::around(&self.points_in(width, height, intrinsic), width, height)
    }

    /// Polygon area over bounding-box area: 1.0 for an axis-aligned rectangle, lower the
    /// more the drawn shape is skewed by camera perspective.
    pub fn perspective_score(&self, width: u32, height: u32, intrinsic: (u32, u32)) -> f64 {
        let points = self.points_in(width, height, intrinsic);
        let bounds = BoundingBox::around(&points, u32::MAX, u32::MAX);
        let box_area = bounds.area() as f64;
        if box_area <= 0.0 {
            return 0.0;
        }
        (polygon_area(&points) / box_area).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn around(points: &[Point], max_width: u32, max_height: u32) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let clamp_x = |v: f64| v.clamp(0.0, max_width as f64) as u32;
        let clamp_y = |v: f64| v.clamp(0.0, max_height as f64) as u32;
        let (x0, y0) = (clamp_x(min_x.floor()), clamp_y(min_y.floor()));
        let (x1, y1) = (clamp_x(max_x.ceil()), clamp_y(max_y.ceil()));
        Self {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_smaller_than(&self, min_size: u32) -> bool {
        self.width < min_size || self.height < min_size
    }
}

/// Shoelace formula.
fn polygon_area(points: &[Point]) -> f64 {
    let n = points.len();
    if n < MIN_POINTS {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice.abs() / 2.0
}

/// Validates the raw regions and tags the survivors with their coordinate convention.
/// Each survivor keeps its index in `inputs`, which becomes its stable space id.
pub fn ingest(inputs: &[RegionInput]) -> Vec<(usize, Region)> {
    let valid: Vec<(usize, &RegionInput)> = inputs
        .iter()
        .enumerate()
        .filter(|(_, input)| match input.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "dropping region");
                false
            }
        })
        .collect();

    let normalized = valid.iter().all(|(_, input)| input.points.iter().all(Point::is_unit));

    valid
        .into_iter()
        .map(|(index, input)| {
            let points = input.points.clone();
            let coordinates = if normalized {
                Coordinates::Normalized(points)
            } else {
                Coordinates::Pixel(points)
            };
            (
                index,
                Region {
                    id: input.id.clone(),
                    shape: input.shape,
                    coordinates,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(id: &str, x: f64, y: f64, size: f64) -> RegionInput {
        RegionInput::new(
            id,
            vec![
                Point::new(x, y),
                Point::new(x + size, y),
                Point::new(x + size, y + size),
                Point::new(x, y + size),
            ],
            Shape::Rectangle,
        )
    }

    #[test]
    fn drops_invalid_regions_and_keeps_indices() {
        let inputs = vec![
            square("a", 0.1, 0.1, 0.2),
            RegionInput::new(
                "b",
                vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)],
                Shape::Rectangle,
            ),
            RegionInput::new(
                "c",
                vec![Point::new(0.0, 0.0), Point::new(f64::NAN, 0.5), Point::new(1.0, 1.0)],
                Shape::Quadrilateral,
            ),
            square("", 0.1, 0.1, 0.2),
            square("e", 0.5, 0.5, 0.2),
        ];

        let regions = ingest(&inputs);
        let indices: Vec<usize> = regions.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 4]);
        assert!(matches!(regions[0].1.coordinates, Coordinates::Normalized(_)));
    }

    #[test]
    fn one_pixel_region_switches_the_whole_scene_to_pixels() {
        let inputs = vec![square("a", 0.1, 0.1, 0.2), square("b", 100.0, 50.0, 40.0)];
        let regions = ingest(&inputs);
        assert!(regions
            .iter()
            .all(|(_, r)| matches!(r.coordinates, Coordinates::Pixel(_))));
    }

    #[test]
    fn pixel_regions_normalize_against_intrinsic_size() {
        let regions = ingest(&[square("a", 100.0, 50.0, 200.0)]);
        let normalized = regions[0].1.to_normalized((400, 200));
        let points = normalized.coordinates.points();
        assert_eq!(points[0], Point::new(0.25, 0.25));
        // The square hangs off the bottom edge.
        assert_eq!(points[2], Point::new(0.75, 1.0));
        assert!(points.iter().all(|p| (0.0..=1.0).contains(&p.y)));
    }

    #[test]
    fn bounds_scale_into_processing_space() {
        let regions = ingest(&[square("a", 0.25, 0.5, 0.25)]);
        let bounds = regions[0].1.bounds_in(1280, 720, (1920, 1080));
        assert_eq!(
            bounds,
            BoundingBox {
                x: 320,
                y: 360,
                width: 320,
                height: 180
            }
        );
        assert!(!bounds.is_smaller_than(20));
    }

    #[test]
    fn perspective_score_penalizes_skew() {
        let rect = ingest(&[square("a", 0.1, 0.1, 0.4)]);
        assert!((rect[0].1.perspective_score(100, 100, (100, 100)) - 1.0).abs() < 1e-9);

        let skewed = ingest(&[RegionInput::new(
            "b",
            vec![
                Point::new(0.0, 0.0),
                Point::new(1.0, 0.0),
                Point::new(0.5, 1.0),
            ],
            Shape::Quadrilateral,
        )]);
        assert!((skewed[0].1.perspective_score(100, 100, (100, 100)) - 0.5).abs() < 1e-9);
    }
}
