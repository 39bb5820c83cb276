// THEORY:
// The `features` module turns the pixels inside one parking space into a handful of
// normalized scalars. Each one answers a different question about the space:
//
// - brightness:          how lit is it?
// - non-zero coverage:   how much of it rises above sensor noise?
// - edge density:        how many sharp gradients (vehicle outlines, glass, trim)?
// - texture complexity:  how much of it is locally "uniform" (flat or a single edge)?
// - color variance:      how colorful / varied is it?
// - shadow score:        does it look like a cast shadow rather than an object?
//
// A vehicle tends to be edgy, varied and bright enough; a shadow is dark, smooth and
// monochrome. The classifier weighs these against each other, the stabilizer compares
// them across frames.

use crate::core_modules::pixel::pixel::Pixel;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Base occupancy threshold before lighting and color adjustments.
pub const BASE_THRESHOLD: f64 = 0.5;

/// Transitions around the LBP ring at or below which a pattern counts as uniform.
const UNIFORM_TRANSITIONS: u32 = 2;

// Shadow signature weights.
const SHADOW_EDGE_WEIGHT: f64 = 0.4;
const SHADOW_TEXTURE_WEIGHT: f64 = 0.3;
const SHADOW_COLOR_WEIGHT: f64 = 0.2;
const SHADOW_BRIGHTNESS_WEIGHT: f64 = 0.1;

/// Neighbor offsets walked clockwise from the top-left corner.
const RING: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
];

/// Per-space feature bundle. Every field is a normalized scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub non_zero_coverage: f64,
    pub brightness: f64,
    pub edge_density: f64,
    pub texture_complexity: f64,
    pub perspective_score: f64,
    pub heatmap_score: f64,
    pub color_variance: f64,
    pub motion_score: f64,
    pub shadow_score: f64,
    /// Accumulates across frames in [0,1].
    pub stability_score: f64,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            non_zero_coverage: 0.0,
            brightness: 0.0,
            edge_density: 0.0,
            texture_complexity: 0.0,
            perspective_score: 0.0,
            heatmap_score: 0.0,
            color_variance: 0.0,
            motion_score: 0.0,
            shadow_score: 0.0,
            stability_score: 0.5,
        }
    }
}

impl Features {
    /// Occupancy threshold adjusted for this space: darker scenes and more color
    /// variance both raise the bar.
    pub fn dynamic_threshold(&self) -> f64 {
        dynamic_threshold(self.brightness, self.color_variance)
    }
}

pub fn dynamic_threshold(brightness: f64, color_variance: f64) -> f64 {
    BASE_THRESHOLD * (1.0 + (0.5 - brightness)) * (1.0 + color_variance)
}

/// Computes the pixel-derived features of a cropped region. Geometry and motion fields
/// are left at their defaults for the caller to fill in.
pub fn extract(crop: &RgbaImage) -> Features {
    let (width, height) = crop.dimensions();
    let pixel_count = width as usize * height as usize;
    if pixel_count == 0 {
        return Features::default();
    }

    let pixels: Vec<Pixel> = crop.pixels().map(Pixel::from).collect();
    let luma: Vec<f64> = pixels.iter().map(Pixel::luminance).collect();
    let n = pixel_count as f64;

    let brightness = luma.iter().sum::<f64>() / n / 255.0;
    let non_zero_coverage =
        pixels.iter().filter(|p| p.is_above_noise_floor()).count() as f64 / n;
    let edge_density = edge_density(&luma, width as usize, height as usize);
    let texture_complexity = texture_complexity(&luma, width as usize, height as usize);
    let color_variance = color_variance(&pixels);
    let shadow_score = shadow_score(edge_density, texture_complexity, color_variance, brightness);

    Features {
        non_zero_coverage,
        brightness,
        edge_density,
        texture_complexity,
        color_variance,
        shadow_score,
        ..Features::default()
    }
}

/// Sum of 3x3 Sobel magnitudes over the luma plane, normalized by pixel count x 255.
fn edge_density(luma: &[f64], width: usize, height: usize) -> f64 {
    if width < 3 || height < 3 {
        return 0.0;
    }
    let at = |x: usize, y: usize| luma[y * width + x];
    let mut total = 0.0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
            total += (gx * gx + gy * gy).sqrt();
        }
    }
    (total / (luma.len() as f64 * 255.0)).min(1.0)
}

/// Fraction of interior pixels whose 8-neighbor local binary pattern is uniform.
fn texture_complexity(luma: &[f64], width: usize, height: usize) -> f64 {
    if width < 3 || height < 3 {
        return 0.0;
    }
    let mut uniform = 0usize;
    let mut interior = 0usize;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = luma[y * width + x];
            let bits = RING.map(|(dx, dy)| {
                let nx = (x as i64 + dx) as usize;
                let ny = (y as i64 + dy) as usize;
                luma[ny * width + nx] > center
            });
            let transitions = (0..bits.len())
                .filter(|&i| bits[i] != bits[(i + 1) % bits.len()])
                .count() as u32;
            if transitions <= UNIFORM_TRANSITIONS {
                uniform += 1;
            }
            interior += 1;
        }
    }
    uniform as f64 / interior as f64
}

/// Mean of the per-channel population variances, normalized by 255^2.
fn color_variance(pixels: &[Pixel]) -> f64 {
    let n = pixels.len() as f64;
    let mut sum = [0.0f64; 3];
    let mut sum_sq = [0.0f64; 3];
    for pixel in pixels {
        for (channel, value) in pixel.rgb().into_iter().enumerate() {
            sum[channel] += value;
            sum_sq[channel] += value * value;
        }
    }
    let variance: f64 = (0..3)
        .map(|c| {
            let mean = sum[c] / n;
            (sum_sq[c] / n - mean * mean).max(0.0)
        })
        .sum::<f64>()
        / 3.0;
    variance / (255.0 * 255.0)
}

/// Low values mean "looks like a shadow": dark, smooth, monochrome.
pub fn shadow_score(edge_density: f64, texture: f64, color_variance: f64, brightness: f64) -> f64 {
    let brightness_deviation = ((brightness - 0.5).abs() * 2.0).min(1.0);
    SHADOW_EDGE_WEIGHT * (1.0 - edge_density)
        + SHADOW_TEXTURE_WEIGHT * (1.0 - texture)
        + SHADOW_COLOR_WEIGHT * (1.0 - color_variance)
        + SHADOW_BRIGHTNESS_WEIGHT * (1.0 - brightness_deviation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gray(size: u32, level: u8) -> RgbaImage {
        RgbaImage::from_pixel(size, size, Rgba([level, level, level, 255]))
    }

    #[test]
    fn uniform_gray_is_flat_and_fully_uniform() {
        let features = extract(&gray(40, 128));
        assert!((features.brightness - 128.0 / 255.0).abs() < 1e-9);
        assert_eq!(features.non_zero_coverage, 1.0);
        assert_eq!(features.edge_density, 0.0);
        assert_eq!(features.texture_complexity, 1.0);
        assert!(features.color_variance.abs() < 1e-12);
        assert!(features.shadow_score > 0.69 && features.shadow_score < 0.7);
    }

    #[test]
    fn black_crop_has_no_coverage() {
        let features = extract(&gray(30, 10));
        assert_eq!(features.non_zero_coverage, 0.0);
    }

    #[test]
    fn stripes_are_edge_dense() {
        let stripes = RgbaImage::from_fn(40, 40, |x, _| {
            if (x / 2) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });
        let features = extract(&stripes);
        assert!(features.edge_density > 0.5);
        assert!((features.color_variance - 0.25).abs() < 1e-9);
    }

    #[test]
    fn noise_is_not_uniform() {
        let mut state: u32 = 0x2545_f491;
        let noise = RgbaImage::from_fn(48, 48, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let v = (state & 0xff) as u8;
            Rgba([v, v, v, 255])
        });
        assert!(extract(&noise).texture_complexity < 0.6);
    }

    #[test]
    fn threshold_rises_in_the_dark_and_with_color() {
        assert!((dynamic_threshold(0.5, 0.0) - BASE_THRESHOLD).abs() < 1e-12);
        assert!(dynamic_threshold(0.2, 0.0) > dynamic_threshold(0.5, 0.0));
        assert!(dynamic_threshold(0.5, 0.1) > dynamic_threshold(0.5, 0.0));
    }

    #[test]
    fn empty_crop_yields_defaults() {
        assert_eq!(extract(&RgbaImage::new(0, 0)), Features::default());
    }
}
