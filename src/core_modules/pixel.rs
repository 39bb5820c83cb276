// THEORY:
// The `Pixel` module is the smallest unit of the occupancy engine. It is a "dumb" data
// container for one RGBA sample plus the single-pixel heuristics every higher layer
// leans on: Rec. 601 luma and the noise-floor test used for coverage.
//
// Key principles:
// 1.  **Single-pixel scope**: nothing here reads neighbors or history. Gradients, local
//     binary patterns and frame differences live in `features` and `motion`.
// 2.  **One luma definition**: brightness, edges, texture and motion all derive from the
//     same `luminance()` so the features stay comparable with each other.

pub mod pixel {
    use image::Rgba;

    pub type Byte = u8;
    pub type Channel = Byte;
    pub type Luminance = f64;

    /// Channel value a sample must exceed to count as "non-zero" (25 / 255).
    pub const NOISE_FLOOR: Channel = 25;

    /// A "dumb" data container representing a single RGBA pixel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Pixel {
        pub red: Channel,
        pub green: Channel,
        pub blue: Channel,
        pub alpha: Channel,
    }

    impl Pixel {
        pub fn new(red: Channel, green: Channel, blue: Channel, alpha: Channel) -> Self {
            Pixel {
                red,
                green,
                blue,
                alpha,
            }
        }

        /// Luminance estimate (Rec. 601 luma) on the 0..255 scale.
        pub fn luminance(&self) -> Luminance {
            0.299 * self.red as f64 + 0.587 * self.green as f64 + 0.114 * self.blue as f64
        }

        /// True when any color channel rises above the sensor noise floor.
        pub fn is_above_noise_floor(&self) -> bool {
            self.red > NOISE_FLOOR || self.green > NOISE_FLOOR || self.blue > NOISE_FLOOR
        }

        pub fn rgb(&self) -> [f64; 3] {
            [self.red as f64, self.green as f64, self.blue as f64]
        }
    }

    impl From<&Rgba<Byte>> for Pixel {
        fn from(sample: &Rgba<Byte>) -> Self {
            let [red, green, blue, alpha] = sample.0;
            Pixel::new(red, green, blue, alpha)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::pixel::*;

    #[test]
    fn luminance_uses_rec601_weights() {
        let white = Pixel::new(255, 255, 255, 255);
        assert!((white.luminance() - 255.0).abs() < 1e-9);

        let green = Pixel::new(0, 100, 0, 255);
        assert!((green.luminance() - 58.7).abs() < 1e-9);
    }

    #[test]
    fn noise_floor_is_exclusive() {
        assert!(!Pixel::new(25, 25, 25, 255).is_above_noise_floor());
        assert!(Pixel::new(0, 26, 0, 255).is_above_noise_floor());
    }
}
