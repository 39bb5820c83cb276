// THEORY:
// The `frame` module is the bridge between whatever the caller is looking at (a decoded
// still image or the current frame of a video) and the raster math of the engine. It
// owns two questions: "is this source usable at all?" and "at what resolution do we
// analyze it?".
//
// Key architectural principles:
// 1.  **Source abstraction**: `RasterSource` is the only thing the engine knows about
//     frames. It reports intrinsic size, playback state and an RGBA buffer.
// 2.  **Aspect-preserving processing size**: the analysis raster fits inside a fixed box
//     (1280x720 by default) along whichever axis is the tighter constraint. Regions are
//     never stretched.
// 3.  **Scoped buffers**: a `FrameSnapshot` owns both the full-resolution and processing
//     rasters for exactly one detection call and is dropped when the call ends.

use crate::core_modules::region::BoundingBox;
use crate::error::{LotError, LotResult};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Still,
    Video,
}

/// Anything that can hand the engine an RGBA raster.
pub trait RasterSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Native width and height of the source, before any scaling.
    fn intrinsic_size(&self) -> (u32, u32);

    /// True once a video source has finished playback.
    fn has_ended(&self) -> bool {
        false
    }

    fn to_rgba(&self) -> LotResult<RgbaImage>;
}

/// A decoded still image.
pub struct StillImage {
    image: DynamicImage,
}

impl StillImage {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    /// Decodes an encoded image (PNG, JPEG, ...).
    pub fn from_bytes(bytes: &[u8]) -> LotResult<Self> {
        image::load_from_memory(bytes)
            .map(Self::new)
            .map_err(|e| LotError::invalid_source(format!("image failed to decode: {e}")))
    }

    pub fn open(path: impl AsRef<Path>) -> LotResult<Self> {
        let path = path.as_ref();
        image::open(path)
            .map(Self::new)
            .map_err(|e| LotError::invalid_source(format!("{}: {e}", path.display())))
    }
}

impl RasterSource for StillImage {
    fn kind(&self) -> SourceKind {
        SourceKind::Still
    }

    fn intrinsic_size(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    fn to_rgba(&self) -> LotResult<RgbaImage> {
        Ok(self.image.to_rgba8())
    }
}

/// The current frame of a live or recorded video.
pub struct VideoFrame {
    pixels: RgbaImage,
    ended: bool,
}

impl VideoFrame {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            ended: false,
        }
    }

    /// Wraps a raw RGBA buffer, failing when it does not hold `width * height` samples.
    pub fn from_raw(width: u32, height: u32, buffer: Vec<u8>) -> LotResult<Self> {
        RgbaImage::from_raw(width, height, buffer)
            .map(Self::new)
            .ok_or_else(|| {
                LotError::invalid_source(format!("buffer does not match {width}x{height} RGBA"))
            })
    }

    /// Marks the frame as the last one of a finished playback.
    pub fn ended(mut self) -> Self {
        self.ended = true;
        self
    }
}

impl RasterSource for VideoFrame {
    fn kind(&self) -> SourceKind {
        SourceKind::Video
    }

    fn intrinsic_size(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    fn has_ended(&self) -> bool {
        self.ended
    }

    fn to_rgba(&self) -> LotResult<RgbaImage> {
        Ok(self.pixels.clone())
    }
}

/// Largest size with the source's aspect ratio that fits inside `target`.
pub fn fit_within(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = (source.0.max(1) as u64, source.1.max(1) as u64);
    let (tw, th) = (target.0.max(1) as u64, target.1.max(1) as u64);
    if sw * th >= sh * tw {
        // Width is the tighter constraint.
        let height = ((tw * sh) as f64 / sw as f64).round() as u32;
        (tw as u32, height.max(1))
    } else {
        let width = ((th * sw) as f64 / sh as f64).round() as u32;
        (width.max(1), th as u32)
    }
}

/// Rasters for a single detection call.
pub struct FrameSnapshot {
    /// Full-resolution frame, used for verification crops.
    pub full: RgbaImage,
    /// Frame scaled to the processing size, used for features and motion.
    pub processed: RgbaImage,
}

impl FrameSnapshot {
    pub fn capture(source: &dyn RasterSource, target: (u32, u32)) -> LotResult<Self> {
        let (width, height) = source.intrinsic_size();
        if width == 0 || height == 0 {
            return Err(LotError::invalid_source(format!(
                "{:?} source has zero intrinsic dimensions",
                source.kind()
            )));
        }
        let full = source.to_rgba()?;
        if full.width() == 0 || full.height() == 0 {
            return Err(LotError::invalid_source("decoded raster is empty"));
        }

        let (pw, ph) = fit_within(full.dimensions(), target);
        let processed = if (pw, ph) == full.dimensions() {
            full.clone()
        } else {
            imageops::resize(&full, pw, ph, FilterType::Triangle)
        };
        Ok(Self { full, processed })
    }

    pub fn intrinsic_size(&self) -> (u32, u32) {
        self.full.dimensions()
    }

    pub fn processing_size(&self) -> (u32, u32) {
        self.processed.dimensions()
    }

    pub fn crop_processed(&self, bounds: BoundingBox) -> RgbaImage {
        crop(&self.processed, bounds)
    }

    pub fn crop_full(&self, bounds: BoundingBox) -> RgbaImage {
        crop(&self.full, bounds)
    }
}

fn crop(image: &RgbaImage, bounds: BoundingBox) -> RgbaImage {
    imageops::crop_imm(image, bounds.x, bounds.y, bounds.width, bounds.height).to_image()
}
