// THEORY:
// This file is the main entry point for the `lot_vision` library crate, a parking
// occupancy engine. Callers hand it a frame, the parking spaces drawn over it and the
// previous result, and get back one occupancy decision per space.
//
// The public surface is the `DetectionEngine` in `pipeline` together with its
// configuration and report types. The analysis stages live in `core_modules` and are
// public so each one can be reused and tested on its own.

pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use core_modules::frame::{RasterSource, SourceKind, StillImage, VideoFrame};
pub use core_modules::oracle::{
    ClassLabel, DetectedObject, ImageClassifier, ObjectDetector, OracleLoader,
};
pub use core_modules::region::{Point, RegionInput, Shape};
pub use core_modules::space::ParkingSpace;
pub use error::{LotError, LotResult};
pub use pipeline::{DetectionEngine, DetectionReport, PipelineConfig, Settings, SettingsUpdate};
