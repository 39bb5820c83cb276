//! Error taxonomy for the occupancy engine.
//!
//! Only `InvalidSource` ever escapes `DetectionEngine::detect`. Every other variant is
//! built, logged, and folded into a degraded result by the stage that produced it.

use crate::core_modules::utils::retry::RetryError;
use thiserror::Error;

/// Result type for occupancy detection.
pub type LotResult<T> = Result<T, LotError>;

#[derive(Debug, Error)]
pub enum LotError {
    /// The frame is missing, failed to decode, or has no usable dimensions.
    #[error("invalid frame source: {0}")]
    InvalidSource(String),

    #[error("region '{id}' is invalid: {reason}")]
    RegionInvalid { id: String, reason: String },

    #[error("region '{id}' is too small ({width}x{height} px)")]
    RegionTooSmall { id: String, width: u32, height: u32 },

    #[error("model load failed: {0}")]
    ModelLoadFailure(String),

    #[error("verification failed: {0}")]
    VerificationFailure(String),
}

impl LotError {
    pub fn invalid_source(message: impl Into<String>) -> Self {
        Self::InvalidSource(message.into())
    }

    pub fn region_invalid(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RegionInvalid {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn model_load(message: impl Into<String>) -> Self {
        Self::ModelLoadFailure(message.into())
    }

    pub fn verification(message: impl Into<String>) -> Self {
        Self::VerificationFailure(message.into())
    }

    /// True for the failures that must abort a detection call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidSource(_))
    }
}

impl From<RetryError> for LotError {
    fn from(e: RetryError) -> Self {
        LotError::model_load(e.to_string())
    }
}
