//! # Error Module
//!
//! Typed errors for the tuner engine. "No pitch this tick" is not an error:
//! silence and low confidence are ordinary [`crate::pitch::PitchEstimate`]
//! variants.

use thiserror::Error;

/// Errors produced by the estimator, tuning tables, engine and sampling loop.
#[derive(Debug, Error)]
pub enum TunerError {
    /// A buffer does not have the shape the estimator was configured for.
    /// This is a programming error in the caller.
    #[error(
        "buffer shape mismatch: expected {expected_len} samples at {expected_rate} Hz, \
         got {actual_len} samples at {actual_rate} Hz"
    )]
    ConfigMismatch {
        expected_len: usize,
        actual_len: usize,
        expected_rate: u32,
        actual_rate: u32,
    },
    /// The audio source could not deliver samples (permission denied, device
    /// busy, stream closed).
    #[error("audio device unavailable: {reason}")]
    DeviceUnavailable { reason: String },
    /// A tuning table could not be built from the given entries.
    #[error("invalid tuning: {reason}")]
    InvalidTuning { reason: String },
    /// A user-supplied tuning string contained a token that is not a valid
    /// target frequency.
    #[error("invalid tuning string: bad token '{token}'")]
    InvalidTuningString { token: String },
    /// Configuration values are inconsistent or out of their domain.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl TunerError {
    pub(crate) fn device(reason: impl Into<String>) -> Self {
        TunerError::DeviceUnavailable {
            reason: reason.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        TunerError::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether the error is a caller bug rather than a runtime condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TunerError::ConfigMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, TunerError>;
