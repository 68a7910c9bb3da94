// tuner-core/src/lib.rs

//! The core logic for the string tuner.
//! This crate is responsible for pitch detection, matching detected pitches
//! against a tuning, and driving periodic sampling of an audio source. It is
//! completely headless and contains no UI code.

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod fft;
pub mod pitch;
pub mod sampling;
pub mod source;
pub mod tuning;

#[cfg(feature = "capture")]
pub mod audio;

pub use buffer::SampleBuffer;
pub use config::TunerConfig;
pub use engine::TunerEngine;
pub use error::TunerError;
pub use pitch::{NoPitch, PitchEstimate, PitchEstimator};
pub use sampling::{ResultSink, SamplingLoop};
pub use source::AudioSource;
pub use tuning::{Preset, TuningEntry, TuningTable};

/// Represents the result of classifying a single audio buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    /// The pitch estimate for the buffer.
    pub estimate: PitchEstimate,
    /// Index of the closest tuning entry, if a pitch was detected.
    pub matched_index: Option<usize>,
    /// Name of the closest tuning entry.
    pub matched_name: Option<String>,
    /// Detected minus target frequency in Hz (positive = sharp), 0 when
    /// nothing matched.
    pub deviation_hz: f32,
    /// The same deviation in cents.
    pub cents_deviation: Option<f32>,
    /// The nearest equal temperament note name.
    pub nearest_note: Option<String>,
    /// Whether the deviation is below the in-tune threshold.
    pub in_tune: bool,
}

impl ClassificationResult {
    /// A result for a buffer in which no pitch was found.
    pub fn undetected(estimate: PitchEstimate) -> Self {
        Self {
            estimate,
            matched_index: None,
            matched_name: None,
            deviation_hz: 0.0,
            cents_deviation: None,
            nearest_note: None,
            in_tune: false,
        }
    }

    pub fn frequency(&self) -> Option<f32> {
        self.estimate.frequency()
    }
}
