//! # Configuration Module
//!
//! Explicit, free-standing configuration for the engine. Every field has a
//! default matching a six-string guitar tuner, and the whole struct can be
//! loaded from JSON where missing keys fall back to those defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};
use crate::tuning::Preset;

/// Sample rate requested from the capture device.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Samples per analysis window (~93ms at 44.1kHz).
///
/// Large enough for three periods of the lowest default frequency, which the
/// estimator needs for stable low-string detection.
pub const DEFAULT_WINDOW_SIZE: usize = 4096;

/// Top-level tuner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TunerConfig {
    pub sample_rate_hz: u32,
    pub window_size_samples: usize,
    /// Lowest detectable frequency in Hz.
    pub f_min_hz: f32,
    /// Highest detectable frequency in Hz.
    pub f_max_hz: f32,
    /// RMS below which a buffer counts as silence.
    pub silence_rms_threshold: f32,
    /// Minimum normalized correlation of the chosen peak.
    pub confidence_threshold: f32,
    /// Peaks at least this fraction of the strongest peak compete for the
    /// pitch period.
    pub octave_tolerance: f32,
    /// How much stronger a peak at twice the lag has to be to win.
    pub octave_margin: f32,
    /// |deviation| below this many Hz counts as in tune.
    pub in_tune_threshold_hz: f32,
    pub sampling_period_ms: u64,
    /// Tuning active when the engine starts.
    pub preset: Preset,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE,
            window_size_samples: DEFAULT_WINDOW_SIZE,
            f_min_hz: 70.0,
            f_max_hz: 1100.0,
            silence_rms_threshold: 0.01,
            confidence_threshold: 0.5,
            octave_tolerance: 0.9,
            octave_margin: 0.02,
            in_tune_threshold_hz: 10.0,
            sampling_period_ms: 100,
            preset: Preset::Standard,
        }
    }
}

/// The subset of [`TunerConfig`] the pitch estimator depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    pub sample_rate_hz: u32,
    pub window_size_samples: usize,
    pub f_min_hz: f32,
    pub f_max_hz: f32,
    pub silence_rms_threshold: f32,
    pub confidence_threshold: f32,
    pub octave_tolerance: f32,
    pub octave_margin: f32,
}

impl EstimatorConfig {
    /// Shortest lag, in samples, that can hold a pitch period.
    pub fn min_lag(&self) -> usize {
        ((self.sample_rate_hz as f32 / self.f_max_hz).floor() as usize).max(1)
    }

    /// Longest lag, in samples, that can hold a pitch period.
    pub fn max_lag(&self) -> usize {
        (self.sample_rate_hz as f32 / self.f_min_hz).ceil() as usize
    }
}

impl TunerConfig {
    /// Parses a JSON document and validates it.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: TunerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn sampling_period(&self) -> Duration {
        Duration::from_millis(self.sampling_period_ms)
    }

    pub fn estimator(&self) -> EstimatorConfig {
        EstimatorConfig {
            sample_rate_hz: self.sample_rate_hz,
            window_size_samples: self.window_size_samples,
            f_min_hz: self.f_min_hz,
            f_max_hz: self.f_max_hz,
            silence_rms_threshold: self.silence_rms_threshold,
            confidence_threshold: self.confidence_threshold,
            octave_tolerance: self.octave_tolerance,
            octave_margin: self.octave_margin,
        }
    }

    /// Checks that every option is inside its domain and that the options
    /// are consistent with each other.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate_hz == 0 {
            return Err(TunerError::config("sample_rate_hz must be positive"));
        }
        if self.sampling_period_ms == 0 {
            return Err(TunerError::config("sampling_period_ms must be positive"));
        }
        if !(self.f_min_hz.is_finite() && self.f_min_hz > 0.0) {
            return Err(TunerError::config("f_min_hz must be a positive number"));
        }
        if !(self.f_max_hz.is_finite() && self.f_max_hz > self.f_min_hz) {
            return Err(TunerError::config("f_max_hz must be greater than f_min_hz"));
        }
        let nyquist = self.sample_rate_hz as f32 / 2.0;
        if self.f_max_hz >= nyquist {
            return Err(TunerError::config(format!(
                "f_max_hz must be below the Nyquist frequency ({nyquist} Hz)"
            )));
        }
        if !(self.silence_rms_threshold.is_finite() && self.silence_rms_threshold >= 0.0) {
            return Err(TunerError::config("silence_rms_threshold must be non-negative"));
        }
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("octave_tolerance", self.octave_tolerance),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(TunerError::config(format!("{name} must be in (0, 1]")));
            }
        }
        if !(self.octave_margin.is_finite() && self.octave_margin >= 0.0) {
            return Err(TunerError::config("octave_margin must be non-negative"));
        }
        if !(self.in_tune_threshold_hz.is_finite() && self.in_tune_threshold_hz > 0.0) {
            return Err(TunerError::config("in_tune_threshold_hz must be positive"));
        }

        // Checked before casting: a tiny f_min would saturate the lag.
        let longest_period = self.sample_rate_hz as f32 / self.f_min_hz;
        if !longest_period.is_finite() || longest_period > self.window_size_samples as f32 {
            return Err(TunerError::config(format!(
                "window_size_samples ({}) cannot hold one period of {} Hz",
                self.window_size_samples, self.f_min_hz
            )));
        }
        let max_lag = self.estimator().max_lag();
        let required = max_lag.checked_mul(2).and_then(|n| n.checked_add(2));
        if required.is_none_or(|n| self.window_size_samples < n) {
            return Err(TunerError::config(format!(
                "window_size_samples ({}) must be at least {} to resolve {} Hz",
                self.window_size_samples,
                required.map_or_else(|| "2 * max_lag + 2".to_string(), |n| n.to_string()),
                self.f_min_hz
            )));
        }
        Ok(())
    }
}
