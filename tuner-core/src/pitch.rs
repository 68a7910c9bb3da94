//! # Pitch Detection Module
//!
//! This module estimates the fundamental frequency of one window of a
//! monophonic signal. It uses a normalized autocorrelation (the normalized
//! square difference function, NSDF) computed with an FFT, picks the pitch
//! period among the correlation peaks and refines it to sub-sample precision.
//!
//! ## Features
//! - RMS noise gate that skips the correlation entirely for silent buffers
//! - Lag range derived from the configured frequency range
//! - Octave error prevention through a tolerance band around the strongest peak
//! - Parabolic interpolation for sub-sample accuracy

use crate::buffer::{self, SampleBuffer};
use crate::config::EstimatorConfig;
use crate::error::{Result, TunerError};
use crate::fft::{self, Autocorrelator};

/// Why no pitch was reported for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoPitch {
    /// The buffer RMS was below the silence threshold.
    Silence,
    /// No correlation peak was strong enough to be trusted.
    LowConfidence,
    /// The refined frequency fell outside the configured range.
    OutOfRange,
}

/// Outcome of a single estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PitchEstimate {
    Detected {
        /// Fundamental frequency in Hz, inside the configured range.
        frequency_hz: f32,
        /// Normalized correlation of the chosen period (0.0 to 1.0).
        clarity: f32,
    },
    NotDetected(NoPitch),
}

impl PitchEstimate {
    pub fn frequency(&self) -> Option<f32> {
        match self {
            PitchEstimate::Detected { frequency_hz, .. } => Some(*frequency_hz),
            PitchEstimate::NotDetected(_) => None,
        }
    }

    pub fn clarity(&self) -> Option<f32> {
        match self {
            PitchEstimate::Detected { clarity, .. } => Some(*clarity),
            PitchEstimate::NotDetected(_) => None,
        }
    }

    pub fn is_detected(&self) -> bool {
        matches!(self, PitchEstimate::Detected { .. })
    }
}

/// An NSDF maximum that may or may not correspond to the pitch period.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Peak {
    /// Lag in samples, approximated using parabolic interpolation.
    lag: f32,
    /// NSDF value at the interpolated lag.
    value: f32,
}

impl Peak {
    /// Fits a parabola through the maximum at `index` and its two neighbors.
    fn refine(nsdf: &[f32], index: usize) -> Self {
        let left = nsdf[index - 1];
        let center = nsdf[index];
        let right = nsdf[index + 1];

        // Coefficients of ax^2 + bx + c through (-1, left), (0, center), (1, right)
        let a = 0.5 * (right - 2.0 * center + left);
        let b = 0.5 * (right - left);
        let x_max = if a != 0.0 { (-b / (2.0 * a)).clamp(-1.0, 1.0) } else { 0.0 };

        Peak {
            lag: index as f32 + x_max,
            value: a * x_max * x_max + b * x_max + center,
        }
    }
}

/// Autocorrelation-based fundamental frequency estimator.
///
/// The estimator is a pure function of its configuration and the buffer it
/// is given. The planned FFTs are the only state it keeps.
#[derive(Debug, Clone)]
pub struct PitchEstimator {
    config: EstimatorConfig,
    correlator: Autocorrelator,
    min_lag: usize,
    max_lag: usize,
}

impl PitchEstimator {
    pub fn new(config: &EstimatorConfig) -> Result<Self> {
        let min_lag = config.min_lag();
        let max_lag = config.max_lag();
        // One extra lag so the peak at max_lag still has a right neighbor.
        let lag_count = max_lag
            .checked_add(2)
            .filter(|&n| n <= config.window_size_samples);
        let Some(lag_count) = lag_count.filter(|_| min_lag < max_lag) else {
            return Err(TunerError::config(format!(
                "lag range {min_lag}..={max_lag} does not fit a window of {} samples",
                config.window_size_samples
            )));
        };

        Ok(Self {
            config: *config,
            correlator: Autocorrelator::new(config.window_size_samples, lag_count),
            min_lag,
            max_lag,
        })
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Lags, in samples, that can hold a reported pitch period.
    pub fn lag_range(&self) -> std::ops::RangeInclusive<usize> {
        self.min_lag..=self.max_lag
    }

    /// Estimates the fundamental frequency of `buffer`.
    ///
    /// # Returns
    /// * `Ok(PitchEstimate::Detected { .. })` - Frequency within `[f_min, f_max]`
    /// * `Ok(PitchEstimate::NotDetected(_))` - Silence, noise, or out-of-range result
    /// * `Err(TunerError::ConfigMismatch { .. })` - Buffer length or rate differs from the configuration
    pub fn estimate(&self, buffer: &SampleBuffer) -> Result<PitchEstimate> {
        if buffer.len() != self.config.window_size_samples
            || buffer.sample_rate() != self.config.sample_rate_hz
        {
            return Err(TunerError::ConfigMismatch {
                expected_len: self.config.window_size_samples,
                actual_len: buffer.len(),
                expected_rate: self.config.sample_rate_hz,
                actual_rate: buffer.sample_rate(),
            });
        }

        let mut signal = buffer.samples().to_vec();
        fft::remove_dc_offset(&mut signal);

        // --- Noise Gate: Calculate RMS to filter out silence ---
        if buffer::rms(&signal) < self.config.silence_rms_threshold {
            return Ok(PitchEstimate::NotDetected(NoPitch::Silence));
        }

        let nsdf = self.nsdf(&signal);
        let peaks = self.find_peaks(&nsdf);

        let Some(global_max) = peaks.iter().map(|p| p.value).reduce(f32::max) else {
            return Ok(PitchEstimate::NotDetected(NoPitch::LowConfidence));
        };
        if global_max < self.config.confidence_threshold {
            return Ok(PitchEstimate::NotDetected(NoPitch::LowConfidence));
        }

        let Some(period) = self.select_period(&peaks, global_max) else {
            return Ok(PitchEstimate::NotDetected(NoPitch::LowConfidence));
        };

        let frequency = self.config.sample_rate_hz as f32 / period.lag;
        if !frequency.is_finite()
            || frequency < self.config.f_min_hz
            || frequency > self.config.f_max_hz
        {
            return Ok(PitchEstimate::NotDetected(NoPitch::OutOfRange));
        }

        Ok(PitchEstimate::Detected {
            frequency_hz: frequency,
            clarity: period.value.clamp(0.0, 1.0),
        })
    }

    /// n(τ) = 2·r(τ) / m(τ), where m(τ) is the energy of the two overlapping
    /// segments at lag τ. n(0) is 1 for any non-silent signal.
    fn nsdf(&self, signal: &[f32]) -> Vec<f32> {
        let autocorr = self.correlator.autocorrelate(signal);
        let window_size = signal.len();

        let mut nsdf = Vec::with_capacity(autocorr.len());
        // m is updated by subtracting the two samples that leave the overlap.
        let mut m = 2.0 * autocorr[0] as f64;
        for (tau, &r) in autocorr.iter().enumerate() {
            if tau > 0 {
                let leaving_tail = signal[window_size - tau] as f64;
                let leaving_head = signal[tau - 1] as f64;
                m -= leaving_tail * leaving_tail + leaving_head * leaving_head;
            }
            let value = if m > f64::EPSILON { 2.0 * r as f64 / m } else { 0.0 };
            nsdf.push(value as f32);
        }
        nsdf
    }

    /// Collects the positive local maxima up to the longest lag, in lag order.
    ///
    /// Only strict rises count, so the slope leaving the zero-lag maximum is
    /// never reported as a peak. Lags shorter than `min_lag` are kept: a tone
    /// above `f_max` also correlates at multiples of its period that fall in
    /// range, and the short peak is what reveals it.
    fn find_peaks(&self, nsdf: &[f32]) -> Vec<Peak> {
        (1..=self.max_lag)
            .filter(|&tau| {
                nsdf[tau] > 0.0 && nsdf[tau] > nsdf[tau - 1] && nsdf[tau] >= nsdf[tau + 1]
            })
            .map(|tau| Peak::refine(nsdf, tau))
            .collect()
    }

    /// Picks the pitch period among the peaks.
    ///
    /// Starts at the shortest lag within the tolerance band and moves to the
    /// peak near twice that lag while the longer one is clearly stronger. A
    /// strong second harmonic produces an in-band peak at half the period,
    /// which this walks past; a pure tone has equally strong peaks at every
    /// multiple of its period, so it stays on the first.
    fn select_period(&self, peaks: &[Peak], global_max: f32) -> Option<Peak> {
        let floor = self.config.octave_tolerance * global_max;
        let in_band: Vec<Peak> = peaks.iter().copied().filter(|p| p.value >= floor).collect();

        let mut current = *in_band.first()?;
        loop {
            let target = 2.0 * current.lag;
            let reach = (current.lag / 16.0).max(2.0);
            let longer = in_band
                .iter()
                .filter(|p| (p.lag - target).abs() <= reach)
                .max_by(|a, b| a.value.total_cmp(&b.value));

            match longer {
                Some(p) if p.value > current.value + self.config.octave_margin => current = *p,
                _ => break,
            }
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunerConfig;
    use std::f32::consts::PI;

    const SAMPLE_RATE: u32 = 44100;
    const WINDOW: usize = 4096;

    fn estimator() -> PitchEstimator {
        PitchEstimator::new(&TunerConfig::default().estimator()).unwrap()
    }

    fn generate(partials: &[(f32, f32)], sample_count: usize) -> SampleBuffer {
        let samples = (0..sample_count)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                partials
                    .iter()
                    .map(|&(freq, amp)| amp * (2.0 * PI * freq * t).sin())
                    .sum()
            })
            .collect();
        SampleBuffer::new(samples, SAMPLE_RATE)
    }

    fn generate_sine(frequency: f32, amplitude: f32) -> SampleBuffer {
        generate(&[(frequency, amplitude)], WINDOW)
    }

    fn detected(estimate: PitchEstimate) -> f32 {
        match estimate {
            PitchEstimate::Detected { frequency_hz, .. } => frequency_hz,
            other => panic!("expected a detection, got {other:?}"),
        }
    }

    #[test]
    fn test_sine_detection() {
        let estimator = estimator();
        for frequency in [72.0, 82.41, 110.0, 146.83, 196.0, 246.94, 329.63, 440.0, 659.25, 880.0, 1046.5] {
            let estimate = estimator.estimate(&generate_sine(frequency, 0.5)).unwrap();
            let found = detected(estimate);
            assert!(
                (found - frequency).abs() < 1.0,
                "expected {frequency} Hz, got {found} Hz"
            );
            assert!(estimate.clarity().unwrap() > 0.9);
        }
    }

    #[test]
    fn test_silence() {
        let estimator = estimator();
        let zeros = SampleBuffer::new(vec![0.0; WINDOW], SAMPLE_RATE);
        assert_eq!(
            estimator.estimate(&zeros).unwrap(),
            PitchEstimate::NotDetected(NoPitch::Silence)
        );

        let whisper = generate_sine(220.0, 0.005);
        assert_eq!(
            estimator.estimate(&whisper).unwrap(),
            PitchEstimate::NotDetected(NoPitch::Silence)
        );

        // A constant offset carries no pitch and is removed before gating.
        let offset = SampleBuffer::new(vec![0.4; WINDOW], SAMPLE_RATE);
        assert_eq!(
            estimator.estimate(&offset).unwrap(),
            PitchEstimate::NotDetected(NoPitch::Silence)
        );
    }

    #[test]
    fn test_noise_is_low_confidence() {
        // Deterministic LCG noise in [-0.5, 0.5)
        let mut state: u32 = 0x1234_5678;
        let samples = (0..WINDOW)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
            })
            .collect();
        let noise = SampleBuffer::new(samples, SAMPLE_RATE);
        assert_eq!(
            estimator().estimate(&noise).unwrap(),
            PitchEstimate::NotDetected(NoPitch::LowConfidence)
        );
    }

    #[test]
    fn test_strong_second_harmonic_keeps_fundamental() {
        let estimator = estimator();
        for (fundamental, harmonic) in [(1.0, 1.0), (0.6, 0.8), (0.2, 1.0)] {
            let buffer = generate(&[(110.0, 0.4 * fundamental), (220.0, 0.4 * harmonic)], WINDOW);
            let found = detected(estimator.estimate(&buffer).unwrap());
            assert!(
                (found - 110.0).abs() < 1.0,
                "amplitudes {fundamental}/{harmonic}: got {found} Hz"
            );
        }
    }

    #[test]
    fn test_plucked_string_harmonics() {
        let buffer = generate(
            &[(82.41, 0.3), (164.82, 0.25), (247.23, 0.15), (329.64, 0.1)],
            WINDOW,
        );
        let found = detected(estimator().estimate(&buffer).unwrap());
        assert!((found - 82.41).abs() < 1.0, "got {found} Hz");
    }

    #[test]
    fn test_estimate_is_deterministic() {
        let estimator = estimator();
        let buffer = generate_sine(196.0, 0.7);
        let first = estimator.estimate(&buffer).unwrap();
        let second = estimator.estimate(&buffer).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_shape_mismatch() {
        let estimator = estimator();
        let short = SampleBuffer::new(vec![0.0; WINDOW / 2], SAMPLE_RATE);
        assert!(matches!(
            estimator.estimate(&short),
            Err(TunerError::ConfigMismatch { expected_len: WINDOW, actual_len: 2048, .. })
        ));

        let wrong_rate = SampleBuffer::new(vec![0.0; WINDOW], 48000);
        let err = estimator.estimate(&wrong_rate).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_out_of_range_tone() {
        // Far above f_max; its third period (1000 Hz) is inside the range.
        let buffer = generate_sine(3000.0, 0.5);
        assert_eq!(
            estimator().estimate(&buffer).unwrap(),
            PitchEstimate::NotDetected(NoPitch::OutOfRange)
        );
    }

    #[test]
    fn peak_interpolation() {
        let nsdf = [0.0, 0.0, 3.0, 0.0];
        let peak = Peak::refine(&nsdf, 2);
        assert!((peak.lag - 2.0).abs() <= f32::EPSILON);
        assert!((peak.value - 3.0).abs() <= f32::EPSILON);

        let nsdf = [-2.0, 0.0, -1.0];
        let peak = Peak::refine(&nsdf, 1);
        assert!((peak.lag - 1.1666666).abs() <= 1e-6);
    }

    #[test]
    fn lag_range_follows_frequency_range() {
        assert_eq!(estimator().lag_range(), 40..=630);
    }

    #[test]
    fn new_rejects_window_too_small_for_range() {
        let config = EstimatorConfig {
            window_size_samples: 512,
            ..TunerConfig::default().estimator()
        };
        assert!(matches!(
            PitchEstimator::new(&config),
            Err(TunerError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn new_rejects_saturated_lag() {
        let config = EstimatorConfig {
            f_min_hz: 1e-30,
            ..TunerConfig::default().estimator()
        };
        assert_eq!(config.max_lag(), usize::MAX);
        assert!(matches!(
            PitchEstimator::new(&config),
            Err(TunerError::InvalidConfig { .. })
        ));
    }
}
