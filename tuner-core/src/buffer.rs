//! # Sample Buffer Module
//!
//! One analysis window of normalized mono samples tagged with its sample
//! rate. Buffers are created once per sampling tick and never modified.

use std::time::Duration;

/// A fixed window of samples in [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Wraps already-normalized samples.
    ///
    /// Values outside [-1.0, 1.0] are clamped and non-finite values are
    /// replaced with silence so the estimator never sees NaN.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        for sample in samples.iter_mut() {
            *sample = if sample.is_finite() {
                sample.clamp(-1.0, 1.0)
            } else {
                0.0
            };
        }
        Self {
            samples,
            sample_rate,
        }
    }

    /// Converts signed 16-bit PCM into a normalized buffer.
    pub fn from_i16(pcm: &[i16], sample_rate: u32) -> Self {
        let samples = pcm
            .iter()
            .map(|&s| s as f32 / i16::MAX as f32)
            .collect();
        Self::new(samples, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Root-mean-square level of the window.
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }

    /// Wall-clock span covered by the window.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

pub(crate) fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_conversion_is_normalized() {
        let buffer = SampleBuffer::from_i16(&[0, i16::MAX, i16::MIN, i16::MAX / 2], 44100);
        let samples = buffer.samples();
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], 1.0);
        // i16::MIN / i16::MAX is slightly below -1 and gets clamped
        assert_eq!(samples[2], -1.0);
        assert!((samples[3] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn out_of_range_samples_are_sanitized() {
        let buffer = SampleBuffer::new(vec![2.0, -3.0, f32::NAN, f32::INFINITY, 0.25], 8000);
        assert_eq!(buffer.samples(), &[1.0, -1.0, 0.0, 0.0, 0.25]);
    }

    #[test]
    fn rms_and_duration() {
        let buffer = SampleBuffer::new(vec![0.5, -0.5, 0.5, -0.5], 4);
        assert!((buffer.rms() - 0.5).abs() < 1e-6);
        assert_eq!(buffer.duration(), Duration::from_secs(1));
        assert_eq!(SampleBuffer::new(Vec::new(), 44100).rms(), 0.0);
    }
}
