//! # Fast Fourier Transform (FFT) Module
//!
//! Frequency-domain autocorrelation for the pitch estimator. The forward and
//! inverse transforms are planned once per window size and reused for every
//! buffer.
//!
//! ## Features
//! - High-performance FFT using RustFFT
//! - Zero padding so the circular correlation equals the linear one
//! - DC offset removal for accurate analysis

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Removes the DC offset from a signal by making its average value zero.
///
/// A constant offset would otherwise add the same positive amount to every
/// lag of the correlation and mask the periodic structure.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 { return; }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Computes the length of the FFT needed for a linear (non-circular)
/// autocorrelation of `window_size` samples up to `lag_count` lags.
pub fn autocorr_fft_size(window_size: usize, lag_count: usize) -> usize {
    (window_size + lag_count).next_power_of_two()
}

/// Pre-planned FFT pair computing r(τ) = Σ x[i]·x[i+τ].
#[derive(Clone)]
pub struct Autocorrelator {
    window_size: usize,
    lag_count: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for Autocorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autocorrelator")
            .field("window_size", &self.window_size)
            .field("lag_count", &self.lag_count)
            .field("fft_size", &self.fft_size())
            .finish()
    }
}

impl Autocorrelator {
    /// Plans the transforms for windows of `window_size` samples.
    ///
    /// # Panics
    /// * If `lag_count` is larger than `window_size`
    pub fn new(window_size: usize, lag_count: usize) -> Self {
        assert!(
            lag_count <= window_size,
            "Lag count must not be greater than the window size"
        );
        let fft_size = autocorr_fft_size(window_size, lag_count);
        let mut planner = FftPlanner::new();
        Self {
            window_size,
            lag_count,
            forward: planner.plan_fft_forward(fft_size),
            inverse: planner.plan_fft_inverse(fft_size),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.forward.len()
    }

    pub fn lag_count(&self) -> usize {
        self.lag_count
    }

    /// Returns the autocorrelation for lags `0..lag_count`.
    ///
    /// # Panics
    /// * If signal length is not equal to the planned window size
    pub fn autocorrelate(&self, signal: &[f32]) -> Vec<f32> {
        if signal.len() != self.window_size {
            panic!("Input frame size must be equal to the planned window size");
        }

        let fft_size = self.fft_size();
        let mut buffer: Vec<Complex<f32>> = signal
            .iter()
            .map(|&sample| Complex { re: sample, im: 0.0 })
            .chain(std::iter::repeat(Complex { re: 0.0, im: 0.0 }))
            .take(fft_size)
            .collect();

        self.forward.process(&mut buffer);

        // Power spectral density; its inverse transform is the autocorrelation.
        for value in buffer.iter_mut() {
            *value = Complex { re: value.norm_sqr(), im: 0.0 };
        }

        self.inverse.process(&mut buffer);

        let scale = 1.0 / fft_size as f32;
        buffer
            .iter()
            .take(self.lag_count)
            .map(|c| c.re * scale)
            .collect()
    }
}
