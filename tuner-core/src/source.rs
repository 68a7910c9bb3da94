//! # Audio Source Module
//!
//! The sampling loop pulls one window at a time from an [`AudioSource`].
//! Device handling lives outside the engine: a capture callback pushes raw
//! chunks into a [`ChannelSource`], and tests or demos use a [`ToneSource`].

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::buffer::SampleBuffer;
use crate::error::{Result, TunerError};

/// Supplies windows of normalized samples.
pub trait AudioSource {
    /// Returns exactly `frames` samples at the source's sample rate.
    ///
    /// May block briefly while the device fills its buffer. Fails with
    /// [`TunerError::DeviceUnavailable`] when no audio can be delivered.
    fn read(&mut self, frames: usize) -> Result<SampleBuffer>;

    fn sample_rate(&self) -> u32;
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn read(&mut self, frames: usize) -> Result<SampleBuffer> {
        (**self).read(frames)
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }
}

/// How long [`ChannelSource::read`] waits for a full window by default.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Collects chunks sent by a capture callback and hands out the freshest
/// full window on each read. Older samples are dropped, so a slow consumer
/// never falls behind the device.
#[derive(Debug)]
pub struct ChannelSource {
    receiver: Receiver<Vec<f32>>,
    sample_rate: u32,
    timeout: Duration,
    pending: Vec<f32>,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            receiver,
            sample_rate,
            timeout: DEFAULT_READ_TIMEOUT,
            pending: Vec::new(),
        }
    }

    /// Creates a bounded channel and the source reading from it.
    pub fn channel(sample_rate: u32, capacity: usize) -> (Sender<Vec<f32>>, Self) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (tx, Self::new(rx, sample_rate))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn keep_latest(&mut self, frames: usize) {
        if self.pending.len() > frames {
            let excess = self.pending.len() - frames;
            self.pending.drain(..excess);
        }
    }
}

impl AudioSource for ChannelSource {
    fn read(&mut self, frames: usize) -> Result<SampleBuffer> {
        let deadline = Instant::now() + self.timeout;
        loop {
            // Take everything already queued before checking for a window.
            loop {
                match self.receiver.try_recv() {
                    Ok(chunk) => self.pending.extend_from_slice(&chunk),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
            self.keep_latest(frames);

            if self.pending.len() >= frames {
                let window = std::mem::take(&mut self.pending);
                return Ok(SampleBuffer::new(window, self.sample_rate));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(TunerError::device(format!(
                        "no complete window of {frames} samples within {:?}",
                        self.timeout
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TunerError::device("audio stream closed"));
                }
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Deterministic synthetic signal: a sum of sine partials plus optional
/// seeded white noise. Phase continues across reads.
#[derive(Debug, Clone)]
pub struct ToneSource {
    sample_rate: u32,
    partials: Vec<(f32, f32)>,
    noise_amplitude: f32,
    noise_state: u32,
    position: u64,
}

impl ToneSource {
    /// A silent source; add partials with [`ToneSource::with_partial`].
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            partials: Vec::new(),
            noise_amplitude: 0.0,
            noise_state: 1,
            position: 0,
        }
    }

    pub fn sine(frequency: f32, amplitude: f32, sample_rate: u32) -> Self {
        Self::new(sample_rate).with_partial(frequency, amplitude)
    }

    /// A plucked-string-like tone: the fundamental plus decaying harmonics.
    pub fn string(frequency: f32, amplitude: f32, harmonics: usize, sample_rate: u32) -> Self {
        (1..=harmonics + 1).fold(Self::new(sample_rate), |source, n| {
            source.with_partial(frequency * n as f32, amplitude / n as f32)
        })
    }

    pub fn with_partial(mut self, frequency: f32, amplitude: f32) -> Self {
        self.partials.push((frequency, amplitude));
        self
    }

    pub fn with_noise(mut self, amplitude: f32, seed: u32) -> Self {
        self.noise_amplitude = amplitude;
        self.noise_state = seed.max(1);
        self
    }

    fn next_noise(&mut self) -> f32 {
        self.noise_state = self
            .noise_state
            .wrapping_mul(1_664_525)
            .wrapping_add(1_013_904_223);
        (self.noise_state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
    }
}

impl AudioSource for ToneSource {
    fn read(&mut self, frames: usize) -> Result<SampleBuffer> {
        let rate = self.sample_rate as f64;
        let mut samples = Vec::with_capacity(frames);
        for _ in 0..frames {
            let t = self.position as f64 / rate;
            let tone: f64 = self
                .partials
                .iter()
                .map(|&(freq, amp)| amp as f64 * (std::f64::consts::TAU * freq as f64 * t).sin())
                .sum();
            let noise = if self.noise_amplitude > 0.0 {
                self.noise_amplitude * self.next_noise()
            } else {
                0.0
            };
            samples.push(tone as f32 + noise);
            self.position += 1;
        }
        Ok(SampleBuffer::new(samples, self.sample_rate))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
