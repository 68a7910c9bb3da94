//! # Audio Capture Module
//!
//! Real-time capture from the default input device using CPAL
//! (Cross-Platform Audio Library). The stream callback mixes input down to
//! mono, cuts it into analysis windows and pushes them into a
//! [`ChannelSource`] for the sampling loop.
//!
//! Only compiled with the `capture` feature.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::source::ChannelSource;

/// Windows buffered between the stream callback and the sampling loop.
const CHANNEL_CAPACITY: usize = 4;

/// Starts audio capture from the default input device.
///
/// The returned stream must stay alive (and on the thread that created it)
/// for as long as the source is read; dropping it closes the source.
///
/// # Arguments
/// * `sample_rate` - Desired sample rate in Hz
/// * `window` - Samples per pushed frame, normally the analysis window size
///
/// # Returns
/// * `Ok((stream, source))` - Audio stream handle and the source fed by it
/// * `Err(e)` - No usable input device or format
pub fn start_audio_capture(sample_rate: u32, window: usize) -> Result<(cpal::Stream, ChannelSource)> {
    let host = cpal::default_host();
    let device = host.default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    info!("Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, sample_rate)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let config = supported_config.with_sample_rate(cpal::SampleRate(sample_rate));
    let channels = config.channels() as usize;
    let config: cpal::StreamConfig = config.into();

    info!(channels, "Selected sample rate: {} Hz", sample_rate);

    let (sender, source) = ChannelSource::channel(sample_rate, CHANNEL_CAPACITY);
    let err_fn = |err| warn!("An error occurred on the audio stream: {}", err);

    // This buffer will accumulate mono audio data from the callback.
    let mut audio_buffer = Vec::with_capacity(window * 2);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if channels <= 1 {
                audio_buffer.extend_from_slice(data);
            } else {
                audio_buffer.extend(
                    data.chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                );
            }

            // While we have enough data for a full frame, send it.
            while audio_buffer.len() >= window {
                let frame_to_send = audio_buffer[..window].to_vec();

                // Ignore errors if the channel is full; the reader only
                // wants the freshest window anyway.
                let _ = sender.try_send(frame_to_send);

                audio_buffer.drain(..window);
            }
        },
        err_fn,
        None,
    ).context("failed to open input stream")?;

    stream.play().context("failed to start input stream")?;

    Ok((stream, source))
}

/// Finds the best supported audio configuration for the target sample rate.
///
/// Prefers f32 configurations whose rate range contains the target, then
/// mono over multi-channel input.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .filter(|c| c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0)
        .min_by_key(|c| c.channels())
}
