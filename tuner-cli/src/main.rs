//! # Tuner - command line host
//!
//! Wires an audio source and a console display into the sampling loop.
//!
//! ## Architecture
//! - **Main Thread**: argument parsing, tuning changes and printing results
//! - **Sampling Thread**: owned by `SamplingLoop`, reads and classifies audio
//! - **Communication**: a crossbeam channel carries results back to the main thread

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tuner_core::{
    ClassificationResult, NoPitch, PitchEstimate, Preset, SamplingLoop, TunerConfig, TunerEngine,
    source::ToneSource,
};

#[derive(Debug, Parser)]
#[command(name = "tuner")]
#[command(about = "Instrument tuner: detects the pitch of a string and the nearest target note")]
struct Cli {
    /// JSON configuration file; missing keys use defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Built-in tuning (standard, drop-d, half-step-down, open-g, dadgad).
    #[arg(long)]
    preset: Option<Preset>,

    /// Custom tuning as comma-separated frequencies, e.g. "82.41,110,146.83".
    #[arg(long, conflicts_with = "preset")]
    tuning: Option<String>,

    /// Listen to the default input device (requires the `capture` feature).
    #[arg(long)]
    listen: bool,

    /// Frequency of the simulated string when not listening.
    #[arg(long, default_value_t = 110.0)]
    simulate_hz: f32,

    /// How long to run, in seconds.
    #[arg(long, default_value_t = 5)]
    seconds: u64,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TunerConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => TunerConfig::default(),
    };
    if cli.print_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let engine = Arc::new(TunerEngine::new(config.clone())?);
    if let Some(preset) = cli.preset {
        engine.set_tuning(preset);
    }
    if let Some(text) = &cli.tuning {
        engine.set_custom_tuning(text)?;
    }
    info!("active tuning: {}", engine.tuning());

    let (result_tx, result_rx) = crossbeam_channel::bounded::<ClassificationResult>(16);
    let mut sampling = SamplingLoop::with_engine_period(Arc::clone(&engine));

    // The capture stream has to outlive the loop and stay on this thread.
    #[cfg(feature = "capture")]
    let _stream;
    if cli.listen {
        #[cfg(feature = "capture")]
        {
            let (stream, source) = tuner_core::audio::start_audio_capture(
                config.sample_rate_hz,
                config.window_size_samples,
            )?;
            _stream = stream;
            sampling.start(source, result_tx)?;
        }
        #[cfg(not(feature = "capture"))]
        anyhow::bail!("--listen needs a build with `--features capture`");
    } else {
        info!(frequency = cli.simulate_hz, "simulating a plucked string");
        let source = ToneSource::string(cli.simulate_hz, 0.5, 3, config.sample_rate_hz)
            .with_noise(0.02, 0x5eed);
        sampling.start(source, result_tx)?;
    }

    let run_until = Instant::now() + Duration::from_secs(cli.seconds);
    loop {
        let remaining = run_until.saturating_duration_since(Instant::now());
        match result_rx.recv_timeout(remaining) {
            Ok(result) => println!("{}", describe(&result)),
            Err(RecvTimeoutError::Timeout) => break,
            // The loop dropped its sink, i.e. it stopped on its own.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    sampling.stop();
    if let Some(e) = sampling.take_error() {
        return Err(e).context("sampling stopped");
    }
    Ok(())
}

fn describe(result: &ClassificationResult) -> String {
    match (&result.estimate, &result.matched_name) {
        (PitchEstimate::Detected { frequency_hz, clarity }, Some(name)) => format!(
            "{:>8.2} Hz  {:<8} {:>+7.2} Hz {:>+7.1} ct  {:<4} clarity {:.2}{}",
            frequency_hz,
            name,
            result.deviation_hz,
            result.cents_deviation.unwrap_or_default(),
            result.nearest_note.as_deref().unwrap_or("-"),
            clarity,
            if result.in_tune { "  IN TUNE" } else { "" }
        ),
        (PitchEstimate::NotDetected(NoPitch::Silence), _) => "      -- silence".to_string(),
        (PitchEstimate::NotDetected(NoPitch::LowConfidence), _) => "      -- no clear pitch".to_string(),
        (PitchEstimate::NotDetected(NoPitch::OutOfRange), _) => "      -- out of range".to_string(),
        (PitchEstimate::Detected { frequency_hz, .. }, None) => format!("{frequency_hz:>8.2} Hz"),
    }
}
