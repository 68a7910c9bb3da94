//! # Tuner Engine Module
//!
//! Combines the pitch estimator with the active tuning table. The table can
//! be replaced from any thread while another thread classifies buffers; each
//! classification works against one consistent snapshot.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::buffer::SampleBuffer;
use crate::config::TunerConfig;
use crate::error::Result;
use crate::pitch::{PitchEstimate, PitchEstimator};
use crate::tuning::{self, Preset, TuningTable};
use crate::ClassificationResult;

#[derive(Debug)]
pub struct TunerEngine {
    config: TunerConfig,
    estimator: PitchEstimator,
    tuning: RwLock<Arc<TuningTable>>,
}

impl TunerEngine {
    /// Validates `config` and starts on its configured preset.
    pub fn new(config: TunerConfig) -> Result<Self> {
        config.validate()?;
        let estimator = PitchEstimator::new(&config.estimator())?;
        let table = config.preset.table();
        info!(preset = %config.preset, "tuner engine ready: {table}");
        Ok(Self {
            config,
            estimator,
            tuning: RwLock::new(Arc::new(table)),
        })
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn estimator(&self) -> &PitchEstimator {
        &self.estimator
    }

    /// Snapshot of the active tuning table.
    pub fn tuning(&self) -> Arc<TuningTable> {
        self.tuning
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switches to a built-in preset.
    pub fn set_tuning(&self, preset: Preset) {
        info!(%preset, "switching tuning");
        self.set_table(preset.table());
    }

    /// Parses and activates a comma-separated list of frequencies.
    ///
    /// On error the previous tuning stays active.
    pub fn set_custom_tuning(&self, text: &str) -> Result<()> {
        let range = self.config.f_min_hz..=self.config.f_max_hz;
        match TuningTable::parse(text, range) {
            Ok(table) => {
                info!("switching to custom tuning: {table}");
                self.set_table(table);
                Ok(())
            }
            Err(e) => {
                warn!("rejected custom tuning {text:?}: {e}");
                Err(e)
            }
        }
    }

    /// Replaces the active table in one step.
    pub fn set_table(&self, table: TuningTable) {
        *self.tuning.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
    }

    /// The active tuning formatted as a custom tuning string.
    pub fn custom_tuning_string(&self) -> String {
        self.tuning().to_tuning_string()
    }

    /// Estimates the pitch of `buffer` and matches it against the tuning.
    pub fn classify(&self, buffer: &SampleBuffer) -> Result<ClassificationResult> {
        let table = self.tuning();
        let estimate = self.estimator.estimate(buffer)?;

        let PitchEstimate::Detected { frequency_hz, .. } = estimate else {
            return Ok(ClassificationResult::undetected(estimate));
        };

        let (index, deviation_hz) = table.nearest(frequency_hz);
        let entry = &table.entries()[index];
        let in_tune = deviation_hz.abs() < self.config.in_tune_threshold_hz;
        let (note_name, _) = tuning::find_nearest_note(frequency_hz);

        debug!(
            frequency_hz,
            string = %entry.name,
            deviation_hz,
            in_tune,
            "classified buffer"
        );

        Ok(ClassificationResult {
            estimate,
            matched_index: Some(index),
            matched_name: Some(entry.name.clone()),
            deviation_hz,
            cents_deviation: Some(tuning::calculate_cents_deviation(
                frequency_hz,
                entry.target_frequency_hz,
            )),
            nearest_note: Some(note_name),
            in_tune,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunerError;
    use crate::pitch::NoPitch;
    use crate::source::{AudioSource, ToneSource};
    use crate::tuning::TuningEntry;

    fn engine() -> TunerEngine {
        TunerEngine::new(TunerConfig::default()).unwrap()
    }

    fn tone(frequency: f32) -> SampleBuffer {
        let config = TunerConfig::default();
        ToneSource::sine(frequency, 0.5, config.sample_rate_hz)
            .read(config.window_size_samples)
            .unwrap()
    }

    #[test]
    fn classifies_string_in_tune() {
        let result = engine().classify(&tone(110.5)).unwrap();
        assert_eq!(result.matched_index, Some(1));
        assert_eq!(result.matched_name.as_deref(), Some("A2"));
        assert!((result.deviation_hz - 0.5).abs() < 1.0);
        assert!(result.in_tune);
        assert_eq!(result.nearest_note.as_deref(), Some("A2"));
        assert!(result.cents_deviation.unwrap().abs() < 20.0);
    }

    #[test]
    fn flags_string_out_of_tune() {
        // 23 Hz sharp of D3, still closer to D3 than to G3
        let result = engine().classify(&tone(170.0)).unwrap();
        assert_eq!(result.matched_index, Some(2));
        assert!(result.deviation_hz > 10.0);
        assert!(!result.in_tune);
    }

    #[test]
    fn silence_has_no_match() {
        let config = TunerConfig::default();
        let zeros = SampleBuffer::new(vec![0.0; config.window_size_samples], config.sample_rate_hz);
        let result = engine().classify(&zeros).unwrap();
        assert_eq!(result, ClassificationResult::undetected(PitchEstimate::NotDetected(NoPitch::Silence)));
        assert!(!result.in_tune);
        assert_eq!(result.matched_index, None);
    }

    #[test]
    fn in_tune_threshold_is_configurable() {
        let engine = TunerEngine::new(TunerConfig {
            in_tune_threshold_hz: 1.0,
            ..TunerConfig::default()
        })
        .unwrap();
        let result = engine.classify(&tone(113.0)).unwrap();
        assert_eq!(result.matched_index, Some(1));
        assert!(!result.in_tune);
    }

    #[test]
    fn failed_custom_tuning_keeps_previous_table() {
        let engine = engine();
        let before = engine.tuning();
        let err = engine.set_custom_tuning("82.41,abc,196.00").unwrap_err();
        assert!(matches!(err, TunerError::InvalidTuningString { ref token } if token == "abc"));
        assert_eq!(*engine.tuning(), *before);
        assert_eq!(engine.tuning().nearest(146.0).0, 2);

        engine.set_custom_tuning("100, 200").unwrap();
        assert_eq!(engine.tuning().nearest(146.0).0, 0);
        assert_eq!(engine.custom_tuning_string(), "100,200");
    }

    #[test]
    fn preset_switch_replaces_table() {
        let engine = engine();
        engine.set_tuning(Preset::DropD);
        let result = engine.classify(&tone(73.42)).unwrap();
        assert_eq!(result.matched_name.as_deref(), Some("D2"));
        assert!(result.in_tune);

        engine.set_table(
            TuningTable::new(vec![TuningEntry::new("drone", 440.0)]).unwrap(),
        );
        assert_eq!(engine.classify(&tone(73.42)).unwrap().matched_index, Some(0));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_swaps() {
        let engine = engine();
        let snapshot = engine.tuning();
        engine.set_custom_tuning("440").unwrap();
        assert_eq!(snapshot.len(), 6);
        assert_eq!(engine.tuning().len(), 1);
    }

    #[test]
    fn mismatched_buffer_is_an_error() {
        let short = SampleBuffer::new(vec![0.0; 100], 44100);
        assert!(engine().classify(&short).unwrap_err().is_fatal());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = TunerConfig { f_min_hz: 0.0, ..TunerConfig::default() };
        assert!(matches!(TunerEngine::new(config), Err(TunerError::InvalidConfig { .. })));
    }
}
