//! # Musical Tuning Module
//!
//! This module provides the tuning tables the tuner matches against, plus the
//! equal temperament note utilities used to name frequencies and to derive the
//! built-in presets.
//!
//! ## Features
//! - Ordered tuning tables with nearest-string lookup
//! - All-or-nothing parsing of user-supplied comma-separated tunings
//! - Built-in guitar presets
//! - 88-key note mapping (A0 to C8) and cent deviation calculations

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};

/// Represents a single musical note with its name and frequency.
#[derive(Debug, Clone)]
pub struct Note {
    /// Note name (e.g., "A4", "C#3")
    pub name: String,
    /// Frequency in Hz
    pub frequency: f32,
}

/// Statically computed notes for a standard 88-key piano (A0 to C8).
///
/// Frequencies use equal temperament with A4 = 440 Hz and are computed once.
static NOTES: Lazy<Vec<Note>> = Lazy::new(|| {
    const NOTE_NAMES: [&str; 12] = [
        "A", "A#", "B", "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#",
    ];
    let mut notes = Vec::with_capacity(88);

    for i in 0..88 {
        // A4 is the 49th key, which is index 48 in a 0-indexed loop.
        // f = f0 * 2^(n/12), n being the number of semitones away from A4.
        let frequency = 440.0 * 2.0_f32.powf((i as f32 - 48.0) / 12.0);

        let note_index = i % 12;
        // The octave changes at C.
        let octave = (i + 9) / 12;
        let name = format!("{}{}", NOTE_NAMES[note_index], octave);

        notes.push(Note { name, frequency });
    }
    notes
});

/// Static map for note name to key index lookups.
static NOTE_MAP: Lazy<BTreeMap<String, u8>> = Lazy::new(|| {
    NOTES.iter()
        .enumerate()
        .map(|(i, note)| (note.name.clone(), i as u8))
        .collect()
});

/// Finds the closest equal temperament note to a given frequency.
///
/// # Returns
/// * `(note_name, target_frequency)` - Closest note name and its frequency
pub fn find_nearest_note(freq: f32) -> (String, f32) {
    let closest = NOTES
        .iter()
        .min_by(|a, b| {
            let diff_a = (a.frequency - freq).abs();
            let diff_b = (b.frequency - freq).abs();
            diff_a.total_cmp(&diff_b)
        })
        .unwrap(); // This is safe as NOTES is never empty.

    (closest.name.clone(), closest.frequency)
}

/// Looks up the equal temperament frequency of a note name such as "A4" or
/// "C#3". Only sharps are recognized.
pub fn frequency_of_note(name: &str) -> Option<f32> {
    NOTE_MAP.get(name).map(|&i| NOTES[i as usize].frequency)
}

/// Calculates the deviation from a target frequency in cents.
///
/// 100 cents = 1 semitone, 1200 cents = 1 octave. Positive values indicate
/// sharpness, negative values indicate flatness.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// One string (or note) of a tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningEntry {
    pub name: String,
    pub target_frequency_hz: f32,
}

impl TuningEntry {
    pub fn new(name: impl Into<String>, target_frequency_hz: f32) -> Self {
        Self {
            name: name.into(),
            target_frequency_hz,
        }
    }
}

/// An ordered, non-empty set of target frequencies.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningTable {
    entries: Vec<TuningEntry>,
}

impl TuningTable {
    /// Builds a table, rejecting empty input and non-positive frequencies.
    pub fn new(entries: Vec<TuningEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(TunerError::InvalidTuning {
                reason: "a tuning needs at least one entry".to_string(),
            });
        }
        if let Some(bad) = entries
            .iter()
            .find(|e| !(e.target_frequency_hz.is_finite() && e.target_frequency_hz > 0.0))
        {
            return Err(TunerError::InvalidTuning {
                reason: format!(
                    "entry '{}' has invalid frequency {}",
                    bad.name, bad.target_frequency_hz
                ),
            });
        }
        Ok(Self { entries })
    }

    /// Parses a comma-separated list of frequencies in Hz.
    ///
    /// Every token must be a positive finite number inside `range`, otherwise
    /// the whole string is rejected with the first offending token. Entries
    /// are named "String 1", "String 2", ...
    pub fn parse(text: &str, range: RangeInclusive<f32>) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(TunerError::InvalidTuningString {
                token: String::new(),
            });
        }

        let entries = text
            .split(',')
            .map(str::trim)
            .enumerate()
            .map(|(i, token)| match token.parse::<f32>() {
                Ok(freq) if freq.is_finite() && freq > 0.0 && range.contains(&freq) => {
                    Ok(TuningEntry::new(format!("String {}", i + 1), freq))
                }
                _ => Err(TunerError::InvalidTuningString {
                    token: token.to_string(),
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(entries)
    }

    pub fn entries(&self) -> &[TuningEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TuningEntry> {
        self.entries.get(index)
    }

    pub fn frequencies(&self) -> Vec<f32> {
        self.entries.iter().map(|e| e.target_frequency_hz).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Finds the entry closest to `frequency_hz`.
    ///
    /// # Returns
    /// * `(index, deviation_hz)` - deviation is `frequency_hz - target`, so
    ///   positive means sharp. Equidistant entries resolve to the lower index.
    pub fn nearest(&self, frequency_hz: f32) -> (usize, f32) {
        let mut best_index = 0;
        let mut best_deviation = frequency_hz - self.entries[0].target_frequency_hz;
        for (i, entry) in self.entries.iter().enumerate().skip(1) {
            let deviation = frequency_hz - entry.target_frequency_hz;
            if deviation.abs() < best_deviation.abs() {
                best_index = i;
                best_deviation = deviation;
            }
        }
        (best_index, best_deviation)
    }

    /// Formats the frequencies as a comma-separated list that
    /// [`TuningTable::parse`] reads back unchanged.
    pub fn to_tuning_string(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.target_frequency_hz.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn from_note_names(names: &[&str]) -> Self {
        let entries = names
            .iter()
            .map(|&name| {
                let frequency = frequency_of_note(name)
                    .expect("preset note names are in the note table");
                TuningEntry::new(name, frequency)
            })
            .collect();
        Self { entries }
    }
}

impl fmt::Display for TuningTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}={:.2}", entry.name, entry.target_frequency_hz)?;
        }
        Ok(())
    }
}

/// Built-in six-string guitar tunings, lowest string first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// E A D G B E
    #[default]
    Standard,
    /// D A D G B E
    DropD,
    /// Eb Ab Db Gb Bb Eb
    HalfStepDown,
    /// D G D G B D
    OpenG,
    /// D A D G A D
    Dadgad,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::Standard,
        Preset::DropD,
        Preset::HalfStepDown,
        Preset::OpenG,
        Preset::Dadgad,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Preset::Standard => "standard",
            Preset::DropD => "drop-d",
            Preset::HalfStepDown => "half-step-down",
            Preset::OpenG => "open-g",
            Preset::Dadgad => "dadgad",
        }
    }

    pub fn table(self) -> TuningTable {
        match self {
            Preset::Standard => TuningTable {
                entries: vec![
                    TuningEntry::new("E2", 82.41),
                    TuningEntry::new("A2", 110.00),
                    TuningEntry::new("D3", 146.83),
                    TuningEntry::new("G3", 196.00),
                    TuningEntry::new("B3", 246.94),
                    TuningEntry::new("E4", 329.63),
                ],
            },
            Preset::DropD => TuningTable::from_note_names(&["D2", "A2", "D3", "G3", "B3", "E4"]),
            Preset::HalfStepDown => {
                TuningTable::from_note_names(&["D#2", "G#2", "C#3", "F#3", "A#3", "D#4"])
            }
            Preset::OpenG => TuningTable::from_note_names(&["D2", "G2", "D3", "G3", "B3", "D4"]),
            Preset::Dadgad => TuningTable::from_note_names(&["D2", "A2", "D3", "G3", "A3", "D4"]),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Preset {
    type Err = TunerError;

    fn from_str(s: &str) -> Result<Self> {
        Preset::ALL
            .into_iter()
            .find(|p| p.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TunerError::InvalidTuning {
                reason: format!("unknown preset '{s}'"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANGE: RangeInclusive<f32> = 70.0..=1100.0;

    #[test]
    fn note_table_lookups() {
        assert_eq!(frequency_of_note("A4"), Some(440.0));
        assert!((frequency_of_note("E2").unwrap() - 82.41).abs() < 0.01);
        assert_eq!(frequency_of_note("H2"), None);

        let (name, freq) = find_nearest_note(444.0);
        assert_eq!(name, "A4");
        assert_eq!(freq, 440.0);
        assert_eq!(find_nearest_note(27.0).0, "A0");
        assert_eq!(find_nearest_note(5000.0).0, "C8");
    }

    #[test]
    fn cents_deviation() {
        assert!((calculate_cents_deviation(880.0, 440.0) - 1200.0).abs() < 1e-3);
        assert!(calculate_cents_deviation(438.0, 440.0) < 0.0);
        assert_eq!(calculate_cents_deviation(440.0, 440.0), 0.0);
    }

    #[test]
    fn nearest_picks_minimal_deviation() {
        let table = Preset::Standard.table();
        assert_eq!(table.nearest(83.0).0, 0);
        let (index, deviation) = table.nearest(108.0);
        assert_eq!(index, 1);
        assert!((deviation + 2.0).abs() < 1e-4);
        let (index, deviation) = table.nearest(335.0);
        assert_eq!(index, 5);
        assert!(deviation > 0.0);
        // Outside the table still maps to the closest end.
        assert_eq!(table.nearest(20.0).0, 0);
        assert_eq!(table.nearest(1000.0).0, 5);
    }

    #[test]
    fn nearest_tie_prefers_lower_index() {
        let table = TuningTable::new(vec![
            TuningEntry::new("low", 100.0),
            TuningEntry::new("high", 200.0),
        ])
        .unwrap();
        assert_eq!(table.nearest(150.0), (0, 50.0));

        let table = TuningTable::new(vec![
            TuningEntry::new("E2", 82.41),
            TuningEntry::new("A2", 110.00),
        ])
        .unwrap();
        // 96.2 sits just below the midpoint (96.205)
        assert_eq!(table.nearest(96.2).0, 0);
        assert_eq!(table.nearest(96.21).0, 1);
        // Idempotent
        assert_eq!(table.nearest(96.2), table.nearest(96.2));
    }

    #[test]
    fn duplicate_frequencies_resolve_to_first() {
        let table = TuningTable::new(vec![
            TuningEntry::new("a", 110.0),
            TuningEntry::new("a", 110.0),
        ])
        .unwrap();
        assert_eq!(table.nearest(111.0).0, 0);
    }

    #[test]
    fn construction_rejects_invalid_entries() {
        assert!(matches!(
            TuningTable::new(Vec::new()),
            Err(TunerError::InvalidTuning { .. })
        ));
        assert!(matches!(
            TuningTable::new(vec![TuningEntry::new("x", -5.0)]),
            Err(TunerError::InvalidTuning { .. })
        ));
        assert!(matches!(
            TuningTable::new(vec![TuningEntry::new("x", f32::NAN)]),
            Err(TunerError::InvalidTuning { .. })
        ));
    }

    #[test]
    fn parse_tolerates_whitespace() {
        let table = TuningTable::parse(" 82.41, 110.00 ,146.83,196.00,246.94,329.63 ", RANGE).unwrap();
        assert_eq!(table.len(), 6);
        assert_eq!(table.frequencies(), Preset::Standard.table().frequencies());
        assert_eq!(table.names()[0], "String 1");
        assert_eq!(table.names()[5], "String 6");
    }

    #[test]
    fn parse_rejects_bad_tokens() {
        let bad_token = |text: &str| match TuningTable::parse(text, RANGE) {
            Err(TunerError::InvalidTuningString { token }) => token,
            other => panic!("expected a rejection for {text:?}, got {other:?}"),
        };
        assert_eq!(bad_token(""), "");
        assert_eq!(bad_token("   "), "");
        assert_eq!(bad_token("82.41,abc,196.00"), "abc");
        assert_eq!(bad_token("82.41,-110"), "-110");
        assert_eq!(bad_token("82.41,0"), "0");
        assert_eq!(bad_token("82.41,,110"), "");
        assert_eq!(bad_token("82.41,inf"), "inf");
        assert_eq!(bad_token("NaN"), "NaN");
        // Outside the detectable range
        assert_eq!(bad_token("41.2,110"), "41.2");
        assert_eq!(bad_token("110,2000"), "2000");
    }

    #[test]
    fn format_parse_round_trip() {
        let tables = [
            Preset::Standard.table(),
            Preset::HalfStepDown.table(),
            Preset::Dadgad.table(),
            TuningTable::new(vec![TuningEntry::new("odd", 123.456_79)]).unwrap(),
        ];
        for table in tables {
            let text = table.to_tuning_string();
            let parsed = TuningTable::parse(&text, RANGE).unwrap();
            assert_eq!(parsed.frequencies(), table.frequencies(), "{text}");
        }
        assert_eq!(
            Preset::Standard.table().to_tuning_string(),
            "82.41,110,146.83,196,246.94,329.63"
        );
    }

    #[test]
    fn presets() {
        for preset in Preset::ALL {
            let table = preset.table();
            assert_eq!(table.len(), 6, "{preset}");
            assert!(table.frequencies().windows(2).all(|w| w[0] <= w[1]), "{preset}");
            assert_eq!(preset.id().parse::<Preset>().unwrap(), preset);
            for entry in table.entries() {
                let note = frequency_of_note(&entry.name).unwrap();
                assert!((note - entry.target_frequency_hz).abs() < 0.01, "{preset} {}", entry.name);
            }
        }
        let drop_d = Preset::DropD.table();
        assert_eq!(drop_d.names(), ["D2", "A2", "D3", "G3", "B3", "E4"]);
        assert!((drop_d.frequencies()[0] - 73.42).abs() < 0.01);
        assert!(matches!("banjo".parse::<Preset>(), Err(TunerError::InvalidTuning { .. })));
    }

    #[test]
    fn display_lists_entries() {
        let table = TuningTable::new(vec![TuningEntry::new("A2", 110.0)]).unwrap();
        assert_eq!(table.to_string(), "A2=110.00");
    }
}
