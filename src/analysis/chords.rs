// Chord catalog - expected fingerings and their sounding tones

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::fretboard::{self, note_name, open_string_midi};

/// One sounding string of a chord fingering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordTone {
    pub string: u8,
    pub fret: u8,
    pub midi: i32,
    pub note: String,
    pub pitch_class: u8,
}

/// A chord the learner is asked to play
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordTarget {
    pub name: String,
    /// Sounding strings, low string first
    pub tones: Vec<ChordTone>,
}

impl ChordTarget {
    /// Build a target from a chart shape, low E string first.
    ///
    /// `None` marks a muted string, e.g. C major is `x32010`.
    pub fn from_shape(name: &str, shape: [Option<u8>; 6]) -> Self {
        let tones = shape
            .iter()
            .enumerate()
            .filter_map(|(i, fret)| {
                let fret = (*fret)?;
                let string = 6 - i as u8;
                let midi = open_string_midi(string)? + fret as i32;
                Some(ChordTone {
                    string,
                    fret,
                    midi,
                    note: note_name(midi),
                    pitch_class: fretboard::pitch_class(midi),
                })
            })
            .collect();
        Self {
            name: name.to_string(),
            tones,
        }
    }

    /// Parse a chart string such as `"x32010"`
    pub fn from_chart(name: &str, chart: &str) -> Option<Self> {
        let mut shape = [None; 6];
        let chars: Vec<char> = chart.chars().collect();
        if chars.len() != 6 {
            return None;
        }
        for (slot, c) in shape.iter_mut().zip(chars) {
            *slot = match c {
                'x' | 'X' => None,
                d => Some(d.to_digit(10)? as u8),
            };
        }
        Some(Self::from_shape(name, shape))
    }

    pub fn pitch_classes(&self) -> BTreeSet<u8> {
        self.tones.iter().map(|t| t.pitch_class).collect()
    }
}

const STANDARD_CHARTS: [(&str, &str); 16] = [
    ("A", "x02220"),
    ("A7", "x02020"),
    ("Am", "x02210"),
    ("B7", "x21202"),
    ("C", "x32010"),
    ("C7", "x32310"),
    ("D", "xx0232"),
    ("D7", "xx0212"),
    ("Dm", "xx0231"),
    ("E", "022100"),
    ("E7", "020100"),
    ("Em", "022000"),
    ("F", "133211"),
    ("G", "320003"),
    ("G7", "320001"),
    ("Am7", "x02010"),
];

static STANDARD_CHORDS: Lazy<BTreeMap<String, ChordTarget>> = Lazy::new(|| {
    STANDARD_CHARTS
        .iter()
        .filter_map(|(name, chart)| ChordTarget::from_chart(name, chart))
        .map(|target| (target.name.clone(), target))
        .collect()
});

/// Normalize common spellings: "Cmaj" → "C", "Amin" → "Am"
pub fn normalize_chord_name(name: &str) -> String {
    let trimmed = name.trim();
    if let Some(root) = trimmed.strip_suffix("min") {
        return format!("{}m", root);
    }
    if let Some(root) = trimmed.strip_suffix("maj") {
        return root.to_string();
    }
    trimmed.to_string()
}

/// Named chord lookup
#[derive(Debug, Clone)]
pub struct ChordCatalog {
    chords: BTreeMap<String, ChordTarget>,
}

impl ChordCatalog {
    /// Open-position chords in standard tuning
    pub fn standard() -> Self {
        Self {
            chords: STANDARD_CHORDS.clone(),
        }
    }

    pub fn empty() -> Self {
        Self {
            chords: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ChordTarget> {
        self.chords.get(&normalize_chord_name(name))
    }

    /// Add or replace a chord
    pub fn insert(&mut self, target: ChordTarget) {
        self.chords.insert(target.name.clone(), target);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.chords.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.chords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chords.is_empty()
    }
}

impl Default for ChordCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
