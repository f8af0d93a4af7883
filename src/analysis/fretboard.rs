// Fretboard module - equal-tempered pitch math and string/fret mapping
//
// Strings are numbered the way guitarists read chord charts: 1 is the high
// E string, 6 is the low E string. Notes are identified by MIDI number
// (C4 = 60, A4 = 69 = 440 Hz).

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub const A4_HZ: f32 = 440.0;
pub const A4_MIDI: i32 = 69;

/// Highest fret present in the lookup table
pub const FRETBOARD_FRETS: u8 = 24;

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Open-string MIDI numbers in standard tuning, string 1 (E4) to 6 (E2)
pub const STANDARD_TUNING: [i32; 6] = [64, 59, 55, 50, 45, 40];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FretPosition {
    pub string: u8,
    pub fret: u8,
}

/// One cell of the fretboard lookup table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FretboardEntry {
    pub position: FretPosition,
    pub midi: i32,
    pub frequency: f32,
}

/// Nearest-note lookup result
#[derive(Debug, Clone, PartialEq)]
pub struct NoteInfo {
    pub midi: i32,
    pub name: String,
    pub pitch_class: u8,
    /// Equal-tempered frequency of `midi`
    pub reference_frequency: f32,
    /// Deviation of the measured frequency from `reference_frequency`
    pub cents: f32,
    pub position: FretPosition,
}

/// Every (string, fret) cell up to `FRETBOARD_FRETS`, string-major
static FRETBOARD: Lazy<Vec<FretboardEntry>> = Lazy::new(|| {
    let mut entries = Vec::with_capacity(STANDARD_TUNING.len() * (FRETBOARD_FRETS as usize + 1));
    for (index, &open) in STANDARD_TUNING.iter().enumerate() {
        for fret in 0..=FRETBOARD_FRETS {
            let midi = open + fret as i32;
            entries.push(FretboardEntry {
                position: FretPosition {
                    string: index as u8 + 1,
                    fret,
                },
                midi,
                frequency: midi_to_frequency(midi),
            });
        }
    }
    entries
});

pub fn fretboard() -> &'static [FretboardEntry] {
    &FRETBOARD
}

pub fn midi_to_frequency(midi: i32) -> f32 {
    A4_HZ * 2f32.powf((midi - A4_MIDI) as f32 / 12.0)
}

/// Fractional MIDI number for `frequency`
pub fn frequency_to_midi(frequency: f32) -> f32 {
    A4_MIDI as f32 + 12.0 * (frequency / A4_HZ).log2()
}

pub fn cents_between(measured: f32, reference: f32) -> f32 {
    1200.0 * (measured / reference).log2()
}

pub fn pitch_class(midi: i32) -> u8 {
    midi.rem_euclid(12) as u8
}

/// Scientific pitch name, e.g. 60 → "C4"
pub fn note_name(midi: i32) -> String {
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", NOTE_NAMES[pitch_class(midi) as usize], octave)
}

/// Parse a scientific pitch name such as "C4", "F#3" or "Bb2"
pub fn parse_note_name(name: &str) -> Option<i32> {
    let name = name.trim();
    let mut chars = name.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let base = NOTE_NAMES.iter().position(|n| n.len() == 1 && n.starts_with(letter))? as i32;
    let rest = chars.as_str();
    let (accidental, octave) = match rest.chars().next()? {
        '#' => (1, &rest[1..]),
        'b' => (-1, &rest[1..]),
        _ => (0, rest),
    };
    let octave: i32 = octave.parse().ok()?;
    Some((octave + 1) * 12 + base + accidental)
}

/// Open-string MIDI number for a 1-based string index
pub fn open_string_midi(string: u8) -> Option<i32> {
    STANDARD_TUNING
        .get((string as usize).checked_sub(1)?)
        .copied()
}

/// Lowest-fret position that plays `midi` within `max_fret`
pub fn fretboard_position(midi: i32, max_fret: u8) -> Option<FretPosition> {
    fretboard()
        .iter()
        .filter(|e| e.midi == midi && e.position.fret <= max_fret)
        .min_by_key(|e| (e.position.fret, e.position.string))
        .map(|e| e.position)
}

/// Nearest fretboard note to `frequency`, restricted to frets ≤ `max_fret`
///
/// Returns `None` for non-positive frequencies and for pitches more than a
/// semitone outside the playable range.
pub fn nearest_note(frequency: f32, max_fret: u8) -> Option<NoteInfo> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }

    let nearest = fretboard()
        .iter()
        .filter(|e| e.position.fret <= max_fret)
        .map(|e| (e, cents_between(frequency, e.frequency)))
        .min_by(|(a, ca), (b, cb)| {
            ca.abs()
                .total_cmp(&cb.abs())
                .then(a.position.fret.cmp(&b.position.fret))
        })?;

    let (entry, cents) = nearest;
    if cents.abs() > 100.0 {
        return None;
    }

    Some(NoteInfo {
        midi: entry.midi,
        name: note_name(entry.midi),
        pitch_class: pitch_class(entry.midi),
        reference_frequency: entry.frequency,
        cents,
        position: entry.position,
    })
}
