// Problem identification - which expected tones failed, and why

use serde::{Deserialize, Serialize};

use super::{AnalysisParams, ChordTarget, ChordTone, DetectedNote};

/// Widest deviation before a note is reported as a different pitch
const MAX_CENTS: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    MutedString,
    LowPressure,
    NoiseInterference,
    OutOfTune,
}

impl ProblemKind {
    /// Fixed remedy text shown to the learner
    pub fn remedy(self) -> &'static str {
        match self {
            ProblemKind::MutedString => {
                "Arch your fingers so they don't touch neighbouring strings"
            }
            ProblemKind::LowPressure => "Press down harder, just behind the fret",
            ProblemKind::NoiseInterference => "Find a quieter spot or move closer to the microphone",
            ProblemKind::OutOfTune => "Check your tuning or straighten the finger on that string",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProblemKind::MutedString => "muted string",
            ProblemKind::LowPressure => "low finger pressure",
            ProblemKind::NoiseInterference => "background noise",
            ProblemKind::OutOfTune => "out of tune",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Penalty weight used by quality scoring
    pub fn weight(self) -> f32 {
        match self {
            Severity::Low => 1.0,
            Severity::Medium => 2.0,
            Severity::High => 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub kind: ProblemKind,
    pub severity: Severity,
    /// Affected string, when the problem is tied to one
    pub string: Option<u8>,
    pub description: String,
    pub solution: String,
}

impl Problem {
    fn new(kind: ProblemKind, severity: Severity, string: Option<u8>, description: String) -> Self {
        Self {
            kind,
            severity,
            string,
            description,
            solution: kind.remedy().to_string(),
        }
    }
}

/// An expected chord tone paired with the detected note that satisfies it
#[derive(Debug, Clone, PartialEq)]
pub struct ToneMatch {
    pub tone: ChordTone,
    /// Index into the detected notes
    pub detected: Option<usize>,
    /// Raw amplitude of the matching note, 0 when missing
    pub amplitude: f32,
    /// Deviation of the matching note, 0 when missing
    pub cents: f32,
}

/// Pair every expected tone with a detected note of the same pitch class.
///
/// Octave equivalence is allowed; among candidates the nearest octave wins,
/// then the louder note.
pub fn match_tones(target: &ChordTarget, notes: &[DetectedNote]) -> Vec<ToneMatch> {
    target
        .tones
        .iter()
        .map(|tone| {
            let best = notes
                .iter()
                .enumerate()
                .filter(|(_, n)| n.pitch_class == tone.pitch_class)
                .min_by(|(_, a), (_, b)| {
                    let da = (a.midi - tone.midi).abs();
                    let db = (b.midi - tone.midi).abs();
                    da.cmp(&db).then(b.amplitude.total_cmp(&a.amplitude))
                });
            match best {
                Some((index, note)) => ToneMatch {
                    tone: tone.clone(),
                    detected: Some(index),
                    amplitude: note.amplitude,
                    cents: note.cents,
                },
                None => ToneMatch {
                    tone: tone.clone(),
                    detected: None,
                    amplitude: 0.0,
                    cents: 0.0,
                },
            }
        })
        .collect()
}

fn low_pressure_severity(amplitude: f32, threshold: f32) -> Severity {
    if amplitude < threshold * 0.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn out_of_tune_severity(cents: f32, tolerance: f32) -> Severity {
    let span = (MAX_CENTS - tolerance).max(f32::EPSILON);
    let excess = (cents.abs() - tolerance) / span;
    if excess >= 0.6 {
        Severity::High
    } else if excess >= 0.3 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Classify defects for one snapshot, most severe first.
///
/// * `signal_level` - loudest bin after sensitivity scaling
/// * `foreign_ratio` - share of detected energy outside the chord
/// * `notes_detected` - whether any note was found at all
pub fn identify_problems(
    matches: &[ToneMatch],
    signal_level: f32,
    foreign_ratio: f32,
    notes_detected: bool,
    params: &AnalysisParams,
) -> Vec<Problem> {
    let mut problems = Vec::new();

    let missing = matches.iter().filter(|m| m.detected.is_none()).count();
    let muted_severity = if missing >= 2 {
        Severity::High
    } else {
        Severity::Medium
    };

    for m in matches {
        let string = m.tone.string;
        if m.detected.is_none() {
            problems.push(Problem::new(
                ProblemKind::MutedString,
                muted_severity,
                Some(string),
                format!("String {} ({}) is not ringing", string, m.tone.note),
            ));
            continue;
        }

        if m.amplitude < params.low_pressure_amplitude {
            problems.push(Problem::new(
                ProblemKind::LowPressure,
                low_pressure_severity(m.amplitude, params.low_pressure_amplitude),
                Some(string),
                format!("String {} ({}) sounds weak or buzzy", string, m.tone.note),
            ));
        }

        if m.cents.abs() > params.cents_tolerance {
            let direction = if m.cents > 0.0 { "sharp" } else { "flat" };
            problems.push(Problem::new(
                ProblemKind::OutOfTune,
                out_of_tune_severity(m.cents, params.cents_tolerance),
                Some(string),
                format!(
                    "String {} ({}) is {:.0} cents {}",
                    string,
                    m.tone.note,
                    m.cents.abs(),
                    direction
                ),
            ));
        }
    }

    if signal_level < params.noise_floor {
        problems.push(Problem::new(
            ProblemKind::NoiseInterference,
            Severity::Medium,
            None,
            "Signal is too quiet to separate from background noise".to_string(),
        ));
    } else if notes_detected && foreign_ratio > params.foreign_energy_ratio {
        let severity = if foreign_ratio > 0.7 {
            Severity::High
        } else {
            Severity::Medium
        };
        problems.push(Problem::new(
            ProblemKind::NoiseInterference,
            severity,
            None,
            format!(
                "{:.0}% of the sound doesn't belong to the chord",
                foreign_ratio * 100.0
            ),
        ));
    }

    // Stable sort keeps string order within a severity
    problems.sort_by(|a, b| b.severity.cmp(&a.severity));
    problems
}
