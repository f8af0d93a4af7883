// Analysis module - chord detection pipeline
//
// Turns frequency snapshots captured from the device graph into scored,
// actionable chord feedback.
//
// Pipeline (pure functions, one submodule each):
//   peaks      → local maxima above the noise floor, bin → frequency
//   fretboard  → frequency → nearest equal-tempered note and fret position
//   problems   → match chord tones, classify defects with remedies
//   scoring    → confidence, chord quality, feedback envelope
//
// The async `engine` drives the pipeline against a live analyser.

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationProfile;
use crate::config::DetectionConfig;

pub mod chords;
pub mod engine;
pub mod fft;
pub mod fretboard;
pub mod peaks;
pub mod problems;
pub mod scoring;

pub use chords::{ChordCatalog, ChordTarget, ChordTone};
pub use engine::ChordDetectionEngine;
pub use fretboard::FretPosition;
pub use peaks::Peak;
pub use problems::{Problem, ProblemKind, Severity, ToneMatch};
pub use scoring::{ChordQuality, Feedback, FeedbackKind, VisualCue};

/// One captured spectrum: linear amplitudes in [0, 1], one per bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencySnapshot {
    pub bins: Vec<f32>,
    pub sample_rate: u32,
    pub fft_size: usize,
}

impl FrequencySnapshot {
    pub fn new(bins: Vec<f32>, sample_rate: u32, fft_size: usize) -> Self {
        Self {
            bins,
            sample_rate,
            fft_size,
        }
    }

    /// All-zero snapshot with the given geometry
    pub fn silent(sample_rate: u32, fft_size: usize) -> Self {
        Self::new(vec![0.0; fft_size / 2], sample_rate, fft_size)
    }

    /// Width of one bin in Hz
    pub fn bin_width(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// Nearest bin index for `frequency`
    pub fn frequency_to_bin(&self, frequency: f32) -> usize {
        (frequency / self.bin_width()).round().max(0.0) as usize
    }

    /// Loudest bin amplitude
    pub fn max_amplitude(&self) -> f32 {
        self.bins.iter().copied().fold(0.0, f32::max)
    }

    /// Copy with every bin multiplied by `factor` and clamped to [0, 1]
    pub fn scaled(&self, factor: f32) -> Self {
        if (factor - 1.0).abs() < f32::EPSILON {
            return self.clone();
        }
        Self::new(
            self.bins.iter().map(|b| (b * factor).clamp(0.0, 1.0)).collect(),
            self.sample_rate,
            self.fft_size,
        )
    }
}

/// A note identified in one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedNote {
    /// Scientific pitch name, e.g. "E4"
    pub note: String,
    pub midi: i32,
    pub pitch_class: u8,
    pub position: FretPosition,
    pub frequency: f32,
    /// Raw bin amplitude
    pub amplitude: f32,
    /// Amplitude relative to the loudest bin of the snapshot
    pub normalized_amplitude: f32,
    /// Deviation from the equal-tempered pitch of `note`
    pub cents: f32,
    /// Note belongs to the target chord and is within tolerance
    pub is_correct: bool,
}

/// How one expected chord tone fared in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringReport {
    pub string: u8,
    pub fret: u8,
    pub expected_note: String,
    pub detected: bool,
    pub amplitude: f32,
    pub cents: Option<f32>,
}

/// Structured problem/strength report for one detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub chord_quality: ChordQuality,
    /// Ordered by severity, most severe first
    pub problems: Vec<Problem>,
    pub strengths: Vec<String>,
    pub strings: Vec<StringReport>,
}

/// Timing metadata attached to every detection result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionTiming {
    pub latency_ms: u64,
    pub snapshots_analyzed: u32,
    pub timed_out: bool,
}

/// Outcome of one `detect_chord` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub expected_chord: String,
    pub detected_notes: Vec<DetectedNote>,
    pub confidence: f32,
    pub is_correct: bool,
    pub analysis: Analysis,
    pub feedback: Feedback,
    pub timing: DetectionTiming,
}

/// Thresholds in effect for one analysis, merged from config and calibration
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisParams {
    pub noise_floor: f32,
    pub sensitivity: f32,
    pub low_pressure_amplitude: f32,
    pub cents_tolerance: f32,
    pub max_fret: u8,
    pub max_peaks: usize,
    pub foreign_energy_ratio: f32,
    pub min_confidence: f32,
}

impl AnalysisParams {
    pub fn new(config: &DetectionConfig, profile: &CalibrationProfile) -> Self {
        Self {
            noise_floor: config.noise_floor.max(profile.noise_floor),
            sensitivity: profile.sensitivity,
            low_pressure_amplitude: config.low_pressure_amplitude,
            cents_tolerance: config.cents_tolerance,
            max_fret: config.max_fret,
            max_peaks: config.max_peaks,
            foreign_energy_ratio: config.foreign_energy_ratio,
            min_confidence: config.min_confidence,
        }
    }
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self::new(&DetectionConfig::default(), &CalibrationProfile::default())
    }
}

/// Result of analysing a single snapshot against a chord target
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotAnalysis {
    pub notes: Vec<DetectedNote>,
    pub confidence: f32,
    pub is_correct: bool,
    pub analysis: Analysis,
    pub feedback: Feedback,
}

impl SnapshotAnalysis {
    pub fn into_result(self, chord: &str, timing: DetectionTiming) -> DetectionResult {
        DetectionResult {
            expected_chord: chord.to_string(),
            detected_notes: self.notes,
            confidence: self.confidence,
            is_correct: self.is_correct,
            analysis: self.analysis,
            feedback: self.feedback,
            timing,
        }
    }
}

/// Map peaks to fretboard notes, flagging members of the target chord
pub fn detect_notes(
    peaks: &[Peak],
    target: &ChordTarget,
    params: &AnalysisParams,
) -> Vec<DetectedNote> {
    let chord_classes = target.pitch_classes();
    peaks
        .iter()
        .filter_map(|peak| {
            let info = fretboard::nearest_note(peak.frequency, params.max_fret)?;
            let in_chord = chord_classes.contains(&info.pitch_class);
            Some(DetectedNote {
                note: info.name,
                midi: info.midi,
                pitch_class: info.pitch_class,
                position: info.position,
                frequency: peak.frequency,
                amplitude: peak.amplitude,
                normalized_amplitude: peak.normalized,
                cents: info.cents,
                is_correct: in_chord && info.cents.abs() <= params.cents_tolerance,
            })
        })
        .collect()
}

/// Run the full pipeline on one snapshot
pub fn analyze_snapshot(
    snapshot: &FrequencySnapshot,
    target: &ChordTarget,
    params: &AnalysisParams,
) -> SnapshotAnalysis {
    let snapshot = snapshot.scaled(params.sensitivity);
    let peaks = peaks::find_peaks(&snapshot, params.noise_floor, params.max_peaks);
    let notes = detect_notes(&peaks, target, params);

    let matches = problems::match_tones(target, &notes);
    let clarity = scoring::clarity(target, &notes);
    let problems = problems::identify_problems(
        &matches,
        snapshot.max_amplitude(),
        1.0 - clarity,
        !notes.is_empty(),
        params,
    );

    let confidence = scoring::confidence(&matches, clarity, params);
    let quality = scoring::classify_quality(&matches, &problems, params);

    let all_present = matches.iter().all(|m| m.detected.is_some());
    let any_out_of_tune = problems
        .iter()
        .any(|p| p.kind == ProblemKind::OutOfTune);
    let is_correct = !matches.is_empty()
        && all_present
        && !any_out_of_tune
        && confidence >= params.min_confidence;

    let feedback = scoring::feedback(&target.name, quality, confidence, &problems);
    let analysis = Analysis {
        chord_quality: quality,
        strengths: scoring::strengths(&matches, params),
        strings: string_reports(&matches),
        problems,
    };

    SnapshotAnalysis {
        notes,
        confidence,
        is_correct,
        analysis,
        feedback,
    }
}

fn string_reports(matches: &[ToneMatch]) -> Vec<StringReport> {
    matches
        .iter()
        .map(|m| StringReport {
            string: m.tone.string,
            fret: m.tone.fret,
            expected_note: m.tone.note.clone(),
            detected: m.detected.is_some(),
            amplitude: m.amplitude,
            cents: m.detected.map(|_| m.cents),
        })
        .collect()
}
