// Scoring - confidence, chord quality and learner-facing feedback

use serde::{Deserialize, Serialize};

use super::problems::{Problem, ProblemKind, Severity, ToneMatch};
use super::{AnalysisParams, ChordTarget, DetectedNote};

const COVERAGE_WEIGHT: f32 = 0.6;
const TUNING_WEIGHT: f32 = 0.25;
const CLARITY_WEIGHT: f32 = 0.15;

/// Deviation at which a tone's tuning score reaches zero
const TUNING_SPAN_CENTS: f32 = 50.0;

const PERFECT_SCORE: f32 = 0.9;
const GOOD_SCORE: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordQuality {
    Perfect,
    Good,
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cue", rename_all = "snake_case")]
pub enum VisualCue {
    Celebrate,
    Encourage,
    HighlightStrings { strings: Vec<u8> },
    ShowNoiseWarning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub kind: FeedbackKind,
    pub message: String,
    pub visual_cue: VisualCue,
    /// Concrete next step, present whenever something must change
    pub action_required: Option<String>,
}

fn tuning_score(cents: f32) -> f32 {
    (1.0 - cents.abs() / TUNING_SPAN_CENTS).max(0.0)
}

/// Share of detected amplitude that belongs to the target chord
pub fn clarity(target: &ChordTarget, notes: &[DetectedNote]) -> f32 {
    let total: f32 = notes.iter().map(|n| n.amplitude).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let classes = target.pitch_classes();
    let in_chord: f32 = notes
        .iter()
        .filter(|n| classes.contains(&n.pitch_class))
        .map(|n| n.amplitude)
        .sum();
    (in_chord / total).clamp(0.0, 1.0)
}

/// Detection confidence in [0, 1].
///
/// Weighted blend of expected-tone coverage (each tone's strength saturates
/// at the low-pressure threshold), per-tone tuning and spectral clarity.
/// Non-decreasing in the amplitude of any expected tone.
pub fn confidence(matches: &[ToneMatch], clarity: f32, params: &AnalysisParams) -> f32 {
    if matches.is_empty() {
        return 0.0;
    }
    let count = matches.len() as f32;
    let threshold = params.low_pressure_amplitude.max(f32::EPSILON);

    let coverage: f32 = matches
        .iter()
        .filter(|m| m.detected.is_some())
        .map(|m| (m.amplitude / threshold).min(1.0))
        .sum::<f32>()
        / count;
    let tuning: f32 = matches
        .iter()
        .filter(|m| m.detected.is_some())
        .map(|m| tuning_score(m.cents))
        .sum::<f32>()
        / count;

    (COVERAGE_WEIGHT * coverage + TUNING_WEIGHT * tuning + CLARITY_WEIGHT * clarity)
        .clamp(0.0, 1.0)
}

/// Combined quality score in [0, 1]
pub fn quality_score(matches: &[ToneMatch], problems: &[Problem], params: &AnalysisParams) -> f32 {
    if matches.is_empty() {
        return 0.0;
    }
    let count = matches.len() as f32;
    let found: Vec<&ToneMatch> = matches.iter().filter(|m| m.detected.is_some()).collect();

    let in_tune = found
        .iter()
        .filter(|m| m.cents.abs() <= params.cents_tolerance)
        .count() as f32;
    let correct_fraction = in_tune / count;

    let tuning_term = if found.is_empty() {
        0.0
    } else {
        let mean_cents = found.iter().map(|m| m.cents.abs()).sum::<f32>() / found.len() as f32;
        tuning_score(mean_cents)
    };

    let penalty_total: f32 = problems.iter().map(|p| p.severity.weight()).sum();
    let penalty = (penalty_total / (Severity::High.weight() * count)).min(1.0);

    (0.5 * correct_fraction + 0.3 * tuning_term + 0.2 * (1.0 - penalty)).clamp(0.0, 1.0)
}

pub fn classify_quality(
    matches: &[ToneMatch],
    problems: &[Problem],
    params: &AnalysisParams,
) -> ChordQuality {
    let score = quality_score(matches, problems, params);
    if problems.is_empty() && score >= PERFECT_SCORE {
        ChordQuality::Perfect
    } else if score >= GOOD_SCORE {
        ChordQuality::Good
    } else {
        ChordQuality::Poor
    }
}

/// Things the learner did right
pub fn strengths(matches: &[ToneMatch], params: &AnalysisParams) -> Vec<String> {
    let clean: Vec<&ToneMatch> = matches
        .iter()
        .filter(|m| {
            m.detected.is_some()
                && m.amplitude >= params.low_pressure_amplitude
                && m.cents.abs() <= params.cents_tolerance
        })
        .collect();

    let mut strengths = Vec::new();
    if !matches.is_empty() && clean.len() == matches.len() {
        strengths.push("Every string rings clearly".to_string());
    } else {
        strengths.extend(
            clean
                .iter()
                .map(|m| format!("String {} ({}) rings clearly", m.tone.string, m.tone.note)),
        );
    }
    if !clean.is_empty() && clean.iter().all(|m| m.cents.abs() <= params.cents_tolerance / 2.0) {
        strengths.push("Well in tune".to_string());
    }
    strengths
}

/// Build the feedback envelope for a detection
pub fn feedback(
    chord: &str,
    quality: ChordQuality,
    confidence: f32,
    problems: &[Problem],
) -> Feedback {
    if let Some(worst) = problems.first() {
        let visual_cue = if worst.kind == ProblemKind::NoiseInterference {
            VisualCue::ShowNoiseWarning
        } else {
            let mut strings: Vec<u8> = problems
                .iter()
                .filter(|p| p.severity == worst.severity)
                .filter_map(|p| p.string)
                .collect();
            strings.sort_unstable();
            strings.dedup();
            VisualCue::HighlightStrings { strings }
        };
        return Feedback {
            kind: FeedbackKind::Error,
            message: format!("{}: {}", worst.kind.label(), worst.description),
            visual_cue,
            action_required: Some(worst.solution.clone()),
        };
    }

    match quality {
        ChordQuality::Perfect => Feedback {
            kind: FeedbackKind::Success,
            message: format!("Perfect {} chord!", chord),
            visual_cue: VisualCue::Celebrate,
            action_required: None,
        },
        _ => Feedback {
            kind: FeedbackKind::Success,
            message: format!(
                "Nice {} chord, {:.0}% confident. Keep it ringing!",
                chord,
                confidence * 100.0
            ),
            visual_cue: VisualCue::Encourage,
            action_required: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::chords::ChordCatalog;

    fn matches(amplitudes: &[f32], cents: f32) -> Vec<ToneMatch> {
        let target = ChordCatalog::standard().get("Em").unwrap().clone();
        target
            .tones
            .iter()
            .zip(amplitudes)
            .map(|(tone, &amplitude)| ToneMatch {
                tone: tone.clone(),
                detected: (amplitude > 0.0).then_some(0),
                amplitude,
                cents,
            })
            .collect()
    }

    #[test]
    fn test_confidence_bounds() {
        let params = AnalysisParams::default();
        assert_eq!(confidence(&[], 1.0, &params), 0.0);
        assert_eq!(confidence(&matches(&[0.0; 6], 0.0), 0.0, &params), 0.0);
        let full = confidence(&matches(&[0.9; 6], 0.0), 1.0, &params);
        assert!((full - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_monotone_in_amplitude() {
        let params = AnalysisParams::default();
        let mut previous = 0.0;
        for step in 0..=20 {
            let amplitude = step as f32 * 0.01;
            let mut amps = [0.5; 6];
            amps[2] = amplitude;
            let value = confidence(&matches(&amps, 5.0), 0.9, &params);
            assert!(value >= previous, "{} < {} at {}", value, previous, amplitude);
            previous = value;
        }
    }

    #[test]
    fn test_quality_levels() {
        let params = AnalysisParams::default();
        assert_eq!(
            classify_quality(&matches(&[0.5; 6], 3.0), &[], &params),
            ChordQuality::Perfect
        );
        assert_eq!(
            classify_quality(&matches(&[0.0; 6], 0.0), &[], &params),
            ChordQuality::Poor
        );
    }

    #[test]
    fn test_perfect_requires_no_problems() {
        let params = AnalysisParams::default();
        let problem = Problem {
            kind: ProblemKind::LowPressure,
            severity: Severity::Low,
            string: Some(1),
            description: String::new(),
            solution: String::new(),
        };
        assert_eq!(
            classify_quality(&matches(&[0.5; 6], 3.0), &[problem], &params),
            ChordQuality::Good
        );
    }

    #[test]
    fn test_feedback_names_worst_problem() {
        let problems = vec![
            Problem {
                kind: ProblemKind::MutedString,
                severity: Severity::High,
                string: Some(3),
                description: "String 3 (G3) is not ringing".to_string(),
                solution: ProblemKind::MutedString.remedy().to_string(),
            },
            Problem {
                kind: ProblemKind::MutedString,
                severity: Severity::High,
                string: Some(1),
                description: "String 1 (E4) is not ringing".to_string(),
                solution: ProblemKind::MutedString.remedy().to_string(),
            },
        ];
        let fb = feedback("Em", ChordQuality::Poor, 0.3, &problems);
        assert_eq!(fb.kind, FeedbackKind::Error);
        assert_eq!(
            fb.action_required.as_deref(),
            Some(ProblemKind::MutedString.remedy())
        );
        assert_eq!(fb.visual_cue, VisualCue::HighlightStrings { strings: vec![1, 3] });
    }

    #[test]
    fn test_feedback_success_paths() {
        let perfect = feedback("C", ChordQuality::Perfect, 0.95, &[]);
        assert_eq!(perfect.visual_cue, VisualCue::Celebrate);
        assert!(perfect.action_required.is_none());

        let good = feedback("C", ChordQuality::Good, 0.8, &[]);
        assert_eq!(good.kind, FeedbackKind::Success);
        assert_eq!(good.visual_cue, VisualCue::Encourage);
    }

    #[test]
    fn test_strengths() {
        let params = AnalysisParams::default();
        let all = strengths(&matches(&[0.5; 6], 2.0), &params);
        assert!(all.contains(&"Every string rings clearly".to_string()));
        assert!(all.contains(&"Well in tune".to_string()));
        assert!(strengths(&matches(&[0.0; 6], 0.0), &params).is_empty());
    }
}
