// Feedback module - short advisory sounds on the shared device graph
//
// Components:
// - SoundCategory: what a cue means, and the tones that make it up
// - PriorityArbiter: mutes interface/gamification cues during focused modes
// - RateLimiter: per-category spacing and rolling-window cap
// - FeedbackDispatcher: ties the above to the device session

use serde::{Deserialize, Serialize};

use crate::device::Waveform;

pub mod arbiter;
pub mod dispatcher;
pub mod rate_limit;

pub use arbiter::{AudioMode, PriorityArbiter};
pub use dispatcher::FeedbackDispatcher;
pub use rate_limit::RateLimiter;

/// Priority group of a sound category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundGroup {
    Interface,
    Gamification,
    Training,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundCategory {
    Click,
    Navigation,
    Achievement,
    LevelUp,
    StreakMilestone,
    Success,
    Error,
    Countdown,
}

/// One tone of a cue, offset from the cue start
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneStep {
    pub offset_ms: u32,
    pub frequency_hz: f32,
    pub duration_ms: u32,
    pub waveform: Waveform,
}

const fn step(offset_ms: u32, frequency_hz: f32, duration_ms: u32, waveform: Waveform) -> ToneStep {
    ToneStep {
        offset_ms,
        frequency_hz,
        duration_ms,
        waveform,
    }
}

// Pitches used by the cues
const G4: f32 = 392.00;
const C5: f32 = 523.25;
const E5: f32 = 659.25;
const G5: f32 = 783.99;
const A5: f32 = 880.00;
const C6: f32 = 1046.50;

const CLICK: [ToneStep; 1] = [step(0, 1200.0, 25, Waveform::Sine)];
const NAVIGATION: [ToneStep; 1] = [step(0, 660.0, 40, Waveform::Sine)];
const ACHIEVEMENT: [ToneStep; 4] = [
    step(0, C5, 110, Waveform::Triangle),
    step(80, E5, 110, Waveform::Triangle),
    step(160, G5, 110, Waveform::Triangle),
    step(240, C6, 180, Waveform::Triangle),
];
const LEVEL_UP: [ToneStep; 4] = [
    step(0, G4, 120, Waveform::Square),
    step(90, C5, 120, Waveform::Square),
    step(180, E5, 120, Waveform::Square),
    step(270, G5, 200, Waveform::Square),
];
const STREAK_MILESTONE: [ToneStep; 2] = [
    step(0, E5, 90, Waveform::Triangle),
    step(90, G5, 140, Waveform::Triangle),
];
const SUCCESS: [ToneStep; 3] = [
    step(0, C5, 110, Waveform::Sine),
    step(70, E5, 110, Waveform::Sine),
    step(140, G5, 160, Waveform::Sine),
];
const ERROR: [ToneStep; 2] = [
    step(0, 220.0, 150, Waveform::Triangle),
    step(110, 185.0, 200, Waveform::Triangle),
];
const COUNTDOWN: [ToneStep; 1] = [step(0, A5, 60, Waveform::Square)];

impl SoundCategory {
    pub const ALL: [SoundCategory; 8] = [
        SoundCategory::Click,
        SoundCategory::Navigation,
        SoundCategory::Achievement,
        SoundCategory::LevelUp,
        SoundCategory::StreakMilestone,
        SoundCategory::Success,
        SoundCategory::Error,
        SoundCategory::Countdown,
    ];

    pub fn group(self) -> SoundGroup {
        match self {
            SoundCategory::Click | SoundCategory::Navigation => SoundGroup::Interface,
            SoundCategory::Achievement
            | SoundCategory::LevelUp
            | SoundCategory::StreakMilestone => SoundGroup::Gamification,
            SoundCategory::Success | SoundCategory::Error | SoundCategory::Countdown => {
                SoundGroup::Training
            }
        }
    }

    /// Tone sequence, fixed offsets from the cue start
    pub fn tones(self) -> &'static [ToneStep] {
        match self {
            SoundCategory::Click => &CLICK,
            SoundCategory::Navigation => &NAVIGATION,
            SoundCategory::Achievement => &ACHIEVEMENT,
            SoundCategory::LevelUp => &LEVEL_UP,
            SoundCategory::StreakMilestone => &STREAK_MILESTONE,
            SoundCategory::Success => &SUCCESS,
            SoundCategory::Error => &ERROR,
            SoundCategory::Countdown => &COUNTDOWN,
        }
    }

    /// Parse the snake_case name used by config and the CLI
    pub fn from_name(name: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(name.trim().to_lowercase())).ok()
    }
}
