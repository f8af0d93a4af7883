// CalibrationProfile - per-environment detection adjustments
//
// Measured from frames captured while the learner is not playing. The noise
// floor is the mean of the loudest bin across frames plus a 50% margin, so
// steady background hum stays below the peak-picking threshold.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::analysis::FrequencySnapshot;

/// Margin applied on top of the measured ambient level
const NOISE_MARGIN: f32 = 1.5;

/// Ceiling for a measured noise floor; anything louder is not "ambient"
pub const MAX_NOISE_FLOOR: f32 = 0.3;

/// Target loudest-bin level that sensitivity scaling aims for
const REFERENCE_LEVEL: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    /// Ambient noise floor (linear amplitude)
    pub noise_floor: f32,
    /// Multiplier applied to every bin before analysis
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,
    /// Frames averaged to produce this profile (0 = never measured)
    #[serde(default)]
    pub frames_measured: u32,
    /// Unix time of the measurement in milliseconds
    #[serde(default)]
    pub updated_at_ms: u64,
}

fn default_sensitivity() -> f32 {
    1.0
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl CalibrationProfile {
    /// Measure a profile from ambient frames
    ///
    /// # Arguments
    /// * `frames` - snapshots captured while nothing is being played
    /// * `min_floor` - configured floor, the result never goes below it
    pub fn measure(frames: &[FrequencySnapshot], min_floor: f32) -> Self {
        if frames.is_empty() {
            return Self {
                noise_floor: min_floor,
                ..Self::default()
            };
        }

        let ambient =
            frames.iter().map(|f| f.max_amplitude()).sum::<f32>() / frames.len() as f32;
        let noise_floor = (ambient * NOISE_MARGIN).clamp(min_floor, MAX_NOISE_FLOOR.max(min_floor));

        Self {
            noise_floor,
            sensitivity: 1.0,
            frames_measured: frames.len() as u32,
            updated_at_ms: now_ms(),
        }
    }

    /// Derive sensitivity from a reference strum so quiet instruments or
    /// distant microphones still reach the detection thresholds.
    pub fn with_reference_level(mut self, reference: &FrequencySnapshot) -> Self {
        let level = reference.max_amplitude();
        if level > self.noise_floor {
            self.sensitivity = (REFERENCE_LEVEL / level).clamp(1.0, 4.0);
            self.updated_at_ms = now_ms();
        }
        self
    }

    pub fn is_measured(&self) -> bool {
        self.frames_measured > 0
    }

    /// Reject values that would disable detection outright
    pub fn is_valid(&self) -> bool {
        self.noise_floor.is_finite()
            && (0.0..1.0).contains(&self.noise_floor)
            && self.sensitivity.is_finite()
            && self.sensitivity > 0.0
    }
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self {
            noise_floor: 0.0,
            sensitivity: 1.0,
            frames_measured: 0,
            updated_at_ms: 0,
        }
    }
}
