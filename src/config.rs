//! Configuration management for runtime parameter tuning
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling threshold tuning without recompilation. Detection thresholds,
//! scheduler frame rate and feedback limits can all be adjusted via the
//! config file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

/// Device session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Preferred sample rate in Hz (the device may override it)
    pub sample_rate: u32,
    /// Capacity of the tone queue feeding the output callback
    pub tone_queue_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            tone_queue_capacity: 64,
        }
    }
}

/// How the scheduler's poll loop is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollMode {
    /// Fixed-rate tokio interval standing in for the display refresh callback
    Timer,
    /// The host calls `Scheduler::tick()` from its own frame loop
    Manual,
}

/// Clock-synchronized scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Poll period in milliseconds (16 ≈ 60 Hz display refresh)
    pub frame_interval_ms: u64,
    pub poll_mode: PollMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            poll_mode: PollMode::Timer,
        }
    }
}

/// Chord detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// FFT window size for the spectral analyser
    pub fft_size: usize,
    /// Minimum bin amplitude considered signal (calibration may raise it)
    pub noise_floor: f32,
    /// Raw amplitude below which a detected chord tone counts as weakly fretted
    pub low_pressure_amplitude: f32,
    /// Absolute cents deviation still considered in tune
    pub cents_tolerance: f32,
    /// Highest fret included in the fretboard map
    pub max_fret: u8,
    /// Maximum number of peaks mapped to notes per snapshot
    pub max_peaks: usize,
    /// Share of peak energy outside the chord that signals interference
    pub foreign_energy_ratio: f32,
    /// Confidence required for a detection to count as a match
    pub min_confidence: f32,
    /// Consecutive matching snapshots required before returning early
    pub stable_frames: u32,
    /// Delay between snapshot polls in milliseconds
    pub poll_interval_ms: u64,
    /// Snapshots averaged when measuring the ambient noise floor
    pub calibration_frames: u32,
    /// Key under which the calibration profile is persisted
    pub calibration_key: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            fft_size: 16_384,
            noise_floor: 0.02,
            low_pressure_amplitude: 0.12,
            cents_tolerance: 25.0,
            max_fret: 15,
            max_peaks: 16,
            foreign_energy_ratio: 0.45,
            min_confidence: 0.7,
            stable_frames: 3,
            poll_interval_ms: 16,
            calibration_frames: 8,
            calibration_key: "fretcoach.calibration".to_string(),
        }
    }
}

/// Feedback sound limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Ceiling on linear gain for any cue
    pub max_gain: f32,
    /// Ceiling on a single tone's duration in milliseconds
    pub max_tone_ms: u32,
    /// Minimum gap between two cues of the same category
    pub min_interval_ms: u64,
    /// Maximum cues of one category inside the rolling window
    pub max_per_window: usize,
    /// Rolling window length in milliseconds
    pub window_ms: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            max_gain: 0.2,
            max_tone_ms: 200,
            min_interval_ms: 150,
            max_per_window: 20,
            window_ms: 60_000,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or defaults when the file is missing or
    /// the JSON is invalid (a warning is logged in both cases).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default asset location
    pub fn load() -> Self {
        Self::load_from_file("assets/fretcoach_config.json")
    }

    /// Configuration for deterministic tests: manual ticking, short polls
    pub fn for_tests() -> Self {
        let mut config = Self::default();
        config.scheduler.poll_mode = PollMode::Manual;
        config.detection.calibration_frames = 2;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.scheduler.frame_interval_ms, 16);
        assert_eq!(config.detection.fft_size, 16_384);
        assert_eq!(config.feedback.max_gain, 0.2);
        assert_eq!(config.feedback.max_tone_ms, 200);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            parsed.detection.cents_tolerance,
            config.detection.cents_tolerance
        );
        assert_eq!(parsed.scheduler.poll_mode, PollMode::Timer);
    }

    #[test]
    fn test_partial_json_uses_section_defaults() {
        let json = r#"{ "feedback": { "max_gain": 0.1, "max_tone_ms": 120,
            "min_interval_ms": 50, "max_per_window": 5, "window_ms": 1000 } }"#;
        let parsed: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.feedback.max_per_window, 5);
        assert_eq!(parsed.detection.stable_frames, 3);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("/nonexistent/fretcoach.json");
        assert_eq!(config.detection.min_confidence, 0.7);
    }
}
