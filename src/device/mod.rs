//! Platform device abstractions for the audio core.
//!
//! The session guard only ever talks to an [`AudioDevice`] factory; everything
//! downstream (scheduler, analysis engine, feedback dispatcher) talks to the
//! [`DeviceGraph`] the factory produced. Two implementations ship with the
//! crate: a deterministic stub used by tests and the CLI, and a `cpal`
//! device for desktop hardware.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::analysis::FrequencySnapshot;
use crate::config::AudioConfig;
use crate::error::AudioError;

#[cfg(not(target_os = "android"))]
mod cpal_device;
#[cfg(not(target_os = "android"))]
pub use cpal_device::CpalDevice;

mod stub;
pub use stub::{synthesize_snapshot, ManualTimeSource, StubControls, StubDevice};

/// Oscillator shape for feedback tones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    Triangle,
    Square,
}

/// A single short tone scheduled on the device graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tone {
    pub frequency_hz: f32,
    /// Audio-clock time (seconds) at which the tone starts
    pub start_time: f64,
    pub duration_secs: f32,
    /// Linear gain, already clamped by the caller
    pub gain: f32,
    pub waveform: Waveform,
}

/// Factory for the platform device graph.
///
/// Only the session guard calls [`AudioDevice::open`]; it does so at most
/// once per live session.
pub trait AudioDevice: Send + Sync {
    fn open(&self, config: &AudioConfig) -> Result<Arc<dyn DeviceGraph>, AudioError>;
}

/// Handle to an open device graph (output clock, capture, tone synthesis).
pub trait DeviceGraph: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Monotonic audio-clock time in seconds since the graph was opened.
    fn current_time(&self) -> f64;

    /// Request microphone capture and build a spectral analyser on it.
    ///
    /// Returns [`AudioError::PermissionDenied`] when capture is refused.
    fn open_analyser(&self, fft_size: usize) -> Result<Box<dyn SpectrumAnalyser>, AudioError>;

    fn play_tone(&self, tone: Tone) -> Result<(), AudioError>;

    fn suspend(&self) -> Result<(), AudioError>;

    fn resume(&self) -> Result<(), AudioError>;

    /// Release the device. Further calls become no-ops or errors.
    fn close(&self);
}

/// Spectral analyser node bound to the capture stream.
pub trait SpectrumAnalyser: Send {
    fn fft_size(&self) -> usize;

    /// Capture one frequency snapshot of `fft_size / 2` bins.
    fn frequency_data(&mut self) -> FrequencySnapshot;

    /// Stop capture and release the stream.
    fn release(&mut self);
}

/// Trait representing a monotonic time source used for visual-clock
/// timestamps and rate limiting.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Default time source backed by `Instant::now`.
#[derive(Default)]
pub struct SystemTimeSource {
    _unit: (),
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
