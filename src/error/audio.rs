// Audio device and session error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Single source of truth for the numeric codes reported by [`AudioError`].
///
/// Error code range: 1001-1010
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Session creation attempted outside a user-interaction handler
    pub const NO_USER_GESTURE: i32 = 1001;

    /// No device session exists yet
    pub const NOT_INITIALIZED: i32 = 1002;

    /// A concurrent initialization attempt failed
    pub const INITIALIZATION_FAILED: i32 = 1003;

    /// Hardware error occurred
    pub const HARDWARE_ERROR: i32 = 1004;

    /// Microphone permission denied
    pub const PERMISSION_DENIED: i32 = 1005;

    /// Failed to open audio stream
    pub const STREAM_OPEN_FAILED: i32 = 1006;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1007;

    /// Operation not valid in the current lifecycle state
    pub const INVALID_STATE: i32 = 1008;

    /// No capture device available
    pub const CAPTURE_UNAVAILABLE: i32 = 1009;

    /// Audio stream disconnected or channel closed unexpectedly
    pub const STREAM_FAILURE: i32 = 1010;
}

/// Log an audio error with structured context
///
/// Emits error_code, component and message fields so log scrapers can
/// group failures without parsing free text.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=DeviceSession, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// These errors cover the device session lifecycle, microphone capture and
/// tone output.
///
/// Error code ranges: 1001-1010
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Session creation attempted without a trusted user gesture
    NoUserGesture,

    /// No device session exists
    NotInitialized,

    /// Another caller's initialization attempt failed while we waited on it
    InitializationFailed,

    /// Hardware error occurred
    HardwareError { details: String },

    /// Microphone permission denied
    PermissionDenied,

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Operation not valid in the current lifecycle state
    InvalidState { operation: String, state: String },

    /// No capture device could be found
    CaptureUnavailable,

    /// Stream channel disconnected unexpectedly
    StreamFailure { reason: String },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::NoUserGesture => AudioErrorCodes::NO_USER_GESTURE,
            AudioError::NotInitialized => AudioErrorCodes::NOT_INITIALIZED,
            AudioError::InitializationFailed => AudioErrorCodes::INITIALIZATION_FAILED,
            AudioError::HardwareError { .. } => AudioErrorCodes::HARDWARE_ERROR,
            AudioError::PermissionDenied => AudioErrorCodes::PERMISSION_DENIED,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::InvalidState { .. } => AudioErrorCodes::INVALID_STATE,
            AudioError::CaptureUnavailable => AudioErrorCodes::CAPTURE_UNAVAILABLE,
            AudioError::StreamFailure { .. } => AudioErrorCodes::STREAM_FAILURE,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::NoUserGesture => {
                "Audio session must be created from a user interaction (tap, click or key press)"
                    .to_string()
            }
            AudioError::NotInitialized => {
                "Audio session not initialized. Call initialize() from a user gesture first."
                    .to_string()
            }
            AudioError::InitializationFailed => {
                "Concurrent audio session initialization failed".to_string()
            }
            AudioError::HardwareError { details } => {
                format!("Hardware error: {}", details)
            }
            AudioError::PermissionDenied => {
                "Microphone permission denied. Please grant microphone access.".to_string()
            }
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::InvalidState { operation, state } => {
                format!("Cannot {} while session is {}", operation, state)
            }
            AudioError::CaptureUnavailable => "No microphone input device found".to_string(),
            AudioError::StreamFailure { reason } => {
                format!("Audio stream failed: {}", reason)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::HardwareError {
            details: err.to_string(),
        }
    }
}
