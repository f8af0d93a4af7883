// Chord detection error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Detection error code constants
///
/// Error code range: 2001-2007
pub struct DetectionErrorCodes {}

impl DetectionErrorCodes {
    /// Device session guard has no ready session
    pub const NO_SESSION: i32 = 2001;

    /// Detection engine not initialized
    pub const NOT_INITIALIZED: i32 = 2002;

    /// Requested chord is not in the catalog
    pub const UNKNOWN_CHORD: i32 = 2003;

    /// Calibration profile could not be read or written
    pub const CALIBRATION_STORE: i32 = 2004;

    /// Engine state lock was poisoned
    pub const STATE_POISONED: i32 = 2005;

    /// Snapshot does not match the analyser geometry
    pub const INVALID_SNAPSHOT: i32 = 2006;

    /// Microphone capture could not be opened
    pub const CAPTURE_FAILED: i32 = 2007;
}

/// Log a detection error with structured context
pub fn log_detection_error(err: &DetectionError, context: &str) {
    error!(
        "Detection error in {}: code={}, component=ChordDetectionEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Chord detection errors
///
/// These errors cover the analysis engine lifecycle, chord lookup and
/// calibration persistence. Detection timeouts are not errors: they are
/// reported as a zero-confidence result.
///
/// Error code ranges: 2001-2007
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionError {
    /// No ready device session to bind the analyser to
    NoSession,

    /// Engine not initialized (call initialize() first)
    NotInitialized,

    /// Chord name not found in the catalog
    UnknownChord { name: String },

    /// Calibration profile storage failed
    CalibrationStore { reason: String },

    /// Engine state lock poisoned
    StatePoisoned,

    /// Snapshot geometry is unusable
    InvalidSnapshot { reason: String },

    /// Capture stream failed for a reason other than permission
    CaptureFailed { reason: String },
}

impl ErrorCode for DetectionError {
    fn code(&self) -> i32 {
        match self {
            DetectionError::NoSession => DetectionErrorCodes::NO_SESSION,
            DetectionError::NotInitialized => DetectionErrorCodes::NOT_INITIALIZED,
            DetectionError::UnknownChord { .. } => DetectionErrorCodes::UNKNOWN_CHORD,
            DetectionError::CalibrationStore { .. } => DetectionErrorCodes::CALIBRATION_STORE,
            DetectionError::StatePoisoned => DetectionErrorCodes::STATE_POISONED,
            DetectionError::InvalidSnapshot { .. } => DetectionErrorCodes::INVALID_SNAPSHOT,
            DetectionError::CaptureFailed { .. } => DetectionErrorCodes::CAPTURE_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            DetectionError::NoSession => {
                "No audio session available. Initialize the session from a user gesture first."
                    .to_string()
            }
            DetectionError::NotInitialized => "Chord detection not initialized".to_string(),
            DetectionError::UnknownChord { name } => format!("Unknown chord: {}", name),
            DetectionError::CalibrationStore { reason } => {
                format!("Calibration storage failed: {}", reason)
            }
            DetectionError::StatePoisoned => "Detection state lock poisoned".to_string(),
            DetectionError::InvalidSnapshot { reason } => {
                format!("Invalid frequency snapshot: {}", reason)
            }
            DetectionError::CaptureFailed { reason } => {
                format!("Microphone capture failed: {}", reason)
            }
        }
    }
}

impl fmt::Display for DetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DetectionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for DetectionError {}

impl From<serde_json::Error> for DetectionError {
    fn from(err: serde_json::Error) -> Self {
        DetectionError::CalibrationStore {
            reason: err.to_string(),
        }
    }
}
