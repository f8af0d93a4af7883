// Error types for the fretcoach audio core
//
// This module defines custom error types for device-session and chord-detection
// operations, providing structured error handling with stable numeric codes
// that UI callers can branch on.

mod audio;
mod detection;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};
pub use detection::{log_detection_error, DetectionError, DetectionErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the crate boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
