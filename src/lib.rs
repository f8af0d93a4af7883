// Fretcoach Core - audio engine for a guitar practice tutor
// Device session guard, audio-clock scheduler, chord detection and feedback cues

// Module declarations
pub mod analysis;
pub mod calibration;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod feedback;
pub mod logging;
pub mod scheduler;
pub mod session;

// Re-exports for convenience
pub use analysis::{ChordCatalog, ChordDetectionEngine, DetectionResult};
pub use config::AppConfig;
pub use context::AudioCore;
pub use error::{AudioError, DetectionError, ErrorCode};
pub use feedback::{AudioMode, FeedbackDispatcher, PriorityArbiter, SoundCategory};
pub use scheduler::{ClockTick, Scheduler, SchedulerState};
pub use session::{DeviceSession, GestureEvent, SessionGuard, SessionState};
