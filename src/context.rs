// AudioCore: ownership holder for the audio core
//
// Builds one SessionGuard and hands it to the scheduler, the detection
// engine and the feedback dispatcher. Hosts keep one AudioCore per process
// (or per test) instead of global statics; dropping it closes the device.

use std::sync::Arc;

use log::info;

use crate::analysis::{ChordCatalog, ChordDetectionEngine, DetectionResult};
use crate::calibration::ProfileStore;
use crate::config::AppConfig;
use crate::device::{AudioDevice, SystemTimeSource, TimeSource};
use crate::error::{AudioError, DetectionError};
use crate::feedback::{AudioMode, FeedbackDispatcher, PriorityArbiter, SoundCategory};
use crate::scheduler::Scheduler;
use crate::session::{GestureEvent, SessionGuard};

/// Volume used for result cues played by `practice_chord`
const RESULT_CUE_VOLUME: f32 = 0.6;

pub struct AudioCore {
    config: AppConfig,
    guard: Arc<SessionGuard>,
    scheduler: Scheduler,
    engine: ChordDetectionEngine,
    arbiter: Arc<PriorityArbiter>,
    dispatcher: FeedbackDispatcher,
}

impl AudioCore {
    /// Core with the system clock and the standard chord catalog
    pub fn new(device: Arc<dyn AudioDevice>, store: Arc<dyn ProfileStore>, config: AppConfig) -> Self {
        Self::with_parts(
            device,
            store,
            Arc::new(SystemTimeSource::default()),
            ChordCatalog::standard(),
            config,
        )
    }

    /// Core with every collaborator supplied by the caller
    pub fn with_parts(
        device: Arc<dyn AudioDevice>,
        store: Arc<dyn ProfileStore>,
        time_source: Arc<dyn TimeSource>,
        catalog: ChordCatalog,
        config: AppConfig,
    ) -> Self {
        let guard = Arc::new(SessionGuard::new(device, config.audio.clone()));
        let scheduler = Scheduler::new(
            Arc::clone(&guard),
            config.scheduler.clone(),
            Arc::clone(&time_source),
        );
        let engine = ChordDetectionEngine::new(
            Arc::clone(&guard),
            config.detection.clone(),
            catalog,
            store,
        );
        let arbiter = Arc::new(PriorityArbiter::new());
        let dispatcher = FeedbackDispatcher::new(
            Arc::clone(&guard),
            Arc::clone(&arbiter),
            config.feedback.clone(),
            time_source,
        );

        Self {
            config,
            guard,
            scheduler,
            engine,
            arbiter,
            dispatcher,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn engine(&self) -> &ChordDetectionEngine {
        &self.engine
    }

    pub fn arbiter(&self) -> &Arc<PriorityArbiter> {
        &self.arbiter
    }

    pub fn dispatcher(&self) -> &FeedbackDispatcher {
        &self.dispatcher
    }

    /// Open the device session from a user gesture
    pub async fn initialize(&self, gesture: &GestureEvent) -> Result<(), AudioError> {
        self.guard.initialize(gesture).await
    }

    /// Bind the detection engine and enter chord-training priority mode
    ///
    /// Returns `Ok(false)` when microphone access is refused.
    pub async fn start_chord_training(&self) -> Result<bool, DetectionError> {
        let ready = self.engine.initialize().await?;
        if ready {
            self.arbiter.set_mode_active(AudioMode::ChordTraining, true);
        }
        Ok(ready)
    }

    pub fn stop_chord_training(&self) {
        self.engine.stop_listening();
        self.arbiter.set_mode_active(AudioMode::ChordTraining, false);
    }

    /// Detect `chord` and answer with a success or error cue
    pub async fn practice_chord(
        &self,
        chord: &str,
        timeout_ms: u64,
    ) -> Result<DetectionResult, DetectionError> {
        let result = self.engine.detect_chord(chord, timeout_ms).await?;
        let cue = if result.is_correct {
            SoundCategory::Success
        } else {
            SoundCategory::Error
        };
        self.dispatcher.play_sound(cue, RESULT_CUE_VOLUME);
        Ok(result)
    }

    /// Cancel scheduled events, release capture and close the session
    pub fn shutdown(&self) -> Result<(), AudioError> {
        self.scheduler.cancel_all();
        self.engine.destroy();
        self.arbiter.set_mode_active(AudioMode::ChordTraining, false);
        self.guard.dispose()?;
        info!("[AudioCore] Shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::MemoryProfileStore;
    use crate::device::{synthesize_snapshot, StubDevice};
    use crate::session::SessionState;

    #[tokio::test(start_paused = true)]
    async fn test_full_lifecycle() {
        let device = StubDevice::new();
        let controls = device.controls();
        let core = AudioCore::new(
            Arc::new(device),
            Arc::new(MemoryProfileStore::new()),
            AppConfig::for_tests(),
        );

        core.initialize(&GestureEvent::pointer()).await.unwrap();
        assert_eq!(core.start_chord_training().await, Ok(true));
        assert!(core.arbiter().is_mode_active(AudioMode::ChordTraining));

        let snapshot = synthesize_snapshot(
            &[(261.63, 0.8), (329.63, 0.8), (392.0, 0.8)],
            48_000,
            core.config().detection.fft_size,
            0.0,
            1,
        );
        controls.set_bins(snapshot.bins);

        let result = core.practice_chord("C", 500).await.unwrap();
        assert!(result.is_correct);
        assert_eq!(controls.played_tones().len(), SoundCategory::Success.tones().len());

        core.stop_chord_training();
        assert!(!core.engine().is_listening());

        core.shutdown().unwrap();
        assert_eq!(core.guard().state(), SessionState::Closed);
        assert_eq!(controls.close_count(), 1);
        assert_eq!(controls.live_analysers(), 0);
    }
}
