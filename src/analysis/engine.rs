// ChordDetectionEngine - live chord detection against the device session
//
// Owns the microphone analyser and the calibration profile. The device
// session itself stays with the SessionGuard: the engine re-fetches it on
// every operation and refuses to run against a session it was not bound to.
//
// No lock is held across an await; snapshots are captured under the state
// lock and analysed after it is released.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use super::{
    analyze_snapshot, AnalysisParams, ChordCatalog, DetectionResult, DetectionTiming,
    FrequencySnapshot, SnapshotAnalysis,
};
use crate::calibration::{CalibrationProfile, ProfileStore};
use crate::config::DetectionConfig;
use crate::device::SpectrumAnalyser;
use crate::error::{log_audio_error, log_detection_error, AudioError, DetectionError, ErrorCode};
use crate::session::SessionGuard;

/// Buffered results per subscriber before lagging
const RESULT_CHANNEL_CAPACITY: usize = 64;

struct EngineState {
    analyser: Option<Box<dyn SpectrumAnalyser>>,
    /// Session the analyser was built on
    session_id: Option<u64>,
    profile: CalibrationProfile,
    listening: bool,
}

impl EngineState {
    fn release_analyser(&mut self) {
        if let Some(mut analyser) = self.analyser.take() {
            analyser.release();
        }
        self.session_id = None;
        self.listening = false;
    }
}

pub struct ChordDetectionEngine {
    guard: Arc<SessionGuard>,
    config: DetectionConfig,
    catalog: ChordCatalog,
    store: Arc<dyn ProfileStore>,
    state: Mutex<EngineState>,
    results_tx: broadcast::Sender<DetectionResult>,
}

impl ChordDetectionEngine {
    pub fn new(
        guard: Arc<SessionGuard>,
        config: DetectionConfig,
        catalog: ChordCatalog,
        store: Arc<dyn ProfileStore>,
    ) -> Self {
        let (results_tx, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        Self {
            guard,
            config,
            catalog,
            store,
            state: Mutex::new(EngineState {
                analyser: None,
                session_id: None,
                profile: CalibrationProfile::default(),
                listening: false,
            }),
            results_tx,
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, EngineState>, DetectionError> {
        self.state.lock().map_err(|_| DetectionError::StatePoisoned)
    }

    /// Bind microphone capture to the current session and load calibration
    ///
    /// # Returns
    /// * `Ok(true)` - analyser ready
    /// * `Ok(false)` - microphone permission refused
    /// * `Err(NoSession)` - no ready device session
    pub async fn initialize(&self) -> Result<bool, DetectionError> {
        let session = self.guard.session().map_err(|err| {
            warn!("[ChordDetection] initialize() without session: {}", err);
            DetectionError::NoSession
        })?;

        let analyser = match session.graph().open_analyser(self.config.fft_size) {
            Ok(analyser) => analyser,
            Err(AudioError::PermissionDenied) => {
                log_audio_error(
                    &AudioError::PermissionDenied,
                    "ChordDetectionEngine::initialize",
                );
                return Ok(false);
            }
            Err(err) => {
                log_audio_error(&err, "ChordDetectionEngine::initialize");
                return Err(DetectionError::CaptureFailed {
                    reason: err.message(),
                });
            }
        };

        {
            let mut state = self.lock_state()?;
            state.release_analyser();
            state.analyser = Some(analyser);
            state.session_id = Some(session.id());
        }

        let profile = match self.load_profile() {
            Some(profile) => {
                info!(
                    "[ChordDetection] Loaded calibration (noise floor {:.4})",
                    profile.noise_floor
                );
                profile
            }
            None => self.measure_profile().await?,
        };
        self.persist_profile(&profile);
        self.lock_state()?.profile = profile;

        info!(
            "[ChordDetection] Initialized on session {} (fft {})",
            session.id(),
            self.config.fft_size
        );
        Ok(true)
    }

    fn load_profile(&self) -> Option<CalibrationProfile> {
        match self.store.get(&self.config.calibration_key) {
            Ok(Some(profile)) if profile.is_valid() => Some(profile),
            Ok(Some(_)) => {
                warn!("[ChordDetection] Stored calibration is invalid, re-measuring");
                None
            }
            Ok(None) => None,
            Err(err) => {
                log_detection_error(&err, "ChordDetectionEngine::load_profile");
                None
            }
        }
    }

    fn persist_profile(&self, profile: &CalibrationProfile) {
        if let Err(err) = self.store.set(&self.config.calibration_key, profile) {
            warn!("[ChordDetection] Failed to persist calibration: {}", err);
        }
    }

    /// Average `calibration_frames` ambient snapshots into a profile
    async fn measure_profile(&self) -> Result<CalibrationProfile, DetectionError> {
        let frames_wanted = self.config.calibration_frames.max(1);
        let mut frames = Vec::with_capacity(frames_wanted as usize);
        for i in 0..frames_wanted {
            if let Some(frame) = self.capture()? {
                frames.push(frame);
            }
            if i + 1 < frames_wanted {
                tokio::time::sleep(self.poll_interval()).await;
            }
        }
        let profile = CalibrationProfile::measure(&frames, self.config.noise_floor);
        info!(
            "[ChordDetection] Measured calibration over {} frames (noise floor {:.4})",
            profile.frames_measured, profile.noise_floor
        );
        Ok(profile)
    }

    /// Re-measure the ambient noise floor and persist it
    pub async fn recalibrate(&self) -> Result<CalibrationProfile, DetectionError> {
        self.ensure_bound()?;
        let profile = self.measure_profile().await?;
        self.persist_profile(&profile);
        self.lock_state()?.profile = profile.clone();
        Ok(profile)
    }

    /// Scale detection sensitivity from one snapshot of a reference strum
    ///
    /// Call while the learner strums all open strings. A strum at or below
    /// the noise floor leaves the profile unchanged.
    pub fn calibrate_sensitivity(&self) -> Result<CalibrationProfile, DetectionError> {
        self.ensure_bound()?;
        let Some(reference) = self.capture()? else {
            return Err(DetectionError::NotInitialized);
        };
        let profile = self.calibration()?.with_reference_level(&reference);
        info!(
            "[ChordDetection] Sensitivity set to {:.2} from reference level {:.3}",
            profile.sensitivity,
            reference.max_amplitude()
        );
        self.persist_profile(&profile);
        self.lock_state()?.profile = profile.clone();
        Ok(profile)
    }

    /// Check that the analyser belongs to the live session
    fn ensure_bound(&self) -> Result<(), DetectionError> {
        let session = self
            .guard
            .session()
            .map_err(|_| DetectionError::NoSession)?;
        let state = self.lock_state()?;
        match (state.analyser.is_some(), state.session_id) {
            (true, Some(id)) if id == session.id() => Ok(()),
            (true, Some(id)) => {
                warn!(
                    "[ChordDetection] Bound to stale session {} (current {}), initialize again",
                    id,
                    session.id()
                );
                Err(DetectionError::NotInitialized)
            }
            _ => Err(DetectionError::NotInitialized),
        }
    }

    /// Start sampling snapshots. Safe to call repeatedly.
    pub fn start_listening(&self) -> Result<(), DetectionError> {
        let mut state = self.lock_state()?;
        if state.analyser.is_none() {
            return Err(DetectionError::NotInitialized);
        }
        if !state.listening {
            state.listening = true;
            debug!("[ChordDetection] Listening");
        }
        Ok(())
    }

    /// Stop sampling snapshots. Safe to call repeatedly.
    pub fn stop_listening(&self) {
        if let Ok(mut state) = self.lock_state() {
            if state.listening {
                state.listening = false;
                debug!("[ChordDetection] Stopped listening");
            }
        }
    }

    pub fn is_listening(&self) -> bool {
        self.lock_state().map(|s| s.listening).unwrap_or(false)
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_state().map(|s| s.analyser.is_some()).unwrap_or(false)
    }

    pub fn calibration(&self) -> Result<CalibrationProfile, DetectionError> {
        Ok(self.lock_state()?.profile.clone())
    }

    pub fn catalog(&self) -> &ChordCatalog {
        &self.catalog
    }

    /// Receiver for every result returned by `detect_chord`
    pub fn subscribe_results(&self) -> broadcast::Receiver<DetectionResult> {
        self.results_tx.subscribe()
    }

    /// Results as a stream; lagged messages are skipped
    pub fn result_stream(&self) -> impl Stream<Item = DetectionResult> {
        BroadcastStream::new(self.results_tx.subscribe()).filter_map(|result| result.ok())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms.max(1))
    }

    /// One snapshot from the analyser, `None` when not capturing
    fn capture(&self) -> Result<Option<FrequencySnapshot>, DetectionError> {
        let mut state = self.lock_state()?;
        let Some(analyser) = state.analyser.as_mut() else {
            return Ok(None);
        };
        let snapshot = analyser.frequency_data();
        let expected = analyser.fft_size() / 2;
        if snapshot.bins.len() != expected {
            return Err(DetectionError::InvalidSnapshot {
                reason: format!("expected {} bins, got {}", expected, snapshot.bins.len()),
            });
        }
        Ok(Some(snapshot))
    }

    fn capture_listening(&self) -> Result<Option<FrequencySnapshot>, DetectionError> {
        if !self.is_listening() {
            return Ok(None);
        }
        self.capture()
    }

    /// Listen until `name` is played steadily or `timeout_ms` elapses
    ///
    /// On timeout the last analysis is returned with zero confidence and
    /// `is_correct = false`.
    pub async fn detect_chord(
        &self,
        name: &str,
        timeout_ms: u64,
    ) -> Result<DetectionResult, DetectionError> {
        let target = self
            .catalog
            .get(name)
            .cloned()
            .ok_or_else(|| DetectionError::UnknownChord {
                name: name.to_string(),
            })?;
        self.ensure_bound()?;
        self.start_listening()?;

        let params = AnalysisParams::new(&self.config, &self.calibration()?);
        let stable_frames = self.config.stable_frames.max(1);
        let started = Instant::now();
        let deadline = started + Duration::from_millis(timeout_ms);

        let mut last: Option<SnapshotAnalysis> = None;
        let mut streak = 0u32;
        let mut analyzed = 0u32;

        loop {
            let Some(snapshot) = self.capture_listening()? else {
                debug!("[ChordDetection] Listening stopped during detection");
                break;
            };
            analyzed += 1;
            let analysis = analyze_snapshot(&snapshot, &target, &params);
            streak = if analysis.is_correct { streak + 1 } else { 0 };

            if streak >= stable_frames {
                let timing = DetectionTiming {
                    latency_ms: started.elapsed().as_millis() as u64,
                    snapshots_analyzed: analyzed,
                    timed_out: false,
                };
                let result = analysis.into_result(&target.name, timing);
                info!(
                    "[ChordDetection] {} detected (confidence {:.2}, {} snapshots)",
                    target.name, result.confidence, analyzed
                );
                return Ok(self.publish(result));
            }
            last = Some(analysis);

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval().min(deadline - now)).await;
        }

        let analysis = match last {
            Some(analysis) => analysis,
            None => analyze_snapshot(
                &FrequencySnapshot::silent(self.guard_sample_rate(), self.config.fft_size),
                &target,
                &params,
            ),
        };
        let timing = DetectionTiming {
            latency_ms: started.elapsed().as_millis() as u64,
            snapshots_analyzed: analyzed,
            timed_out: true,
        };
        let mut result = analysis.into_result(&target.name, timing);
        result.confidence = 0.0;
        result.is_correct = false;
        debug!(
            "[ChordDetection] {} not detected within {} ms ({} snapshots)",
            target.name, timeout_ms, analyzed
        );
        Ok(self.publish(result))
    }

    fn guard_sample_rate(&self) -> u32 {
        self.guard
            .session()
            .map(|s| s.sample_rate())
            .unwrap_or(48_000)
    }

    fn publish(&self, result: DetectionResult) -> DetectionResult {
        // No subscribers is fine
        let _ = self.results_tx.send(result.clone());
        result
    }

    /// Stop listening and release capture. The device session stays open.
    pub fn destroy(&self) {
        match self.lock_state() {
            Ok(mut state) => {
                state.release_analyser();
                info!("[ChordDetection] Destroyed, capture released");
            }
            Err(err) => log_detection_error(&err, "ChordDetectionEngine::destroy"),
        }
    }
}

impl Drop for ChordDetectionEngine {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.release_analyser();
        }
    }
}
