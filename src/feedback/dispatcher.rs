// FeedbackDispatcher - plays cue tone sequences on the session graph
//
// Cues are advisory: every refusal (muted, no session, priority, rate limit)
// returns false with a debug log and never surfaces an error.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use super::{PriorityArbiter, RateLimiter, SoundCategory};
use crate::config::FeedbackConfig;
use crate::device::{TimeSource, Tone};
use crate::session::{SessionGuard, SessionState};

pub struct FeedbackDispatcher {
    guard: Arc<SessionGuard>,
    arbiter: Arc<PriorityArbiter>,
    limiter: RateLimiter,
    config: FeedbackConfig,
    time_source: Arc<dyn TimeSource>,
    muted: AtomicBool,
    /// f32 bits of the user volume preference in [0, 1]
    master_volume: AtomicU32,
}

impl FeedbackDispatcher {
    pub fn new(
        guard: Arc<SessionGuard>,
        arbiter: Arc<PriorityArbiter>,
        config: FeedbackConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            guard,
            arbiter,
            limiter: RateLimiter::from_config(&config),
            config,
            time_source,
            muted: AtomicBool::new(false),
            master_volume: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// Play the cue for `category` at `volume` (linear, clamped)
    ///
    /// Returns whether the cue was handed to the device graph.
    pub fn play_sound(&self, category: SoundCategory, volume: f32) -> bool {
        if self.is_muted() {
            debug!("[Feedback] Muted, dropping {:?}", category);
            return false;
        }

        let session = match self.guard.session() {
            Ok(session) => session,
            Err(_) => {
                debug!("[Feedback] No session, dropping {:?}", category);
                return false;
            }
        };
        if self.guard.state() == SessionState::Suspended {
            debug!("[Feedback] Session suspended, dropping {:?}", category);
            return false;
        }

        if !self.arbiter.can_play_sound(category) {
            debug!("[Feedback] {:?} refused by priority arbiter", category);
            return false;
        }

        let now = self.time_source.now();
        if !self.limiter.try_acquire(category, now) {
            debug!("[Feedback] {:?} rate limited", category);
            return false;
        }

        let gain = self.effective_gain(volume);
        let start = session.current_time();
        let max_secs = self.config.max_tone_ms as f32 / 1000.0;

        for step in category.tones() {
            let tone = Tone {
                frequency_hz: step.frequency_hz,
                start_time: start + step.offset_ms as f64 / 1000.0,
                duration_secs: (step.duration_ms as f32 / 1000.0).min(max_secs),
                gain,
                waveform: step.waveform,
            };
            if let Err(err) = session.graph().play_tone(tone) {
                warn!("[Feedback] Failed to play {:?}: {}", category, err);
                self.limiter.release(category, now);
                return false;
            }
        }
        debug!("[Feedback] Played {:?} at gain {:.3}", category, gain);
        true
    }

    fn effective_gain(&self, volume: f32) -> f32 {
        let volume = if volume.is_finite() { volume } else { 0.0 };
        (volume.clamp(0.0, 1.0) * self.master_volume()).clamp(0.0, self.config.max_gain)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// User volume preference, clamped to [0, 1]
    pub fn set_master_volume(&self, volume: f32) {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.master_volume.store(volume.to_bits(), Ordering::SeqCst);
    }

    pub fn master_volume(&self) -> f32 {
        f32::from_bits(self.master_volume.load(Ordering::SeqCst))
    }

    pub fn arbiter(&self) -> &Arc<PriorityArbiter> {
        &self.arbiter
    }

    pub fn reset_rate_limits(&self) {
        self.limiter.reset();
    }
}
