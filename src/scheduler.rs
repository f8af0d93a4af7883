// Scheduler - audio-clock synchronized callbacks
//
// Events are keyed by id and fire against the device session's monotonic
// audio clock, never against wall-clock timers. Each poll tick reads the
// audio clock once, samples the visual clock, then fires due events in
// insertion order.
//
// Repeating events run on a fixed grid `start + k * interval`: a late tick
// fires once and lands on the latest grid slot it passed, so skipped ticks
// never shift later triggers.
//
// Every event remembers the session whose clock it was scheduled against.
// When that session is replaced, the event is rebased onto the new clock
// with its remaining delay kept; repeating events restart their grid.
//
// Callbacks run with no lock held. They may schedule or cancel events;
// cancelling an event that was already dispatched for the current tick
// takes effect from the next tick.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{PollMode, SchedulerConfig};
use crate::device::TimeSource;
use crate::error::AudioError;
use crate::session::SessionGuard;

/// Tolerance for audio-clock comparisons (seconds)
const CLOCK_EPSILON: f64 = 1e-9;

/// Timing information handed to every callback
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockTick {
    /// Audio-clock time read at the start of the tick (seconds)
    pub audio_time: f64,
    /// Audio-clock slot this firing belongs to (seconds)
    pub scheduled_time: f64,
    /// High-resolution visual clock sampled in the same tick (milliseconds)
    pub visual_time_ms: f64,
}

impl ClockTick {
    /// How late this firing is relative to its slot (seconds)
    pub fn lateness(&self) -> f64 {
        (self.audio_time - self.scheduled_time).max(0.0)
    }
}

pub type EventCallback = Box<dyn FnMut(ClockTick) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Timing {
    Once {
        start: f64,
        window: Option<f64>,
    },
    Repeating {
        start: f64,
        interval: f64,
        last_slot: Option<f64>,
    },
}

enum Decision {
    Wait,
    Fire(f64),
    Expired,
}

impl Timing {
    fn decide(&mut self, clock: f64) -> Decision {
        match self {
            Timing::Once { start, window } => {
                if clock + CLOCK_EPSILON < *start {
                    return Decision::Wait;
                }
                match window {
                    Some(w) if clock >= *start + *w => Decision::Expired,
                    _ => Decision::Fire(*start),
                }
            }
            Timing::Repeating {
                start,
                interval,
                last_slot,
            } => {
                let next = match last_slot {
                    Some(slot) => *slot + *interval,
                    None => *start,
                };
                if clock + CLOCK_EPSILON < next {
                    return Decision::Wait;
                }
                let k = ((clock - *start) / *interval + CLOCK_EPSILON).floor().max(0.0);
                let slot = *start + k * *interval;
                *last_slot = Some(slot);
                Decision::Fire(slot)
            }
        }
    }

    /// Move onto a fresh clock that reads `clock`, keeping the delay left
    /// relative to `origin` on the old clock.
    fn rebase(&mut self, origin: f64, clock: f64) {
        match self {
            Timing::Once { start, .. } => *start = clock + (*start - origin).max(0.0),
            Timing::Repeating {
                start, last_slot, ..
            } => {
                let delay = if last_slot.is_some() {
                    0.0
                } else {
                    (*start - origin).max(0.0)
                };
                *start = clock + delay;
                *last_slot = None;
            }
        }
    }

    fn is_one_shot(&self) -> bool {
        matches!(self, Timing::Once { .. })
    }
}

struct ScheduledEvent {
    id: String,
    generation: u64,
    /// Session whose audio clock `timing` refers to
    session_id: u64,
    /// Audio-clock time at which the event was scheduled
    origin: f64,
    timing: Timing,
    /// Taken out while the callback runs
    callback: Option<EventCallback>,
}

struct Dispatch {
    id: String,
    generation: u64,
    scheduled_time: f64,
    one_shot: bool,
    callback: EventCallback,
}

#[derive(Default)]
struct SchedulerInner {
    events: Vec<ScheduledEvent>,
    next_generation: u64,
    running: bool,
    poll_task: Option<JoinHandle<()>>,
}

impl SchedulerInner {
    fn stop(&mut self) {
        self.running = false;
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

struct SchedulerShared {
    guard: Arc<SessionGuard>,
    config: SchedulerConfig,
    time_source: Arc<dyn TimeSource>,
    epoch: Instant,
    inner: Mutex<SchedulerInner>,
}

impl SchedulerShared {
    fn lock(&self) -> Result<MutexGuard<'_, SchedulerInner>, AudioError> {
        self.inner.lock().map_err(|_| AudioError::LockPoisoned {
            component: "scheduler".to_string(),
        })
    }

    fn is_running(&self) -> bool {
        self.lock().map(|inner| inner.running).unwrap_or(false)
    }

    fn tick(&self) -> usize {
        let session = match self.guard.session() {
            Ok(session) => session,
            Err(_) => {
                debug!("[Scheduler] tick() without a session, skipping");
                return 0;
            }
        };
        let audio_time = session.current_time();
        let visual_time_ms =
            self.time_source.now().saturating_duration_since(self.epoch).as_secs_f64() * 1000.0;

        let due = match self.collect_due(session.id(), audio_time) {
            Ok(due) => due,
            Err(err) => {
                error!("[Scheduler] {}", err);
                return 0;
            }
        };

        let fired = due.len();
        for mut dispatch in due {
            (dispatch.callback)(ClockTick {
                audio_time,
                scheduled_time: dispatch.scheduled_time,
                visual_time_ms,
            });
            self.restore(dispatch);
        }

        if let Ok(mut inner) = self.lock() {
            if inner.events.is_empty() && inner.running {
                inner.stop();
                debug!("[Scheduler] No events left, going idle");
            }
        }
        fired
    }

    fn collect_due(&self, session_id: u64, clock: f64) -> Result<Vec<Dispatch>, AudioError> {
        let mut inner = self.lock()?;
        let mut due = Vec::new();

        inner.events.retain_mut(|event| {
            if event.session_id != session_id {
                warn!(
                    "[Scheduler] Event '{}' belonged to session {}, rebasing onto session {} at {:.3}s",
                    event.id, event.session_id, session_id, clock
                );
                event.timing.rebase(event.origin, clock);
                event.session_id = session_id;
                event.origin = clock;
            }
            if event.callback.is_none() {
                return true;
            }
            match event.timing.decide(clock) {
                Decision::Wait => true,
                Decision::Expired => {
                    warn!(
                        "[Scheduler] Event '{}' missed its window at {:.3}s, dropping",
                        event.id, clock
                    );
                    false
                }
                Decision::Fire(slot) => {
                    if let Some(callback) = event.callback.take() {
                        due.push(Dispatch {
                            id: event.id.clone(),
                            generation: event.generation,
                            scheduled_time: slot,
                            one_shot: event.timing.is_one_shot(),
                            callback,
                        });
                    }
                    true
                }
            }
        });
        Ok(due)
    }

    /// Put a callback back after it ran, unless its event was cancelled or
    /// replaced meanwhile. One-shots are removed here, after the callback.
    fn restore(&self, dispatch: Dispatch) {
        let Ok(mut inner) = self.lock() else {
            return;
        };
        let Some(pos) = inner
            .events
            .iter()
            .position(|e| e.generation == dispatch.generation)
        else {
            debug!(
                "[Scheduler] Event '{}' cancelled during its callback",
                dispatch.id
            );
            return;
        };
        if dispatch.one_shot {
            inner.events.remove(pos);
        } else {
            inner.events[pos].callback = Some(dispatch.callback);
        }
    }
}

/// Audio-clock driven event scheduler
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
}

impl Scheduler {
    pub fn new(
        guard: Arc<SessionGuard>,
        config: SchedulerConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let epoch = time_source.now();
        Self {
            shared: Arc::new(SchedulerShared {
                guard,
                config,
                time_source,
                epoch,
                inner: Mutex::new(SchedulerInner::default()),
            }),
        }
    }

    /// Fire `callback` once, `delay_secs` from now on the audio clock
    ///
    /// Returns `false` (and logs) when no session exists. Reusing an id
    /// replaces the earlier event.
    pub fn schedule_once<F>(&self, id: impl Into<String>, callback: F, delay_secs: f64) -> bool
    where
        F: FnMut(ClockTick) + Send + 'static,
    {
        self.schedule_once_within(id, callback, delay_secs, None)
    }

    /// One-shot that only fires inside `[start, start + window)`.
    ///
    /// With `window = None` the event fires on the first tick at or after
    /// its start time.
    pub fn schedule_once_within<F>(
        &self,
        id: impl Into<String>,
        callback: F,
        delay_secs: f64,
        window_secs: Option<f64>,
    ) -> bool
    where
        F: FnMut(ClockTick) + Send + 'static,
    {
        let id = id.into();
        let Some((session_id, now)) = self.now(&id) else {
            return false;
        };
        let window = window_secs.filter(|w| *w > 0.0);
        self.insert(
            id,
            session_id,
            now,
            Timing::Once {
                start: now + delay_secs.max(0.0),
                window,
            },
            Box::new(callback),
        )
    }

    /// Fire `callback` every `interval_secs`, first at `now + start_delay_secs`
    pub fn schedule_repeating<F>(
        &self,
        id: impl Into<String>,
        callback: F,
        interval_secs: f64,
        start_delay_secs: f64,
    ) -> bool
    where
        F: FnMut(ClockTick) + Send + 'static,
    {
        let id = id.into();
        if !(interval_secs.is_finite() && interval_secs > 0.0) {
            warn!(
                "[Scheduler] Rejecting '{}': interval must be positive, got {}",
                id, interval_secs
            );
            return false;
        }
        let Some((session_id, now)) = self.now(&id) else {
            return false;
        };
        self.insert(
            id,
            session_id,
            now,
            Timing::Repeating {
                start: now + start_delay_secs.max(0.0),
                interval: interval_secs,
                last_slot: None,
            },
            Box::new(callback),
        )
    }

    /// Current session id and its audio-clock reading
    fn now(&self, id: &str) -> Option<(u64, f64)> {
        match self.shared.guard.session() {
            Ok(session) => Some((session.id(), session.current_time())),
            Err(err) => {
                warn!("[Scheduler] Cannot schedule '{}': {}", id, err);
                None
            }
        }
    }

    fn insert(
        &self,
        id: String,
        session_id: u64,
        origin: f64,
        timing: Timing,
        callback: EventCallback,
    ) -> bool {
        let mut inner = match self.shared.lock() {
            Ok(inner) => inner,
            Err(err) => {
                error!("[Scheduler] {}", err);
                return false;
            }
        };

        if let Some(pos) = inner.events.iter().position(|e| e.id == id) {
            debug!("[Scheduler] Replacing event '{}'", id);
            inner.events.remove(pos);
        }
        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.events.push(ScheduledEvent {
            id,
            generation,
            session_id,
            origin,
            timing,
            callback: Some(callback),
        });

        if !inner.running {
            inner.running = true;
            if self.shared.config.poll_mode == PollMode::Timer {
                inner.poll_task = self.spawn_poll_loop();
            }
            debug!("[Scheduler] Running");
        }
        true
    }

    fn spawn_poll_loop(&self) -> Option<JoinHandle<()>> {
        let Ok(handle) = Handle::try_current() else {
            warn!("[Scheduler] No tokio runtime; tick() must be driven by the host");
            return None;
        };
        let weak: Weak<SchedulerShared> = Arc::downgrade(&self.shared);
        let period = Duration::from_millis(self.shared.config.frame_interval_ms.max(1));

        Some(handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.tick();
                if !shared.is_running() {
                    break;
                }
            }
        }))
    }

    /// Remove one event. Returns whether it existed.
    pub fn cancel(&self, id: &str) -> bool {
        let Ok(mut inner) = self.shared.lock() else {
            return false;
        };
        let before = inner.events.len();
        inner.events.retain(|e| e.id != id);
        let removed = inner.events.len() != before;
        if inner.events.is_empty() && inner.running {
            inner.stop();
        }
        removed
    }

    /// Remove every event and stop the poll loop
    pub fn cancel_all(&self) {
        if let Ok(mut inner) = self.shared.lock() {
            let count = inner.events.len();
            inner.events.clear();
            inner.stop();
            if count > 0 {
                info!("[Scheduler] Cancelled {} events", count);
            }
        }
    }

    /// Run one poll cycle; returns the number of callbacks fired
    pub fn tick(&self) -> usize {
        self.shared.tick()
    }

    pub fn state(&self) -> SchedulerState {
        if self.shared.is_running() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.shared
            .lock()
            .map(|inner| inner.events.iter().any(|e| e.id == id))
            .unwrap_or(false)
    }

    /// Pending event ids in insertion order
    pub fn pending(&self) -> Vec<String> {
        self.shared
            .lock()
            .map(|inner| inner.events.iter().map(|e| e.id.clone()).collect())
            .unwrap_or_default()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.shared.lock() {
            inner.stop();
        }
    }
}
