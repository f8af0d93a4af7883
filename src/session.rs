// SessionGuard - single owner of the platform device session
//
// The guard is the only component allowed to open or close the device
// graph. Everything else calls `session()` and gets a shared handle, or an
// error when no session is live. Sessions are only opened in response to a
// trusted user gesture.
//
// Lifecycle: uninitialized → initializing → ready ⇄ suspended → closed
//
// The state lives in a tokio watch channel. `initialize` claims the
// `initializing` state with a single check-and-set before touching the
// device, so concurrent callers can never open a second session; callers
// that lose the race wait on the channel for the winner's outcome.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::AudioConfig;
use crate::device::{AudioDevice, DeviceGraph};
use crate::error::{log_audio_error, AudioError};

/// Origin of a user interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureKind {
    Pointer,
    Touch,
    Key,
    /// Programmatic event (timers, scripted dispatch)
    Synthetic,
}

/// The interaction that triggered `initialize`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureEvent {
    pub kind: GestureKind,
    /// Set by the host when the event came from real user input
    pub is_trusted: bool,
}

impl GestureEvent {
    pub fn pointer() -> Self {
        Self {
            kind: GestureKind::Pointer,
            is_trusted: true,
        }
    }

    pub fn touch() -> Self {
        Self {
            kind: GestureKind::Touch,
            is_trusted: true,
        }
    }

    pub fn key() -> Self {
        Self {
            kind: GestureKind::Key,
            is_trusted: true,
        }
    }

    pub fn synthetic() -> Self {
        Self {
            kind: GestureKind::Synthetic,
            is_trusted: false,
        }
    }

    /// Whether the event may unlock audio output
    pub fn is_user_activation(&self) -> bool {
        self.is_trusted && self.kind != GestureKind::Synthetic
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Suspended,
    Closed,
}

impl SessionState {
    /// A session exists and its graph is usable
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Suspended)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Suspended => "suspended",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared handle to the live device graph
pub struct DeviceSession {
    id: u64,
    graph: Arc<dyn DeviceGraph>,
    created_at: Instant,
    created_at_ms: u64,
}

impl DeviceSession {
    fn new(id: u64, graph: Arc<dyn DeviceGraph>) -> Self {
        let created_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            id,
            graph,
            created_at: Instant::now(),
            created_at_ms,
        }
    }

    /// Monotonically increasing per guard, starting at 1
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn graph(&self) -> &Arc<dyn DeviceGraph> {
        &self.graph
    }

    pub fn sample_rate(&self) -> u32 {
        self.graph.sample_rate()
    }

    /// Audio-clock time in seconds
    pub fn current_time(&self) -> f64 {
        self.graph.current_time()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Unix creation time in milliseconds
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("sample_rate", &self.sample_rate())
            .field("created_at_ms", &self.created_at_ms)
            .finish()
    }
}

/// Owner of the at-most-one live [`DeviceSession`]
pub struct SessionGuard {
    device: Arc<dyn AudioDevice>,
    config: AudioConfig,
    state_tx: watch::Sender<SessionState>,
    session: RwLock<Option<Arc<DeviceSession>>>,
    sessions_created: AtomicU64,
    /// Set by `dispose` while an open is in flight; the opener closes its
    /// own graph instead of publishing it
    dispose_requested: AtomicBool,
}

impl SessionGuard {
    pub fn new(device: Arc<dyn AudioDevice>, config: AudioConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Uninitialized);
        Self {
            device,
            config,
            state_tx,
            session: RwLock::new(None),
            sessions_created: AtomicU64::new(0),
            dispose_requested: AtomicBool::new(false),
        }
    }

    /// Open the device session in response to a user gesture
    ///
    /// # Errors
    /// * `NoUserGesture` - the event is not a trusted user activation
    /// * `InitializationFailed` - another caller's in-flight open failed, or
    ///   `dispose` cancelled the open before it completed
    /// * device errors from the platform `open`
    pub async fn initialize(&self, gesture: &GestureEvent) -> Result<(), AudioError> {
        if !gesture.is_user_activation() {
            let err = AudioError::NoUserGesture;
            log_audio_error(&err, &format!("SessionGuard::initialize({:?})", gesture.kind));
            return Err(err);
        }

        let mut observed = SessionState::Uninitialized;
        let mut opened_before = 0;
        let claimed = self.state_tx.send_if_modified(|state| {
            observed = *state;
            opened_before = self.sessions_created.load(Ordering::SeqCst);
            if matches!(*state, SessionState::Uninitialized | SessionState::Closed) {
                *state = SessionState::Initializing;
                self.dispose_requested.store(false, Ordering::SeqCst);
                true
            } else {
                false
            }
        });

        if claimed {
            return self.open_session();
        }

        match observed {
            SessionState::Ready | SessionState::Suspended => {
                info!(
                    "[SessionGuard] initialize() while {}: reusing existing session",
                    observed
                );
                Ok(())
            }
            _ => self.await_in_flight(opened_before).await,
        }
    }

    /// Wait for another caller's in-flight initialization to settle
    ///
    /// Succeeds when that open published a session, even if the session was
    /// disposed again before this waiter woke up.
    async fn await_in_flight(&self, opened_before: u64) -> Result<(), AudioError> {
        debug!("[SessionGuard] Initialization in flight, waiting for outcome");
        let mut rx = self.state_tx.subscribe();
        let outcome = rx
            .wait_for(|state| *state != SessionState::Initializing)
            .await
            .map(|state| *state)
            .map_err(|_| AudioError::InitializationFailed)?;

        if outcome.is_live() || self.sessions_created.load(Ordering::SeqCst) > opened_before {
            Ok(())
        } else {
            let err = AudioError::InitializationFailed;
            log_audio_error(&err, "SessionGuard::initialize (awaiting in-flight)");
            Err(err)
        }
    }

    /// Called only by the caller that claimed `initializing`
    fn open_session(&self) -> Result<(), AudioError> {
        info!("[SessionGuard] Opening device session");
        let graph = match self.device.open(&self.config) {
            Ok(graph) => graph,
            Err(err) => {
                log_audio_error(&err, "SessionGuard::initialize");
                self.state_tx.send_modify(|state| {
                    *state = if self.dispose_requested.swap(false, Ordering::SeqCst) {
                        SessionState::Closed
                    } else {
                        SessionState::Uninitialized
                    };
                });
                return Err(err);
            }
        };

        // Publish under the state lock so a concurrent dispose either
        // cancels this open or sees the finished session
        let mut published: Result<Arc<DeviceSession>, AudioError> =
            Err(AudioError::InitializationFailed);
        self.state_tx.send_modify(|state| {
            if self.dispose_requested.swap(false, Ordering::SeqCst) {
                *state = SessionState::Closed;
                return;
            }
            match self.session.write() {
                Ok(mut slot) if slot.is_none() => {
                    let id = self.sessions_created.fetch_add(1, Ordering::SeqCst) + 1;
                    let session = Arc::new(DeviceSession::new(id, Arc::clone(&graph)));
                    *slot = Some(Arc::clone(&session));
                    *state = SessionState::Ready;
                    published = Ok(session);
                }
                Ok(_) => {
                    *state = SessionState::Ready;
                    published = Err(AudioError::InvalidState {
                        operation: "initialize".to_string(),
                        state: "session already live".to_string(),
                    });
                }
                Err(_) => {
                    *state = SessionState::Uninitialized;
                    published = Err(AudioError::LockPoisoned {
                        component: "session_slot".to_string(),
                    });
                }
            }
        });

        match published {
            Ok(session) => {
                info!(
                    "[SessionGuard] Session {} ready ({} Hz)",
                    session.id(),
                    session.sample_rate()
                );
                Ok(())
            }
            Err(err) => {
                graph.close();
                if err == AudioError::InitializationFailed {
                    info!("[SessionGuard] Disposed during initialization, closing new graph");
                }
                log_audio_error(&err, "SessionGuard::initialize");
                Err(err)
            }
        }
    }

    /// Current session, never creates one
    pub fn session(&self) -> Result<Arc<DeviceSession>, AudioError> {
        let slot = self.session.read().map_err(|_| AudioError::LockPoisoned {
            component: "session_slot".to_string(),
        })?;
        slot.clone().ok_or(AudioError::NotInitialized)
    }

    /// Close the device graph and clear the session
    ///
    /// Safe to call repeatedly; a later `initialize` opens a fresh session.
    /// While an open is in flight the state stays `initializing`: the opener
    /// closes its graph when the open completes and the guard ends `closed`.
    pub fn dispose(&self) -> Result<(), AudioError> {
        let mut taken = None;
        let mut deferred = false;
        let mut poisoned = false;
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Initializing {
                self.dispose_requested.store(true, Ordering::SeqCst);
                deferred = true;
                return false;
            }
            match self.session.write() {
                Ok(mut slot) => taken = slot.take(),
                Err(_) => {
                    poisoned = true;
                    return false;
                }
            }
            let changed = *state != SessionState::Closed;
            *state = SessionState::Closed;
            changed
        });

        if poisoned {
            return Err(AudioError::LockPoisoned {
                component: "session_slot".to_string(),
            });
        }
        if deferred {
            info!("[SessionGuard] dispose() during initialization, open will be cancelled");
            return Ok(());
        }
        if let Some(session) = taken {
            session.graph().close();
            info!("[SessionGuard] Session {} disposed", session.id());
        } else {
            debug!("[SessionGuard] dispose() with no live session");
        }
        Ok(())
    }

    /// Pause the device graph (ready → suspended)
    pub fn suspend(&self) -> Result<(), AudioError> {
        let session = self.session()?;
        match self.state() {
            SessionState::Suspended => return Ok(()),
            SessionState::Ready => {}
            other => {
                return Err(AudioError::InvalidState {
                    operation: "suspend".to_string(),
                    state: other.to_string(),
                })
            }
        }
        session.graph().suspend()?;
        self.state_tx.send_if_modified(|state| {
            let ready = *state == SessionState::Ready;
            if ready {
                *state = SessionState::Suspended;
            }
            ready
        });
        info!("[SessionGuard] Session {} suspended", session.id());
        Ok(())
    }

    /// Restart the device graph (suspended → ready)
    pub fn resume(&self) -> Result<(), AudioError> {
        let session = self.session()?;
        match self.state() {
            SessionState::Ready => return Ok(()),
            SessionState::Suspended => {}
            other => {
                return Err(AudioError::InvalidState {
                    operation: "resume".to_string(),
                    state: other.to_string(),
                })
            }
        }
        if let Err(err) = session.graph().resume() {
            warn!("[SessionGuard] Resume failed: {}", err);
            return Err(err);
        }
        self.state_tx.send_if_modified(|state| {
            let suspended = *state == SessionState::Suspended;
            if suspended {
                *state = SessionState::Ready;
            }
            suspended
        });
        info!("[SessionGuard] Session {} resumed", session.id());
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Receiver notified on every lifecycle transition
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Device sessions opened over the guard's lifetime
    pub fn sessions_created(&self) -> u64 {
        self.sessions_created.load(Ordering::SeqCst)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.session.write() {
            if let Some(session) = slot.take() {
                session.graph().close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{StubControls, StubDevice};

    fn guard() -> (SessionGuard, Arc<StubControls>) {
        let device = StubDevice::new();
        let controls = device.controls();
        (
            SessionGuard::new(Arc::new(device), AudioConfig::default()),
            controls,
        )
    }

    #[test]
    fn test_gesture_activation_rules() {
        assert!(GestureEvent::pointer().is_user_activation());
        assert!(GestureEvent::touch().is_user_activation());
        assert!(GestureEvent::key().is_user_activation());
        assert!(!GestureEvent::synthetic().is_user_activation());
        let forged = GestureEvent {
            kind: GestureKind::Pointer,
            is_trusted: false,
        };
        assert!(!forged.is_user_activation());
    }

    #[tokio::test]
    async fn test_rejects_synthetic_gesture() {
        let (guard, controls) = guard();
        let result = guard.initialize(&GestureEvent::synthetic()).await;
        assert_eq!(result, Err(AudioError::NoUserGesture));
        assert_eq!(guard.state(), SessionState::Uninitialized);
        assert_eq!(controls.open_count(), 0);
    }

    #[tokio::test]
    async fn test_session_before_initialize() {
        let (guard, _) = guard();
        assert!(matches!(guard.session(), Err(AudioError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (guard, controls) = guard();
        guard.initialize(&GestureEvent::pointer()).await.unwrap();
        let first = guard.session().unwrap();
        guard.initialize(&GestureEvent::touch()).await.unwrap();
        let second = guard.session().unwrap();

        assert_eq!(controls.open_count(), 1);
        assert_eq!(guard.sessions_created(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(guard.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_dispose_allows_fresh_session() {
        let (guard, controls) = guard();
        guard.initialize(&GestureEvent::pointer()).await.unwrap();
        guard.dispose().unwrap();
        assert_eq!(guard.state(), SessionState::Closed);
        assert_eq!(controls.close_count(), 1);
        assert!(guard.session().is_err());

        guard.initialize(&GestureEvent::pointer()).await.unwrap();
        assert_eq!(guard.session().unwrap().id(), 2);
        assert_eq!(controls.open_count(), 2);

        guard.dispose().unwrap();
        guard.dispose().unwrap();
        assert_eq!(controls.close_count(), 2);
    }

    #[tokio::test]
    async fn test_device_failure_resets_state() {
        let (guard, controls) = guard();
        controls.set_fail_open(true);
        let result = guard.initialize(&GestureEvent::pointer()).await;
        assert!(matches!(result, Err(AudioError::HardwareError { .. })));
        assert_eq!(guard.state(), SessionState::Uninitialized);

        controls.set_fail_open(false);
        guard.initialize(&GestureEvent::pointer()).await.unwrap();
        assert_eq!(guard.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_suspend_and_resume() {
        let (guard, controls) = guard();
        assert!(guard.suspend().is_err());

        guard.initialize(&GestureEvent::key()).await.unwrap();
        guard.suspend().unwrap();
        assert_eq!(guard.state(), SessionState::Suspended);
        assert!(controls.is_suspended());

        // initialize while suspended keeps the same session
        guard.initialize(&GestureEvent::key()).await.unwrap();
        assert_eq!(controls.open_count(), 1);

        guard.resume().unwrap();
        assert_eq!(guard.state(), SessionState::Ready);
        assert!(!controls.is_suspended());
    }

    #[tokio::test]
    async fn test_waiter_reports_success_after_session_closed() {
        let (guard, _) = guard();
        guard.state_tx.send_replace(SessionState::Initializing);

        let gesture = GestureEvent::touch();
        let waiter = guard.initialize(&gesture);
        let opener = async {
            tokio::task::yield_now().await;
            guard.open_session().unwrap();
            guard.dispose().unwrap();
        };
        let (result, ()) = tokio::join!(waiter, opener);

        assert_eq!(result, Ok(()));
        assert_eq!(guard.state(), SessionState::Closed);
        assert_eq!(guard.sessions_created(), 1);
    }

    #[tokio::test]
    async fn test_open_never_replaces_live_session() {
        let (guard, controls) = guard();
        guard.initialize(&GestureEvent::pointer()).await.unwrap();
        let live = guard.session().unwrap();

        guard.state_tx.send_replace(SessionState::Initializing);
        let result = guard.open_session();

        assert!(matches!(result, Err(AudioError::InvalidState { .. })));
        assert_eq!(controls.open_count(), 2);
        assert_eq!(controls.close_count(), 1);
        assert!(Arc::ptr_eq(&live, &guard.session().unwrap()));
        assert_eq!(guard.state(), SessionState::Ready);
        assert_eq!(guard.sessions_created(), 1);
    }

    #[tokio::test]
    async fn test_state_subscription() {
        let (guard, _) = guard();
        let mut rx = guard.subscribe_state();
        guard.initialize(&GestureEvent::pointer()).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SessionState::Ready);
    }
}
