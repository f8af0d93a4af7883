//! Integration tests for the device session guard
//!
//! Covers the at-most-one-session contract for sequential, rapid and
//! concurrent `initialize` calls, including the failure path where callers
//! waiting on an in-flight open observe its error.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fretcoach::config::AudioConfig;
use fretcoach::device::{AudioDevice, DeviceGraph, StubControls, StubDevice};
use fretcoach::error::AudioError;
use fretcoach::{GestureEvent, SessionGuard, SessionState};

/// Device whose `open` blocks until the test decides the outcome
struct GatedDevice {
    inner: StubDevice,
    gate: Mutex<Receiver<bool>>,
    opens: AtomicUsize,
}

impl GatedDevice {
    fn new() -> (Self, Sender<bool>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                inner: StubDevice::new(),
                gate: Mutex::new(rx),
                opens: AtomicUsize::new(0),
            },
            tx,
        )
    }
}

impl AudioDevice for GatedDevice {
    fn open(&self, config: &AudioConfig) -> Result<Arc<dyn DeviceGraph>, AudioError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let allow = self.gate.lock().unwrap().recv().unwrap_or(false);
        if allow {
            self.inner.open(config)
        } else {
            Err(AudioError::HardwareError {
                details: "gated open refused".to_string(),
            })
        }
    }
}

fn stub_guard() -> (Arc<SessionGuard>, Arc<StubControls>) {
    let device = StubDevice::new();
    let controls = device.controls();
    (
        Arc::new(SessionGuard::new(Arc::new(device), AudioConfig::default())),
        controls,
    )
}

async fn wait_for_state(guard: &SessionGuard, wanted: SessionState) {
    for _ in 0..200 {
        if guard.state() == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("guard never reached {}", wanted);
}

#[tokio::test]
async fn test_sequential_initialize_opens_one_session() {
    let (guard, controls) = stub_guard();

    guard.initialize(&GestureEvent::pointer()).await.unwrap();
    let first = guard.session().unwrap();
    guard.initialize(&GestureEvent::touch()).await.unwrap();
    let second = guard.session().unwrap();

    assert_eq!(controls.open_count(), 1);
    assert_eq!(guard.sessions_created(), 1);
    assert_eq!(first.id(), second.id());
    assert_eq!(guard.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_rapid_initialize_calls_share_session() {
    let (guard, controls) = stub_guard();
    let gesture = GestureEvent::key();

    let results = spawn_initializers(&guard, &gesture, 8).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(controls.open_count(), 1);
}

async fn spawn_initializers(
    guard: &Arc<SessionGuard>,
    gesture: &GestureEvent,
    count: usize,
) -> Vec<Result<(), AudioError>> {
    let mut handles = Vec::with_capacity(count);
    for _ in 0..count {
        let guard = Arc::clone(guard);
        let gesture = *gesture;
        handles.push(tokio::spawn(async move { guard.initialize(&gesture).await }));
    }
    let mut results = Vec::with_capacity(count);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test]
async fn test_untrusted_gesture_is_rejected() {
    let (guard, controls) = stub_guard();

    let err = guard
        .initialize(&GestureEvent::synthetic())
        .await
        .unwrap_err();
    assert_eq!(err, AudioError::NoUserGesture);
    assert_eq!(controls.open_count(), 0);
    assert_eq!(guard.state(), SessionState::Uninitialized);
    assert_eq!(guard.session().unwrap_err(), AudioError::NotInitialized);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_waiter_shares_in_flight_success() {
    let (device, gate) = GatedDevice::new();
    let device = Arc::new(device);
    let guard = Arc::new(SessionGuard::new(device.clone(), AudioConfig::default()));

    let first = {
        let guard = Arc::clone(&guard);
        tokio::spawn(async move { guard.initialize(&GestureEvent::pointer()).await })
    };
    wait_for_state(&guard, SessionState::Initializing).await;

    let second = {
        let guard = Arc::clone(&guard);
        tokio::spawn(async move { guard.initialize(&GestureEvent::pointer()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    gate.send(true).unwrap();
    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(second.await.unwrap(), Ok(()));
    assert_eq!(device.opens.load(Ordering::SeqCst), 1);
    assert_eq!(guard.state(), SessionState::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_waiter_sees_in_flight_failure() {
    let (device, gate) = GatedDevice::new();
    let device = Arc::new(device);
    let guard = Arc::new(SessionGuard::new(device.clone(), AudioConfig::default()));

    let first = {
        let guard = Arc::clone(&guard);
        tokio::spawn(async move { guard.initialize(&GestureEvent::pointer()).await })
    };
    wait_for_state(&guard, SessionState::Initializing).await;

    let second = {
        let guard = Arc::clone(&guard);
        tokio::spawn(async move { guard.initialize(&GestureEvent::pointer()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    gate.send(false).unwrap();
    assert!(matches!(
        first.await.unwrap(),
        Err(AudioError::HardwareError { .. })
    ));
    assert_eq!(
        second.await.unwrap(),
        Err(AudioError::InitializationFailed)
    );
    assert_eq!(device.opens.load(Ordering::SeqCst), 1);
    assert_eq!(guard.state(), SessionState::Uninitialized);

    // A later gesture may try again
    gate.send(true).unwrap();
    guard.initialize(&GestureEvent::pointer()).await.unwrap();
    assert_eq!(guard.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_dispose_then_reinitialize() {
    let (guard, controls) = stub_guard();

    guard.initialize(&GestureEvent::pointer()).await.unwrap();
    let first_id = guard.session().unwrap().id();
    guard.dispose().unwrap();
    guard.dispose().unwrap();
    assert_eq!(guard.state(), SessionState::Closed);
    assert_eq!(controls.close_count(), 1);

    guard.initialize(&GestureEvent::pointer()).await.unwrap();
    assert_ne!(guard.session().unwrap().id(), first_id);
    assert_eq!(controls.open_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispose_during_open_cancels_it() {
    let (device, gate) = GatedDevice::new();
    let device = Arc::new(device);
    let controls = device.inner.controls();
    let guard = Arc::new(SessionGuard::new(device.clone(), AudioConfig::default()));

    let first = {
        let guard = Arc::clone(&guard);
        tokio::spawn(async move { guard.initialize(&GestureEvent::pointer()).await })
    };
    wait_for_state(&guard, SessionState::Initializing).await;

    // The open is still running, so the state must not be released
    guard.dispose().unwrap();
    assert_eq!(guard.state(), SessionState::Initializing);

    let third = {
        let guard = Arc::clone(&guard);
        tokio::spawn(async move { guard.initialize(&GestureEvent::touch()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(device.opens.load(Ordering::SeqCst), 1);

    gate.send(true).unwrap();
    assert_eq!(first.await.unwrap(), Err(AudioError::InitializationFailed));
    assert_eq!(third.await.unwrap(), Err(AudioError::InitializationFailed));

    assert_eq!(device.opens.load(Ordering::SeqCst), 1);
    assert_eq!(controls.open_count(), 1);
    assert_eq!(controls.close_count(), 1);
    assert_eq!(guard.sessions_created(), 0);
    assert_eq!(guard.state(), SessionState::Closed);
    assert_eq!(guard.session().unwrap_err(), AudioError::NotInitialized);

    gate.send(true).unwrap();
    guard.initialize(&GestureEvent::pointer()).await.unwrap();
    assert_eq!(guard.sessions_created(), 1);
    assert_eq!(guard.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_state_changes_are_observable() {
    let (guard, _controls) = stub_guard();
    let mut rx = guard.subscribe_state();

    guard.initialize(&GestureEvent::pointer()).await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), SessionState::Ready);

    guard.suspend().unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), SessionState::Suspended);

    guard.resume().unwrap();
    assert_eq!(guard.state(), SessionState::Ready);
}
