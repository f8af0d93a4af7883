//! Integration tests for audio-clock scheduling and feedback cues
//!
//! The stub device clock is moved by hand between manual scheduler ticks;
//! the feedback limiter runs on a manual time source.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fretcoach::calibration::MemoryProfileStore;
use fretcoach::device::{ManualTimeSource, StubControls, StubDevice};
use fretcoach::{
    AppConfig, AudioCore, AudioMode, ChordCatalog, ClockTick, GestureEvent, SchedulerState,
    SoundCategory,
};

struct Harness {
    core: AudioCore,
    controls: Arc<StubControls>,
    clock: Arc<ManualTimeSource>,
}

async fn ready_harness() -> Harness {
    let device = StubDevice::new();
    let controls = device.controls();
    let clock = Arc::new(ManualTimeSource::new());
    let core = AudioCore::with_parts(
        Arc::new(device),
        Arc::new(MemoryProfileStore::new()),
        clock.clone(),
        ChordCatalog::standard(),
        AppConfig::for_tests(),
    );
    core.initialize(&GestureEvent::pointer()).await.unwrap();
    Harness {
        core,
        controls,
        clock,
    }
}

fn recorder() -> (Arc<Mutex<Vec<ClockTick>>>, impl FnMut(ClockTick) + Send + 'static) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |tick| sink.lock().unwrap().push(tick))
}

#[tokio::test]
async fn test_repeating_event_tracks_audio_clock() {
    let h = ready_harness().await;
    let scheduler = h.core.scheduler();
    let (log, cb) = recorder();

    assert!(scheduler.schedule_repeating("tick", cb, 1.0, 0.0));
    for _ in 0..4 {
        assert_eq!(scheduler.tick(), 1);
        h.controls.advance(1.0);
    }

    let times: Vec<f64> = log.lock().unwrap().iter().map(|t| t.audio_time).collect();
    assert_eq!(times, vec![0.0, 1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn test_late_polls_do_not_compound_delay() {
    let h = ready_harness().await;
    let scheduler = h.core.scheduler();
    let (log, cb) = recorder();

    scheduler.schedule_repeating("beat", cb, 1.0, 0.0);
    for clock in [0.0, 1.3, 2.05, 3.4, 4.0] {
        h.controls.set_time(clock);
        scheduler.tick();
    }

    let slots: Vec<f64> = log
        .lock()
        .unwrap()
        .iter()
        .map(|t| t.scheduled_time)
        .collect();
    assert_eq!(slots, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
}

#[tokio::test]
async fn test_shutdown_cancels_scheduled_events() {
    let h = ready_harness().await;
    let scheduler = h.core.scheduler();
    let (log, cb) = recorder();

    scheduler.schedule_repeating("beat", cb, 0.5, 0.0);
    assert_eq!(scheduler.state(), SchedulerState::Running);
    h.core.shutdown().unwrap();

    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert_eq!(scheduler.tick(), 0);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rate_limit_spaces_repeated_cues() {
    let h = ready_harness().await;
    let dispatcher = h.core.dispatcher();

    assert!(dispatcher.play_sound(SoundCategory::Click, 0.5));
    assert!(!dispatcher.play_sound(SoundCategory::Click, 0.5));
    assert!(dispatcher.play_sound(SoundCategory::Navigation, 0.5));

    h.clock.advance(Duration::from_millis(149));
    assert!(!dispatcher.play_sound(SoundCategory::Click, 0.5));
    h.clock.advance(Duration::from_millis(1));
    assert!(dispatcher.play_sound(SoundCategory::Click, 0.5));
}

#[tokio::test]
async fn test_rolling_window_caps_cues_per_category() {
    let h = ready_harness().await;
    let dispatcher = h.core.dispatcher();
    let cap = h.core.config().feedback.max_per_window;

    for _ in 0..cap {
        assert!(dispatcher.play_sound(SoundCategory::Success, 0.5));
        h.clock.advance(Duration::from_secs(1));
    }
    assert!(!dispatcher.play_sound(SoundCategory::Success, 0.5));

    // Oldest fire leaves the 60 s window
    h.clock.advance(Duration::from_secs(60 - cap as u64 + 1));
    assert!(dispatcher.play_sound(SoundCategory::Success, 0.5));
}

#[tokio::test]
async fn test_training_mode_silences_interface_cues() {
    let h = ready_harness().await;
    let dispatcher = h.core.dispatcher();

    h.core.arbiter().set_mode_active(AudioMode::EarTraining, true);
    assert!(!dispatcher.play_sound(SoundCategory::Click, 0.5));
    assert!(!dispatcher.play_sound(SoundCategory::Achievement, 0.5));
    assert!(dispatcher.play_sound(SoundCategory::Countdown, 0.5));

    h.core.arbiter().set_mode_active(AudioMode::EarTraining, false);
    assert!(dispatcher.play_sound(SoundCategory::Click, 0.5));
    assert_eq!(
        h.controls.played_tones().len(),
        SoundCategory::Countdown.tones().len() + SoundCategory::Click.tones().len()
    );
}

#[tokio::test]
async fn test_cue_gain_never_exceeds_ceiling() {
    let h = ready_harness().await;
    let ceiling = h.core.config().feedback.max_gain;

    for category in SoundCategory::ALL {
        h.core.dispatcher().play_sound(category, 5.0);
    }
    let tones = h.controls.played_tones();
    assert!(!tones.is_empty());
    assert!(tones.iter().all(|t| t.gain <= ceiling && t.gain >= 0.0));
}
