//! Integration tests for chord detection through the audio core
//!
//! All tests run on the stub device with paused tokio time, so detection
//! timeouts elapse instantly and snapshot polling is deterministic.

use std::sync::Arc;

use fretcoach::analysis::ChordQuality;
use fretcoach::calibration::{CalibrationProfile, MemoryProfileStore, ProfileStore};
use fretcoach::device::{synthesize_snapshot, StubControls, StubDevice};
use fretcoach::error::DetectionError;
use fretcoach::{AppConfig, AudioCore, GestureEvent, SoundCategory};
use tokio_stream::StreamExt;

const C4: f32 = 261.63;
const E4: f32 = 329.63;
const G4: f32 = 392.00;

struct Harness {
    core: AudioCore,
    controls: Arc<StubControls>,
    store: Arc<MemoryProfileStore>,
}

fn harness() -> Harness {
    let device = StubDevice::new();
    let controls = device.controls();
    let store = Arc::new(MemoryProfileStore::new());
    let core = AudioCore::new(Arc::new(device), store.clone(), AppConfig::for_tests());
    Harness {
        core,
        controls,
        store,
    }
}

async fn ready_harness() -> Harness {
    let h = harness();
    h.core.initialize(&GestureEvent::pointer()).await.unwrap();
    assert_eq!(h.core.start_chord_training().await, Ok(true));
    h
}

fn chord_bins(core: &AudioCore, peaks: &[(f32, f32)]) -> Vec<f32> {
    synthesize_snapshot(
        peaks,
        core.config().audio.sample_rate,
        core.config().detection.fft_size,
        0.0,
        3,
    )
    .bins
}

#[tokio::test(start_paused = true)]
async fn test_silence_times_out_with_problems() {
    let h = ready_harness().await;

    let result = h.core.engine().detect_chord("C", 500).await.unwrap();

    assert_eq!(result.confidence, 0.0);
    assert!(!result.is_correct);
    assert!(!result.analysis.problems.is_empty());
    assert!(result.timing.timed_out);
    assert!(result.timing.snapshots_analyzed > 1);
    assert_eq!(result.expected_chord, "C");
}

#[tokio::test(start_paused = true)]
async fn test_c_major_triad_is_detected_as_perfect() {
    let h = ready_harness().await;
    h.controls
        .set_bins(chord_bins(&h.core, &[(C4, 0.8), (E4, 0.8), (G4, 0.8)]));

    let result = h.core.engine().detect_chord("C", 500).await.unwrap();

    assert!(result.is_correct);
    assert_eq!(result.analysis.chord_quality, ChordQuality::Perfect);
    assert!(!result.timing.timed_out);
    assert_eq!(
        result.timing.snapshots_analyzed,
        h.core.config().detection.stable_frames
    );
}

#[tokio::test(start_paused = true)]
async fn test_wrong_chord_is_not_confirmed() {
    let h = ready_harness().await;
    h.controls
        .set_bins(chord_bins(&h.core, &[(C4, 0.8), (E4, 0.8), (G4, 0.8)]));

    let result = h.core.engine().detect_chord("Am", 300).await.unwrap();

    assert!(!result.is_correct);
    assert!(result.timing.timed_out);
    assert!(!result.analysis.problems.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_chord_is_an_error() {
    let h = ready_harness().await;
    let err = h.core.engine().detect_chord("H13", 100).await.unwrap_err();
    assert_eq!(
        err,
        DetectionError::UnknownChord {
            name: "H13".to_string()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_detection_requires_initialization() {
    let h = harness();
    assert_eq!(
        h.core.start_chord_training().await,
        Err(DetectionError::NoSession)
    );

    h.core.initialize(&GestureEvent::pointer()).await.unwrap();
    assert_eq!(
        h.core.engine().detect_chord("C", 100).await.unwrap_err(),
        DetectionError::NotInitialized
    );
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_reports_not_ready() {
    let h = harness();
    h.controls.set_permission_granted(false);
    h.core.initialize(&GestureEvent::pointer()).await.unwrap();

    assert_eq!(h.core.start_chord_training().await, Ok(false));
    assert!(!h.core.engine().is_initialized());
    assert_eq!(h.controls.live_analysers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stored_calibration_is_reused() {
    let h = harness();
    let stored = CalibrationProfile {
        noise_floor: 0.05,
        frames_measured: 4,
        ..CalibrationProfile::default()
    };
    let key = h.core.config().detection.calibration_key.clone();
    h.store.set(&key, &stored).unwrap();

    h.core.initialize(&GestureEvent::pointer()).await.unwrap();
    assert_eq!(h.core.start_chord_training().await, Ok(true));

    assert_eq!(h.core.engine().calibration().unwrap().noise_floor, 0.05);
    assert_eq!(h.controls.capture_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_session_replacement_requires_rebinding() {
    let h = ready_harness().await;

    h.core.guard().dispose().unwrap();
    h.core.initialize(&GestureEvent::pointer()).await.unwrap();
    assert_eq!(
        h.core.engine().detect_chord("C", 100).await.unwrap_err(),
        DetectionError::NotInitialized
    );

    assert_eq!(h.core.start_chord_training().await, Ok(true));
    assert!(h.core.engine().detect_chord("C", 100).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_results_are_published_to_subscribers() {
    let h = ready_harness().await;
    let mut stream = Box::pin(h.core.engine().result_stream());
    h.controls
        .set_bins(chord_bins(&h.core, &[(C4, 0.8), (E4, 0.8), (G4, 0.8)]));

    let returned = h.core.engine().detect_chord("C", 500).await.unwrap();
    let published = stream.next().await.unwrap();

    assert_eq!(published.expected_chord, returned.expected_chord);
    assert_eq!(published.is_correct, returned.is_correct);
}

#[tokio::test(start_paused = true)]
async fn test_practice_plays_result_cue() {
    let h = ready_harness().await;

    let miss = h.core.practice_chord("C", 200).await.unwrap();
    assert!(!miss.is_correct);
    let error_tones = SoundCategory::Error.tones().len();
    assert_eq!(h.controls.played_tones().len(), error_tones);

    h.controls
        .set_bins(chord_bins(&h.core, &[(C4, 0.8), (E4, 0.8), (G4, 0.8)]));
    let hit = h.core.practice_chord("C", 500).await.unwrap();
    assert!(hit.is_correct);
    assert_eq!(
        h.controls.played_tones().len(),
        error_tones + SoundCategory::Success.tones().len()
    );
}
