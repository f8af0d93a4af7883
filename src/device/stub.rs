use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::analysis::FrequencySnapshot;
use crate::config::AudioConfig;
use crate::error::AudioError;

use super::{AudioDevice, DeviceGraph, SpectrumAnalyser, TimeSource, Tone};

/// Shared knobs and counters behind a [`StubDevice`].
///
/// Tests and the CLI hold an `Arc<StubControls>` to drive the audio clock,
/// feed snapshots to the analyser and inspect what the core did with the
/// device.
pub struct StubControls {
    clock_bits: AtomicU64,
    permission_granted: AtomicBool,
    fail_open: AtomicBool,
    suspended: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    captures: AtomicUsize,
    live_analysers: AtomicUsize,
    bins: Mutex<Vec<f32>>,
    queued: Mutex<VecDeque<Vec<f32>>>,
    tones: Mutex<Vec<Tone>>,
    /// Tones accepted before `play_tone` reports a full queue
    tone_capacity: Mutex<Option<usize>>,
}

impl StubControls {
    fn new() -> Self {
        Self {
            clock_bits: AtomicU64::new(0f64.to_bits()),
            permission_granted: AtomicBool::new(true),
            fail_open: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
            live_analysers: AtomicUsize::new(0),
            bins: Mutex::new(Vec::new()),
            queued: Mutex::new(VecDeque::new()),
            tones: Mutex::new(Vec::new()),
            tone_capacity: Mutex::new(None),
        }
    }

    pub fn time(&self) -> f64 {
        f64::from_bits(self.clock_bits.load(Ordering::SeqCst))
    }

    pub fn set_time(&self, seconds: f64) {
        self.clock_bits.store(seconds.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set_time(self.time() + seconds);
    }

    pub fn set_permission_granted(&self, granted: bool) {
        self.permission_granted.store(granted, Ordering::SeqCst);
    }

    /// Make every subsequent `open` fail with a hardware error.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Snapshot bins returned whenever the queue is empty.
    pub fn set_bins(&self, bins: Vec<f32>) {
        if let Ok(mut guard) = self.bins.lock() {
            *guard = bins;
        }
    }

    /// Snapshots returned (in order) before falling back to `set_bins`.
    pub fn queue_bins(&self, bins: Vec<f32>) {
        if let Ok(mut guard) = self.queued.lock() {
            guard.push_back(bins);
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn live_analysers(&self) -> usize {
        self.live_analysers.load(Ordering::SeqCst)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Cap the tones the graph accepts in total; `None` removes the cap.
    pub fn set_tone_capacity(&self, capacity: Option<usize>) {
        if let Ok(mut guard) = self.tone_capacity.lock() {
            *guard = capacity;
        }
    }

    pub fn played_tones(&self) -> Vec<Tone> {
        self.tones.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn next_bins(&self) -> Vec<f32> {
        if let Some(bins) = self.queued.lock().ok().and_then(|mut q| q.pop_front()) {
            return bins;
        }
        self.bins.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

/// Deterministic device used for tests and CLI tooling.
///
/// No real audio I/O happens: the audio clock only moves when the controls
/// move it, and the analyser replays whatever bins the controls hold.
pub struct StubDevice {
    controls: Arc<StubControls>,
}

impl StubDevice {
    pub fn new() -> Self {
        Self {
            controls: Arc::new(StubControls::new()),
        }
    }

    pub fn controls(&self) -> Arc<StubControls> {
        Arc::clone(&self.controls)
    }
}

impl Default for StubDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for StubDevice {
    fn open(&self, config: &AudioConfig) -> Result<Arc<dyn DeviceGraph>, AudioError> {
        if self.controls.fail_open.load(Ordering::SeqCst) {
            return Err(AudioError::HardwareError {
                details: "stub device configured to fail".to_string(),
            });
        }
        self.controls.opens.fetch_add(1, Ordering::SeqCst);
        self.controls.suspended.store(false, Ordering::SeqCst);
        Ok(Arc::new(StubGraph {
            controls: Arc::clone(&self.controls),
            sample_rate: config.sample_rate,
            closed: AtomicBool::new(false),
        }))
    }
}

struct StubGraph {
    controls: Arc<StubControls>,
    sample_rate: u32,
    closed: AtomicBool,
}

impl StubGraph {
    fn ensure_open(&self, operation: &str) -> Result<(), AudioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::InvalidState {
                operation: operation.to_string(),
                state: "closed".to_string(),
            });
        }
        Ok(())
    }
}

impl DeviceGraph for StubGraph {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.controls.time()
    }

    fn open_analyser(&self, fft_size: usize) -> Result<Box<dyn SpectrumAnalyser>, AudioError> {
        self.ensure_open("open analyser")?;
        if !self.controls.permission_granted.load(Ordering::SeqCst) {
            return Err(AudioError::PermissionDenied);
        }
        self.controls.live_analysers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubAnalyser {
            controls: Arc::clone(&self.controls),
            fft_size,
            sample_rate: self.sample_rate,
            released: false,
        }))
    }

    fn play_tone(&self, tone: Tone) -> Result<(), AudioError> {
        self.ensure_open("play tone")?;
        let mut tones = self
            .controls
            .tones
            .lock()
            .map_err(|_| AudioError::LockPoisoned {
                component: "stub_tones".to_string(),
            })?;
        let capacity = self.controls.tone_capacity.lock().ok().and_then(|c| *c);
        if capacity.is_some_and(|cap| tones.len() >= cap) {
            return Err(AudioError::StreamFailure {
                reason: "tone queue full".to_string(),
            });
        }
        tones.push(tone);
        Ok(())
    }

    fn suspend(&self) -> Result<(), AudioError> {
        self.ensure_open("suspend")?;
        self.controls.suspended.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<(), AudioError> {
        self.ensure_open("resume")?;
        self.controls.suspended.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.controls.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct StubAnalyser {
    controls: Arc<StubControls>,
    fft_size: usize,
    sample_rate: u32,
    released: bool,
}

impl SpectrumAnalyser for StubAnalyser {
    fn fft_size(&self) -> usize {
        self.fft_size
    }

    fn frequency_data(&mut self) -> FrequencySnapshot {
        if self.released {
            return FrequencySnapshot::silent(self.sample_rate, self.fft_size);
        }
        self.controls.captures.fetch_add(1, Ordering::SeqCst);
        let mut bins = self.controls.next_bins();
        bins.resize(self.fft_size / 2, 0.0);
        FrequencySnapshot::new(bins, self.sample_rate, self.fft_size)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.controls.live_analysers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for StubAnalyser {
    fn drop(&mut self) {
        self.release();
    }
}

/// Build a snapshot with single-bin peaks at the given frequencies.
///
/// `noise_level` adds uniform noise in `[0, noise_level)` to every bin using
/// a fixed seed, so the same arguments always produce the same snapshot.
pub fn synthesize_snapshot(
    peaks: &[(f32, f32)],
    sample_rate: u32,
    fft_size: usize,
    noise_level: f32,
    seed: u64,
) -> FrequencySnapshot {
    let mut bins = vec![0.0f32; fft_size / 2];
    if noise_level > 0.0 {
        let mut rng = StdRng::seed_from_u64(seed);
        for bin in bins.iter_mut() {
            *bin = rng.gen_range(0.0..noise_level);
        }
    }

    let mut snapshot = FrequencySnapshot::new(bins, sample_rate, fft_size);
    for &(frequency, amplitude) in peaks {
        let bin = snapshot.frequency_to_bin(frequency);
        if let Some(slot) = snapshot.bins.get_mut(bin) {
            *slot = slot.max(amplitude.clamp(0.0, 1.0));
        }
    }
    snapshot
}

/// Deterministic time source whose clock only moves when told to.
pub struct ManualTimeSource {
    start: Instant,
    offset_us: AtomicU64,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset_us: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_us
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Instant {
        let us = self.offset_us.load(Ordering::SeqCst);
        self.start + Duration::from_micros(us)
    }
}
