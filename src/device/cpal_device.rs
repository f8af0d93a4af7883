//! CPAL-based device graph for desktop platforms (Linux, macOS, Windows)
//!
//! `cpal::Stream` is not `Send`, so each stream lives on its own thread and
//! is driven through a small command channel. The output stream doubles as
//! the audio clock: its frame counter divided by the sample rate is the
//! session time every scheduler tick reads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, info, warn};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::analysis::fft::FftProcessor;
use crate::analysis::FrequencySnapshot;
use crate::config::AudioConfig;
use crate::error::AudioError;

use super::{AudioDevice, DeviceGraph, SpectrumAnalyser, Tone, Waveform};

/// Maximum simultaneously sounding feedback tones
const MAX_VOICES: usize = 32;

/// Fade applied at both ends of a tone to avoid clicks
const FADE_SECS: f32 = 0.005;

enum StreamCommand {
    Play,
    Pause,
    Stop,
}

/// Owner of a stream running on a dedicated thread
struct StreamThread {
    command_tx: mpsc::Sender<StreamCommand>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn `build` on a new thread and wait for it to report readiness.
    ///
    /// `build` returns the stream plus a value (the negotiated sample rate)
    /// handed back to the caller.
    fn spawn<F>(name: &str, build: F) -> Result<(Self, u32), AudioError>
    where
        F: FnOnce() -> Result<(cpal::Stream, u32), AudioError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (command_tx, command_rx) = mpsc::channel();

        let join_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let (stream, sample_rate) = match build() {
                    Ok(built) => built,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::HardwareError {
                        details: format!("Stream start failed: {}", e),
                    }));
                    return;
                }
                let _ = ready_tx.send(Ok(sample_rate));

                while let Ok(command) = command_rx.recv() {
                    let result = match command {
                        StreamCommand::Play => stream.play().map_err(|e| e.to_string()),
                        StreamCommand::Pause => stream.pause().map_err(|e| e.to_string()),
                        StreamCommand::Stop => break,
                    };
                    if let Err(e) = result {
                        warn!("[CpalDevice] Stream command failed: {}", e);
                    }
                }
            })
            .map_err(AudioError::from)?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamFailure {
                reason: "stream thread exited before reporting readiness".to_string(),
            })??;

        Ok((
            Self {
                command_tx,
                join_handle: Some(join_handle),
            },
            sample_rate,
        ))
    }

    fn send(&self, command: StreamCommand) -> Result<(), AudioError> {
        self.command_tx
            .send(command)
            .map_err(|_| AudioError::StreamFailure {
                reason: "stream thread is gone".to_string(),
            })
    }

    fn stop(&mut self) {
        let _ = self.command_tx.send(StreamCommand::Stop);
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> AudioError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => AudioError::CaptureUnavailable,
        other => {
            let reason = other.to_string();
            if reason.to_lowercase().contains("permission") {
                AudioError::PermissionDenied
            } else {
                AudioError::StreamOpenFailed { reason }
            }
        }
    }
}

/// Desktop audio device backed by the default cpal host
pub struct CpalDevice {
    _unit: (),
}

impl CpalDevice {
    pub fn new() -> Self {
        Self { _unit: () }
    }
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for CpalDevice {
    fn open(&self, config: &AudioConfig) -> Result<Arc<dyn DeviceGraph>, AudioError> {
        let frame_counter = Arc::new(AtomicU64::new(0));
        let (tone_producer, tone_consumer) = RingBuffer::<Tone>::new(config.tone_queue_capacity);

        let counter = Arc::clone(&frame_counter);
        let (output, sample_rate) =
            StreamThread::spawn("fretcoach-output", move || {
                build_output_stream(counter, tone_consumer)
            })?;

        info!("[CpalDevice] Output stream running at {} Hz", sample_rate);

        Ok(Arc::new(CpalGraph {
            sample_rate,
            frame_counter,
            tones: Mutex::new(tone_producer),
            output: Mutex::new(Some(output)),
            closed: AtomicBool::new(false),
        }))
    }
}

struct CpalGraph {
    sample_rate: u32,
    frame_counter: Arc<AtomicU64>,
    tones: Mutex<Producer<Tone>>,
    output: Mutex<Option<StreamThread>>,
    closed: AtomicBool,
}

impl CpalGraph {
    fn with_output<F>(&self, operation: &str, f: F) -> Result<(), AudioError>
    where
        F: FnOnce(&StreamThread) -> Result<(), AudioError>,
    {
        let guard = self.output.lock().map_err(|_| AudioError::LockPoisoned {
            component: "cpal_output".to_string(),
        })?;
        match guard.as_ref() {
            Some(output) => f(output),
            None => Err(AudioError::InvalidState {
                operation: operation.to_string(),
                state: "closed".to_string(),
            }),
        }
    }
}

impl DeviceGraph for CpalGraph {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.frame_counter.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn open_analyser(&self, fft_size: usize) -> Result<Box<dyn SpectrumAnalyser>, AudioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::InvalidState {
                operation: "open analyser".to_string(),
                state: "closed".to_string(),
            });
        }
        CpalAnalyser::open(fft_size).map(|a| Box::new(a) as Box<dyn SpectrumAnalyser>)
    }

    fn play_tone(&self, tone: Tone) -> Result<(), AudioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::InvalidState {
                operation: "play tone".to_string(),
                state: "closed".to_string(),
            });
        }
        let mut producer = self.tones.lock().map_err(|_| AudioError::LockPoisoned {
            component: "cpal_tones".to_string(),
        })?;
        producer.push(tone).map_err(|_| AudioError::StreamFailure {
            reason: "tone queue full".to_string(),
        })
    }

    fn suspend(&self) -> Result<(), AudioError> {
        self.with_output("suspend", |output| output.send(StreamCommand::Pause))
    }

    fn resume(&self) -> Result<(), AudioError> {
        self.with_output("resume", |output| output.send(StreamCommand::Play))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut guard) = self.output.lock() {
            if let Some(mut output) = guard.take() {
                output.stop();
            }
        }
        debug!("[CpalDevice] Output stream closed");
    }
}

struct Voice {
    start_frame: u64,
    end_frame: u64,
    phase: f32,
    phase_inc: f32,
    gain: f32,
    fade_frames: f32,
    waveform: Waveform,
}

impl Voice {
    fn from_tone(tone: &Tone, sample_rate: u32) -> Self {
        let sr = sample_rate as f64;
        let start_frame = (tone.start_time.max(0.0) * sr) as u64;
        let length = (tone.duration_secs as f64 * sr) as u64;
        Self {
            start_frame,
            end_frame: start_frame + length,
            phase: 0.0,
            phase_inc: tone.frequency_hz / sample_rate as f32,
            gain: tone.gain,
            fade_frames: (FADE_SECS * sample_rate as f32).max(1.0),
            waveform: tone.waveform,
        }
    }

    fn sample(&mut self, frame: u64) -> f32 {
        if frame < self.start_frame || frame >= self.end_frame {
            return 0.0;
        }
        let from_start = (frame - self.start_frame) as f32;
        let to_end = (self.end_frame - frame) as f32;
        let envelope = (from_start / self.fade_frames)
            .min(to_end / self.fade_frames)
            .min(1.0);

        let value = match self.waveform {
            Waveform::Sine => (2.0 * std::f32::consts::PI * self.phase).sin(),
            Waveform::Triangle => 4.0 * (self.phase - 0.5).abs() - 1.0,
            Waveform::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        };
        self.phase = (self.phase + self.phase_inc).fract();
        value * envelope * self.gain
    }
}

fn build_output_stream(
    frame_counter: Arc<AtomicU64>,
    mut tone_consumer: Consumer<Tone>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::StreamOpenFailed {
            reason: "No default output device found".to_string(),
        })?;

    let config = device
        .default_output_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default output config: {:?}", e),
        })?;

    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(AudioError::StreamOpenFailed {
            reason: "Only F32 sample format is currently supported for output".to_string(),
        });
    }

    let stream_config: cpal::StreamConfig = config.into();
    let channels_count = stream_config.channels as usize;
    let sample_rate = stream_config.sample_rate.0;
    let mut voices: Vec<Voice> = Vec::with_capacity(MAX_VOICES);

    let err_fn = |err| warn!("[CpalDevice] Output stream error: {}", err);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                while voices.len() < MAX_VOICES {
                    match tone_consumer.pop() {
                        Ok(tone) => voices.push(Voice::from_tone(&tone, sample_rate)),
                        Err(_) => break,
                    }
                }

                let frame_count = data.len() / channels_count;
                let first_frame = frame_counter.load(Ordering::Relaxed);

                for i in 0..frame_count {
                    let frame = first_frame + i as u64;
                    let mut value = 0.0;
                    for voice in voices.iter_mut() {
                        value += voice.sample(frame);
                    }
                    for ch in 0..channels_count {
                        data[i * channels_count + ch] = value;
                    }
                }

                let last_frame = first_frame + frame_count as u64;
                voices.retain(|v| v.end_frame > last_frame);
                frame_counter.fetch_add(frame_count as u64, Ordering::Relaxed);
            },
            err_fn,
            None,
        )
        .map_err(map_build_error)?;

    Ok((stream, sample_rate))
}

fn build_input_stream(
    mut producer: Producer<f32>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::CaptureUnavailable)?;

    let config = device
        .default_input_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default input config: {:?}", e),
        })?;

    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(AudioError::StreamOpenFailed {
            reason: "Only F32 sample format is currently supported for input".to_string(),
        });
    }

    let stream_config: cpal::StreamConfig = config.into();
    let channels_count = stream_config.channels as usize;
    let sample_rate = stream_config.sample_rate.0;

    let err_fn = |err| warn!("[CpalDevice] Input stream error: {}", err);

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // De-interleave: keep the first channel, drop samples when full
                for frame in data.chunks(channels_count) {
                    if let Some(&sample) = frame.first() {
                        let _ = producer.push(sample);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(map_build_error)?;

    Ok((stream, sample_rate))
}

/// Analyser fed by the default input device
struct CpalAnalyser {
    input: Option<StreamThread>,
    consumer: Consumer<f32>,
    window: Vec<f32>,
    write_pos: usize,
    ordered: Vec<f32>,
    fft: FftProcessor,
    sample_rate: u32,
}

impl CpalAnalyser {
    fn open(fft_size: usize) -> Result<Self, AudioError> {
        let (producer, consumer) = RingBuffer::<f32>::new(fft_size * 4);
        let (input, sample_rate) =
            StreamThread::spawn("fretcoach-capture", move || build_input_stream(producer))?;

        info!(
            "[CpalDevice] Capture running at {} Hz, fft_size={}",
            sample_rate, fft_size
        );

        Ok(Self {
            input: Some(input),
            consumer,
            window: vec![0.0; fft_size],
            write_pos: 0,
            ordered: Vec::with_capacity(fft_size),
            fft: FftProcessor::new(fft_size),
            sample_rate,
        })
    }
}

impl SpectrumAnalyser for CpalAnalyser {
    fn fft_size(&self) -> usize {
        self.fft.fft_size()
    }

    fn frequency_data(&mut self) -> FrequencySnapshot {
        let len = self.window.len();
        while let Ok(sample) = self.consumer.pop() {
            self.window[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % len;
        }

        self.ordered.clear();
        self.ordered.extend_from_slice(&self.window[self.write_pos..]);
        self.ordered.extend_from_slice(&self.window[..self.write_pos]);

        self.fft.snapshot(&self.ordered, self.sample_rate)
    }

    fn release(&mut self) {
        if let Some(mut input) = self.input.take() {
            input.stop();
            debug!("[CpalDevice] Capture released");
        }
    }
}

impl Drop for CpalAnalyser {
    fn drop(&mut self) {
        self.release();
    }
}
