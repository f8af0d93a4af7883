use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use fretcoach::analysis::fft::FftProcessor;
use fretcoach::analysis::fretboard::{midi_to_frequency, parse_note_name};
use fretcoach::analysis::{analyze_snapshot, AnalysisParams, ChordCatalog, DetectionTiming};
use fretcoach::calibration::{CalibrationProfile, MemoryProfileStore};
use fretcoach::device::{synthesize_snapshot, StubDevice};
use fretcoach::logging::{init_logging, level_from_env};
use fretcoach::{AppConfig, AudioCore, GestureEvent, SoundCategory};

#[derive(Parser, Debug)]
#[command(
    name = "fretcoach_cli",
    about = "Chord detection and feedback cue harness for Fretcoach"
)]
struct Cli {
    /// JSON configuration file (defaults to built-in settings)
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the chords the detector knows
    Chords,
    /// Run the detection engine against a synthesized spectrum
    Detect {
        #[arg(long)]
        chord: String,
        /// Comma separated note names, e.g. C4,E4,G4
        #[arg(long, value_delimiter = ',')]
        notes: Vec<String>,
        /// Uniform background noise level added to every bin
        #[arg(long, default_value_t = 0.0)]
        noise: f32,
        #[arg(long, default_value_t = 500)]
        timeout_ms: u64,
    },
    /// Analyse the first FFT window of a mono WAV file
    AnalyzeWav {
        #[arg(long)]
        chord: String,
        #[arg(long)]
        wav: PathBuf,
    },
    /// Play a feedback cue on the default output device
    Beep {
        #[arg(long, default_value = "success")]
        category: String,
        #[arg(long, default_value_t = 0.8)]
        volume: f32,
    },
}

fn main() -> ExitCode {
    init_logging(level_from_env());
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli
        .config
        .map(AppConfig::load_from_file)
        .unwrap_or_default();

    match cli.command {
        Commands::Chords => run_chords(),
        Commands::Detect {
            chord,
            notes,
            noise,
            timeout_ms,
        } => run_detect(config, &chord, &notes, noise, timeout_ms),
        Commands::AnalyzeWav { chord, wav } => run_analyze_wav(&config, &chord, &wav),
        Commands::Beep { category, volume } => run_beep(config, &category, volume),
    }
}

fn run_chords() -> Result<ExitCode> {
    let catalog = ChordCatalog::standard();
    for name in catalog.names() {
        if let Some(target) = catalog.get(name) {
            let notes: Vec<&str> = target.tones.iter().map(|t| t.note.as_str()).collect();
            println!("{:<4} {}", name, notes.join(" "));
        }
    }
    Ok(ExitCode::from(0))
}

fn run_detect(
    config: AppConfig,
    chord: &str,
    notes: &[String],
    noise: f32,
    timeout_ms: u64,
) -> Result<ExitCode> {
    let peaks = notes
        .iter()
        .map(|note| {
            parse_note_name(note)
                .map(|midi| (midi_to_frequency(midi), 0.8))
                .ok_or_else(|| anyhow!("invalid note name '{}'", note))
        })
        .collect::<Result<Vec<(f32, f32)>>>()?;

    let device = StubDevice::new();
    let controls = device.controls();
    let sample_rate = config.audio.sample_rate;
    let fft_size = config.detection.fft_size;
    let core = AudioCore::new(
        Arc::new(device),
        Arc::new(MemoryProfileStore::new()),
        config,
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let result = runtime.block_on(async {
        core.initialize(&GestureEvent::key()).await?;
        // Calibrate against background noise only, then strum
        controls.set_bins(synthesize_snapshot(&[], sample_rate, fft_size, noise, 7).bins);
        if !core.start_chord_training().await? {
            bail!("microphone permission denied");
        }
        controls.set_bins(synthesize_snapshot(&peaks, sample_rate, fft_size, noise, 7).bins);
        let result = core.engine().detect_chord(chord, timeout_ms).await?;
        core.shutdown()?;
        Ok::<_, anyhow::Error>(result)
    })?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(ExitCode::from(if result.is_correct { 0 } else { 2 }))
}

fn run_analyze_wav(config: &AppConfig, chord: &str, path: &Path) -> Result<ExitCode> {
    let catalog = ChordCatalog::standard();
    let target = catalog
        .get(chord)
        .ok_or_else(|| anyhow!("unknown chord '{}'", chord))?;

    let (samples, sample_rate) = read_wav(path)?;
    let mut fft = FftProcessor::new(config.detection.fft_size);
    let snapshot = fft.snapshot(&samples, sample_rate);

    let params = AnalysisParams::new(&config.detection, &CalibrationProfile::default());
    let result = analyze_snapshot(&snapshot, target, &params).into_result(
        &target.name,
        DetectionTiming {
            latency_ms: 0,
            snapshots_analyzed: 1,
            timed_out: false,
        },
    );

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(ExitCode::from(if result.is_correct { 0 } else { 2 }))
}

fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    if spec.channels != 1 {
        bail!(
            "{} must be mono (found {} channels)",
            path.display(),
            spec.channels
        );
    }

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|sample| sample.map_err(|err| anyhow!(err)))
            .collect::<Result<Vec<f32>>>()?,
        hound::SampleFormat::Int => {
            let max = ((1i64 << (spec.bits_per_sample - 1)) - 1) as f32;
            match spec.bits_per_sample {
                16 => reader
                    .samples::<i16>()
                    .map(|sample| sample.map(|v| v as f32 / max).map_err(|err| anyhow!(err)))
                    .collect::<Result<Vec<f32>>>()?,
                24 | 32 => reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|v| v as f32 / max).map_err(|err| anyhow!(err)))
                    .collect::<Result<Vec<f32>>>()?,
                other => bail!("Unsupported bits per sample {} in {}", other, path.display()),
            }
        }
    };

    Ok((samples, spec.sample_rate))
}

#[cfg(not(target_os = "android"))]
fn run_beep(config: AppConfig, category: &str, volume: f32) -> Result<ExitCode> {
    use fretcoach::device::CpalDevice;

    let category = SoundCategory::from_name(category)
        .ok_or_else(|| anyhow!("unknown sound category '{}'", category))?;
    let core = AudioCore::new(
        Arc::new(CpalDevice::new()),
        Arc::new(MemoryProfileStore::new()),
        config,
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async {
        core.initialize(&GestureEvent::key()).await?;
        if !core.dispatcher().play_sound(category, volume) {
            bail!("{:?} cue was not played", category);
        }
        let tail_ms = category
            .tones()
            .iter()
            .map(|step| step.offset_ms + step.duration_ms)
            .max()
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(u64::from(tail_ms) + 100)).await;
        core.shutdown()?;
        Ok::<_, anyhow::Error>(())
    })?;

    Ok(ExitCode::from(0))
}

#[cfg(target_os = "android")]
fn run_beep(_config: AppConfig, _category: &str, _volume: f32) -> Result<ExitCode> {
    bail!("beep needs a desktop output device")
}
