// FFT module - Fast Fourier Transform computation
//
// Turns a window of captured samples into a frequency snapshot. Hann
// windowing reduces spectral leakage; magnitudes are scaled so a full-scale
// sine lands near 1.0, which keeps amplitudes comparable across FFT sizes.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::FrequencySnapshot;

/// FFT processor that computes normalized magnitude spectra from audio windows
pub struct FftProcessor {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    /// Hann window for FFT (pre-computed)
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl FftProcessor {
    /// Create a new FFT processor
    ///
    /// # Arguments
    /// * `fft_size` - FFT window size (16384 gives ~3 Hz bins at 48 kHz)
    pub fn new(fft_size: usize) -> Self {
        let window = (0..fft_size)
            .map(|i| {
                0.5 * (1.0
                    - ((2.0 * std::f32::consts::PI * i as f32) / (fft_size as f32 - 1.0)).cos())
            })
            .collect();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        Self {
            fft,
            fft_size,
            window,
            scratch: Vec::with_capacity(fft_size),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Compute the normalized magnitude spectrum of `audio`
    ///
    /// Input shorter than the FFT size is zero-padded; longer input is
    /// truncated. Returns `fft_size / 2` bins clamped to [0, 1].
    pub fn magnitude_spectrum(&mut self, audio: &[f32]) -> Vec<f32> {
        self.scratch.clear();
        for (i, &sample) in audio.iter().take(self.fft_size).enumerate() {
            self.scratch.push(Complex::new(sample * self.window[i], 0.0));
        }
        self.scratch.resize(self.fft_size, Complex::new(0.0, 0.0));

        self.fft.process(&mut self.scratch);

        // Hann coherent gain is 0.5, so a unit sine peaks at N/4
        let scale = 4.0 / self.fft_size as f32;
        self.scratch[..self.fft_size / 2]
            .iter()
            .map(|c| (c.norm() * scale).clamp(0.0, 1.0))
            .collect()
    }

    /// Compute a snapshot for `audio` captured at `sample_rate`
    pub fn snapshot(&mut self, audio: &[f32], sample_rate: u32) -> FrequencySnapshot {
        let bins = self.magnitude_spectrum(audio);
        FrequencySnapshot::new(bins, sample_rate, self.fft_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, amplitude: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn test_sine_peak_lands_in_expected_bin() {
        let sample_rate = 48_000;
        let mut fft = FftProcessor::new(8192);
        let snapshot = fft.snapshot(&sine(440.0, 0.8, sample_rate, 8192), sample_rate);

        let (peak_bin, peak) = snapshot
            .bins
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });

        assert_eq!(peak_bin, snapshot.frequency_to_bin(440.0));
        assert!(peak > 0.5 && peak <= 1.0, "peak amplitude {}", peak);
    }

    #[test]
    fn test_silence_is_zero() {
        let mut fft = FftProcessor::new(1024);
        let spectrum = fft.magnitude_spectrum(&[0.0; 1024]);
        assert_eq!(spectrum.len(), 512);
        assert!(spectrum.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_short_input_is_zero_padded() {
        let mut fft = FftProcessor::new(1024);
        let spectrum = fft.magnitude_spectrum(&[0.5; 100]);
        assert_eq!(spectrum.len(), 512);
    }
}
