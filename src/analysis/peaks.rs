// Peak picking - local spectral maxima above the noise floor

use serde::{Deserialize, Serialize};

use super::FrequencySnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub bin: usize,
    /// Interpolated frequency in Hz
    pub frequency: f32,
    /// Raw bin amplitude
    pub amplitude: f32,
    /// Amplitude relative to the loudest bin of the snapshot
    pub normalized: f32,
}

/// Centre frequency of a (possibly fractional) bin
pub fn bin_to_frequency(bin: f32, sample_rate: u32, fft_size: usize) -> f32 {
    bin * sample_rate as f32 / fft_size as f32
}

/// Parabolic interpolation offset in [-0.5, 0.5] around a peak bin
fn interpolate(left: f32, centre: f32, right: f32) -> f32 {
    let denominator = left - 2.0 * centre + right;
    if denominator.abs() < f32::EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denominator).clamp(-0.5, 0.5)
}

/// Find local maxima strictly above `noise_floor`, loudest first.
///
/// The DC bin is skipped. On a plateau the first bin wins.
pub fn find_peaks(snapshot: &FrequencySnapshot, noise_floor: f32, max_peaks: usize) -> Vec<Peak> {
    let bins = &snapshot.bins;
    let max_amplitude = snapshot.max_amplitude();
    if bins.len() < 2 || max_amplitude <= noise_floor || max_peaks == 0 {
        return Vec::new();
    }

    let mut peaks: Vec<Peak> = (1..bins.len())
        .filter_map(|i| {
            let centre = bins[i];
            let left = bins[i - 1];
            let right = bins.get(i + 1).copied().unwrap_or(0.0);
            if centre <= noise_floor || centre <= left || centre < right {
                return None;
            }
            let offset = interpolate(left, centre, right);
            Some(Peak {
                bin: i,
                frequency: bin_to_frequency(
                    i as f32 + offset,
                    snapshot.sample_rate,
                    snapshot.fft_size,
                ),
                amplitude: centre,
                normalized: centre / max_amplitude,
            })
        })
        .collect();

    peaks.sort_by(|a, b| b.amplitude.total_cmp(&a.amplitude).then(a.bin.cmp(&b.bin)));
    peaks.truncate(max_peaks);
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(bins: Vec<f32>) -> FrequencySnapshot {
        let fft_size = bins.len() * 2;
        FrequencySnapshot::new(bins, 48_000, fft_size)
    }

    #[test]
    fn test_bin_to_frequency() {
        assert!((bin_to_frequency(1.0, 48_000, 16_384) - 2.9297).abs() < 1e-3);
        assert_eq!(bin_to_frequency(0.0, 48_000, 16_384), 0.0);
    }

    #[test]
    fn test_peaks_sorted_and_normalized() {
        let mut bins = vec![0.0; 64];
        bins[10] = 0.4;
        bins[20] = 0.8;
        bins[30] = 0.01;
        let peaks = find_peaks(&snapshot(bins), 0.02, 8);

        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0].bin, 20);
        assert_eq!(peaks[1].bin, 10);
        assert!((peaks[0].normalized - 1.0).abs() < 1e-6);
        assert!((peaks[1].normalized - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_interpolation_shifts_towards_louder_neighbour() {
        let mut bins = vec![0.0; 64];
        bins[19] = 0.2;
        bins[20] = 0.8;
        bins[21] = 0.6;
        let peaks = find_peaks(&snapshot(bins.clone()), 0.02, 8);
        let s = snapshot(bins);
        assert_eq!(peaks.len(), 1);
        assert!(peaks[0].frequency > bin_to_frequency(20.0, s.sample_rate, s.fft_size));
    }

    #[test]
    fn test_silence_and_floor() {
        assert!(find_peaks(&snapshot(vec![0.0; 64]), 0.02, 8).is_empty());
        assert!(find_peaks(&snapshot(vec![0.01; 64]), 0.02, 8).is_empty());
    }

    #[test]
    fn test_max_peaks_truncates() {
        let mut bins = vec![0.0; 64];
        for i in (2..60).step_by(4) {
            bins[i] = 0.1 + i as f32 / 100.0;
        }
        let peaks = find_peaks(&snapshot(bins), 0.02, 3);
        assert_eq!(peaks.len(), 3);
        assert!(peaks[0].amplitude >= peaks[1].amplitude);
    }

    #[test]
    fn test_dc_bin_skipped() {
        let mut bins = vec![0.0; 16];
        bins[0] = 0.9;
        assert!(find_peaks(&snapshot(bins), 0.02, 8).is_empty());
    }
}
