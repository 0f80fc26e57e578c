use rustfft::{num_complex::Complex64, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisError;

/// Length every transformed window and every scorer input is resampled to.
pub const CANONICAL_FRAME_SIZE: usize = 864;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    pub sample_rate_hz: f64,
    pub time_frame_secs: f64,
    /// Low-pass cutoff.
    pub hz_threshold: f64,
    /// Odd smoothing window for the Wiener filter.
    pub wiener_size: usize,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 360.0,
            time_frame_secs: 2.4,
            hz_threshold: 40.0,
            wiener_size: 9,
        }
    }
}

/// Denoise, resample and normalize a window of raw samples.
///
/// The pipeline is: band-limited resampling to the frame size, FFT low-pass,
/// Wiener smoothing, min-max normalization to `[0, 1]`.
#[derive(Clone, Debug)]
pub struct SignalTransformer {
    config: TransformerConfig,
    frame_size: usize,
}

impl Default for SignalTransformer {
    fn default() -> Self {
        Self {
            config: TransformerConfig::default(),
            frame_size: CANONICAL_FRAME_SIZE,
        }
    }
}

impl SignalTransformer {
    pub fn new(config: TransformerConfig) -> Result<Self, AnalysisError> {
        if config.sample_rate_hz <= 0.0 || !config.sample_rate_hz.is_finite() {
            return Err(AnalysisError::InvalidSampleRate);
        }
        if config.wiener_size == 0 || config.wiener_size % 2 == 0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "wiener_size must be odd, got {}",
                config.wiener_size
            )));
        }
        let frame_size = (config.sample_rate_hz * config.time_frame_secs).round();
        if !(frame_size >= 2.0) {
            return Err(AnalysisError::InvalidConfig(format!(
                "time frame of {}s at {}Hz is shorter than two samples",
                config.time_frame_secs, config.sample_rate_hz
            )));
        }
        Ok(Self {
            config,
            frame_size: frame_size as usize,
        })
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Output length is always [`Self::frame_size`]. A window that flattens to a
    /// constant after filtering yields [`AnalysisError::DegenerateWindow`].
    pub fn transform(&self, window: &[f64]) -> Result<Vec<f64>, AnalysisError> {
        if window.is_empty() {
            return Err(AnalysisError::EmptyWindow);
        }
        let mut planner = FftPlanner::<f64>::new();
        let resampled = if window.len() != self.frame_size {
            resample(&mut planner, window, self.frame_size)
        } else {
            window.to_vec()
        };
        let filtered = self.low_pass(&mut planner, &resampled);
        let smoothed = wiener(&filtered, self.config.wiener_size);
        min_max_normalize(&smoothed)
    }

    /// Zero every bin whose signed `fftfreq` frequency exceeds the cutoff and keep
    /// the real part of the inverse transform.
    fn low_pass(&self, planner: &mut FftPlanner<f64>, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        let mut buffer: Vec<Complex64> = signal.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        planner.plan_fft_forward(n).process(&mut buffer);
        let bin_hz = self.config.sample_rate_hz / n as f64;
        for (k, bin) in buffer.iter_mut().enumerate() {
            if fft_frequency(k, n) * bin_hz > self.config.hz_threshold {
                *bin = Complex64::ZERO;
            }
        }
        planner.plan_fft_inverse(n).process(&mut buffer);
        buffer.iter().map(|c| c.re / n as f64).collect()
    }
}

/// Signed bin index in `fftfreq` order: `0, 1, .., (n-1)/2, -(n/2), .., -1`.
fn fft_frequency(k: usize, n: usize) -> f64 {
    if k <= (n - 1) / 2 {
        k as f64
    } else {
        k as f64 - n as f64
    }
}

/// Fourier-domain resampling of a real signal to `num` samples.
///
/// The spectrum is truncated or zero-padded; an even-length Nyquist bin is split
/// when upsampling and folded when downsampling so the output keeps the input's
/// energy at that frequency.
pub fn resample(planner: &mut FftPlanner<f64>, signal: &[f64], num: usize) -> Vec<f64> {
    let nx = signal.len();
    if nx == 0 || num == 0 {
        return vec![0.0; num];
    }
    let mut spectrum: Vec<Complex64> = signal.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    planner.plan_fft_forward(nx).process(&mut spectrum);

    let kept = num.min(nx);
    let mut half = vec![Complex64::ZERO; num / 2 + 1];
    let nyquist = kept / 2 + 1;
    half[..nyquist].copy_from_slice(&spectrum[..nyquist]);
    if kept % 2 == 0 {
        if num < nx {
            half[kept / 2] *= 2.0;
        } else if nx < num {
            half[kept / 2] *= 0.5;
        }
    }

    // Rebuild the Hermitian spectrum and invert it.
    let mut full: Vec<Complex64> = (0..num)
        .map(|k| {
            if k <= num / 2 {
                half[k]
            } else {
                half[num - k].conj()
            }
        })
        .collect();
    full[0].im = 0.0;
    if num % 2 == 0 {
        full[num / 2].im = 0.0;
    }
    planner.plan_fft_inverse(num).process(&mut full);
    full.iter().map(|c| c.re / nx as f64).collect()
}

/// Adaptive Wiener smoothing over a centered window of `size` samples, zero-padded
/// at the edges. The noise power is the mean of the local variances.
pub fn wiener(signal: &[f64], size: usize) -> Vec<f64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let half = size / 2;
    let mut sum = vec![0.0; n + 1];
    let mut sum_sq = vec![0.0; n + 1];
    for (i, &v) in signal.iter().enumerate() {
        sum[i + 1] = sum[i] + v;
        sum_sq[i + 1] = sum_sq[i] + v * v;
    }
    let (means, variances): (Vec<f64>, Vec<f64>) = (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            let mean = (sum[hi] - sum[lo]) / size as f64;
            let mean_sq = (sum_sq[hi] - sum_sq[lo]) / size as f64;
            (mean, mean_sq - mean * mean)
        })
        .unzip();
    let noise = variances.iter().sum::<f64>() / n as f64;

    signal
        .iter()
        .zip(means.iter().zip(&variances))
        .map(|(&v, (&mean, &variance))| {
            if variance < noise || variance <= 0.0 {
                mean
            } else {
                mean + (v - mean) * (1.0 - noise / variance)
            }
        })
        .collect()
}

/// True when every sample equals the first. Filtering a flatline leaves edge
/// ripples from the zero-padded smoothing, so this must be checked on raw samples.
pub fn is_flat(window: &[f64]) -> bool {
    match window.first() {
        Some(&first) => window.iter().all(|&v| v == first),
        None => true,
    }
}

/// Rescale to `[0, 1]`. A zero (or non-finite) range is a degenerate window.
pub fn min_max_normalize(signal: &[f64]) -> Result<Vec<f64>, AnalysisError> {
    if signal.is_empty() {
        return Err(AnalysisError::EmptyWindow);
    }
    let (min, max) = signal
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if !range.is_finite() || range <= f64::EPSILON {
        return Err(AnalysisError::DegenerateWindow);
    }
    Ok(signal.iter().map(|&v| (v - min) / range).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn sine(len: usize, freq_hz: f64, fs: f64) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * PI * freq_hz * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn output_length_is_always_the_frame_size() {
        let transformer = SignalTransformer::default();
        let mut rng = StdRng::seed_from_u64(3);
        for len in [863usize, 864, 2000] {
            let window: Vec<f64> = (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let out = transformer.transform(&window).unwrap();
            assert_eq!(out.len(), CANONICAL_FRAME_SIZE);
            assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
        }
        // A single sample resamples to a constant; the zero-padded smoothing
        // edges still give a usable range.
        let out = transformer.transform(&[0.7]).unwrap();
        assert_eq!(out.len(), CANONICAL_FRAME_SIZE);
    }

    #[test]
    fn renormalizing_is_a_fixed_point() {
        let normalized = min_max_normalize(&sine(500, 3.0, 360.0)).unwrap();
        let again = min_max_normalize(&normalized).unwrap();
        for (a, b) in normalized.iter().zip(&again) {
            assert!((a - b).abs() < 1e-12);
        }
        let min = again.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = again.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert_eq!((min, max), (0.0, 1.0));
    }

    #[test]
    fn constant_and_empty_windows_are_rejected() {
        let transformer = SignalTransformer::default();
        assert!(matches!(
            transformer.transform(&vec![0.0; 864]),
            Err(AnalysisError::DegenerateWindow)
        ));
        assert!(matches!(
            transformer.transform(&[]),
            Err(AnalysisError::EmptyWindow)
        ));
        assert!(matches!(
            min_max_normalize(&[2.0, 2.0, 2.0]),
            Err(AnalysisError::DegenerateWindow)
        ));
    }

    #[test]
    fn flatness_is_judged_on_raw_samples() {
        assert!(is_flat(&[0.3; 432]));
        assert!(is_flat(&[]));
        assert!(!is_flat(&[0.3, 0.3, 0.31]));
        // A non-zero flatline survives filtering with ripples at its edges.
        assert!(SignalTransformer::default().transform(&[5.0; 864]).is_ok());
    }

    #[test]
    fn resample_preserves_a_band_limited_tone() {
        let mut planner = FftPlanner::new();
        // Two full cycles over 432 samples -> still two cycles over 864.
        let input = sine(432, 2.0, 432.0);
        let out = resample(&mut planner, &input, 864);
        let expected = sine(864, 2.0, 864.0);
        for (a, b) in out.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
        let down = resample(&mut planner, &expected, 432);
        for (a, b) in down.iter().zip(&input) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn resample_keeps_the_mean_of_a_single_sample() {
        let mut planner = FftPlanner::new();
        let out = resample(&mut planner, &[0.25], 16);
        assert!(out.iter().all(|v| (v - 0.25).abs() < 1e-12));
    }

    #[test]
    fn low_pass_attenuates_high_frequencies() {
        let transformer = SignalTransformer::default();
        let mut planner = FftPlanner::new();
        let low = sine(864, 5.0, 360.0);
        let high = sine(864, 100.0, 360.0);
        let mixed: Vec<f64> = low.iter().zip(&high).map(|(a, b)| a + b).collect();
        let filtered = transformer.low_pass(&mut planner, &mixed);
        // Only the positive-frequency half of the 100 Hz tone is removed.
        let residual: f64 = filtered
            .iter()
            .zip(&low)
            .zip(&high)
            .map(|((f, l), h)| (f - l - 0.5 * h).abs())
            .fold(0.0, f64::max);
        assert!(residual < 1e-9, "residual {residual}");
    }

    #[test]
    fn wiener_smooths_isolated_spikes() {
        let mut signal = vec![0.0; 101];
        signal[50] = 1.0;
        let smoothed = wiener(&signal, 9);
        assert_eq!(smoothed.len(), signal.len());
        assert!(smoothed[50] < 1.0);
        assert!(smoothed[10].abs() < 1e-12);
    }

    #[test]
    fn even_wiener_sizes_are_rejected() {
        let config = TransformerConfig {
            wiener_size: 8,
            ..TransformerConfig::default()
        };
        assert!(SignalTransformer::new(config).is_err());
        assert_eq!(
            SignalTransformer::new(TransformerConfig::default())
                .unwrap()
                .frame_size(),
            CANONICAL_FRAME_SIZE
        );
    }
}
