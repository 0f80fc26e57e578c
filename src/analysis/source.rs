use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::analysis::transform::min_max_normalize;
use crate::analysis::AnalysisError;

/// Beat annotation shipped alongside a recording (sample index + symbol such as `N` or `V`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    pub sample: usize,
    pub symbol: String,
}

/// Immutable single-channel recording. Cloning is cheap; the samples are shared.
#[derive(Clone, Debug)]
pub struct RecordedSignal {
    samples: Arc<[f64]>,
    sample_rate_hz: f64,
    annotations: Vec<Annotation>,
}

impl RecordedSignal {
    pub fn new(samples: Vec<f64>, sample_rate_hz: f64) -> Result<Self, AnalysisError> {
        if sample_rate_hz <= 0.0 || !sample_rate_hz.is_finite() {
            return Err(AnalysisError::InvalidSampleRate);
        }
        match samples.len() {
            0 => return Err(AnalysisError::EmptySignal),
            1 => return Err(AnalysisError::SignalTooShort { len: 1 }),
            _ => {}
        }
        if let Some(index) = samples.iter().position(|v| !v.is_finite()) {
            return Err(AnalysisError::NonFiniteSample { index });
        }
        let first = samples[0];
        if samples.iter().all(|&v| v == first) {
            return Err(AnalysisError::ConstantSignal);
        }
        Ok(Self {
            samples: samples.into(),
            sample_rate_hz,
            annotations: Vec::new(),
        })
    }

    pub fn with_annotations(mut self, annotations: Vec<Annotation>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// `[start, end)` clamped to the recording.
    pub fn slice(&self, start: usize, end: usize) -> &[f64] {
        let end = end.min(self.samples.len());
        let start = start.min(end);
        &self.samples[start..end]
    }

    /// Samples `[center - half, center + half)`, truncated at the end of the recording.
    pub fn centered(&self, center: usize, half: usize) -> &[f64] {
        self.slice(center.saturating_sub(half), center + half)
    }

    /// Min-max normalized copy used for the scrolling trace.
    pub fn normalized_view(&self) -> Vec<f64> {
        // Construction rejects constant recordings, so the range is never zero.
        min_max_normalize(&self.samples).unwrap_or_else(|_| vec![0.0; self.samples.len()])
    }
}

/// Trait representing something that can yield recordings on demand.
pub trait SignalSource {
    fn next_signal(&mut self) -> Result<Option<RecordedSignal>, AnalysisError>;
}

/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<RecordedSignal>,
}

impl ManualSource {
    pub fn new(signals: impl IntoIterator<Item = RecordedSignal>) -> Self {
        Self {
            queue: signals.into_iter().collect(),
        }
    }
}

impl SignalSource for ManualSource {
    fn next_signal(&mut self) -> Result<Option<RecordedSignal>, AnalysisError> {
        Ok(self.queue.pop_front())
    }
}

/// One Gaussian component of a heartbeat: amplitude (mV), width (s), offset from R (s).
#[derive(Clone, Copy, Debug)]
struct Wave {
    amplitude: f64,
    width: f64,
    offset: f64,
}

const NORMAL_BEAT: [Wave; 5] = [
    Wave { amplitude: 0.15, width: 0.08, offset: -0.16 },
    Wave { amplitude: -0.10, width: 0.02, offset: -0.02 },
    Wave { amplitude: 1.00, width: 0.04, offset: 0.0 },
    Wave { amplitude: -0.20, width: 0.025, offset: 0.03 },
    Wave { amplitude: 0.25, width: 0.16, offset: 0.25 },
];

// Premature ventricular beat: no P wave, wide QRS, inverted T.
const ECTOPIC_BEAT: [Wave; 5] = [
    Wave { amplitude: 0.0, width: 0.08, offset: -0.16 },
    Wave { amplitude: -0.25, width: 0.05, offset: -0.05 },
    Wave { amplitude: 1.20, width: 0.10, offset: 0.0 },
    Wave { amplitude: -0.45, width: 0.06, offset: 0.07 },
    Wave { amplitude: -0.30, width: 0.18, offset: 0.30 },
];

/// Generates a PQRST trace from a sum of Gaussians with seeded uniform noise and
/// a slow baseline wander. Every R peak is annotated.
#[derive(Clone, Debug)]
pub struct SyntheticEcgSource {
    pub sample_rate_hz: f64,
    pub heart_rate_bpm: f64,
    pub duration_secs: f64,
    pub noise_amplitude: f64,
    pub baseline_wander: f64,
    /// Replace every n-th beat with an ectopic one.
    pub ectopic_every: Option<usize>,
    pub seed: u64,
    remaining: usize,
}

impl Default for SyntheticEcgSource {
    fn default() -> Self {
        Self {
            sample_rate_hz: 360.0,
            heart_rate_bpm: 72.0,
            duration_secs: 30.0,
            noise_amplitude: 0.02,
            baseline_wander: 0.05,
            ectopic_every: Some(7),
            seed: 42,
            remaining: 1,
        }
    }
}

impl SyntheticEcgSource {
    pub fn new(duration_secs: f64, seed: u64) -> Self {
        Self {
            duration_secs,
            seed,
            ..Self::default()
        }
    }

    /// Number of recordings `next_signal` yields before returning `None`.
    pub fn with_recordings(mut self, count: usize) -> Self {
        self.remaining = count;
        self
    }

    pub fn generate(&self) -> Result<RecordedSignal, AnalysisError> {
        if self.sample_rate_hz <= 0.0 || self.heart_rate_bpm <= 0.0 {
            return Err(AnalysisError::InvalidSampleRate);
        }
        let fs = self.sample_rate_hz;
        let len = (self.duration_secs * fs).round() as usize;
        let period = 60.0 / self.heart_rate_bpm;
        let beat_count = (self.duration_secs / period).ceil() as usize + 1;
        let beats: Vec<(f64, bool)> = (0..beat_count)
            .map(|k| {
                let r_time = period * (k as f64 + 0.5);
                let ectopic = self.ectopic_every.is_some_and(|n| n > 0 && (k + 1) % n == 0);
                (r_time, ectopic)
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut samples = Vec::with_capacity(len);
        for i in 0..len {
            let t = i as f64 / fs;
            let nearest = (t / period - 0.5).round().max(0.0) as usize;
            let lo = nearest.saturating_sub(1);
            let hi = (nearest + 1).min(beats.len().saturating_sub(1));
            let mut value = self.baseline_wander * (2.0 * PI * 0.2 * t).sin();
            for &(r_time, ectopic) in &beats[lo..=hi] {
                let shape = if ectopic { &ECTOPIC_BEAT } else { &NORMAL_BEAT };
                value += beat_value(shape, t - r_time);
            }
            if self.noise_amplitude > 0.0 {
                value += rng.gen_range(-self.noise_amplitude..=self.noise_amplitude);
            }
            samples.push(value);
        }

        let annotations = beats
            .iter()
            .map(|&(r_time, ectopic)| Annotation {
                sample: (r_time * fs).round() as usize,
                symbol: if ectopic { "V" } else { "N" }.to_owned(),
            })
            .filter(|a| a.sample < len)
            .collect();
        Ok(RecordedSignal::new(samples, fs)?.with_annotations(annotations))
    }
}

impl SignalSource for SyntheticEcgSource {
    fn next_signal(&mut self) -> Result<Option<RecordedSignal>, AnalysisError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let signal = self.generate()?;
        self.seed = self.seed.wrapping_add(1);
        Ok(Some(signal))
    }
}

fn beat_value(shape: &[Wave], dt: f64) -> f64 {
    shape
        .iter()
        .map(|w| {
            let sigma = w.width / 4.0;
            let x = dt - w.offset;
            w.amplitude * (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .sum()
}
