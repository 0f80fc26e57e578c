// src/settings.rs
use std::ops::RangeInclusive;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use thiserror::Error;

use crate::analysis::scorer::DEFAULT_ANOMALY_THRESHOLD;
use crate::analysis::severity::Rgb;

pub const DEFAULT_PEAK_THRESHOLD: f64 = 0.8;
pub const DEFAULT_FILL_PERCENTAGE: u8 = 100;
pub const DEFAULT_MAX_PEAKS: usize = 3;
pub const DEFAULT_ANNOTATION_COLOR: Rgb = [255, 0, 0];

pub const PEAK_THRESHOLD_RANGE: RangeInclusive<f64> = 0.6..=0.95;
pub const FILL_PERCENTAGE_RANGE: RangeInclusive<u8> = 0..=100;
pub const MAX_PEAKS_RANGE: RangeInclusive<usize> = 1..=5;

/// Anomaly threshold may drift at most 20% from the model's default.
pub fn anomaly_threshold_range() -> RangeInclusive<f64> {
    DEFAULT_ANOMALY_THRESHOLD * 0.8..=DEFAULT_ANOMALY_THRESHOLD * 1.2
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SettingsError {
    #[error("anomaly threshold {value} outside [{min}, {max}]")]
    AnomalyThreshold { value: f64, min: f64, max: f64 },
    #[error("peak threshold {value} outside [{min}, {max}]")]
    PeakThreshold { value: f64, min: f64, max: f64 },
    #[error("fill percentage {value} outside [{min}, {max}]")]
    FillPercentage { value: u8, min: u8, max: u8 },
    #[error("max peaks {value} outside [{min}, {max}]")]
    MaxPeaks { value: usize, min: usize, max: usize },
    #[error("color channel {channel} is {value}; channels must lie in [0, 255]")]
    AnnotationColor { channel: usize, value: i32 },
}

/// User-tunable parameters read by the frame engine. Every setter validates and
/// leaves the previous value in place when it rejects its input.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Settings {
    analyze_mode: bool,
    anomaly_threshold: f64,
    peak_threshold: f64,
    sub_frame_fill_percentage: u8,
    max_peaks: usize,
    annotation_color: Rgb,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            analyze_mode: false,
            anomaly_threshold: DEFAULT_ANOMALY_THRESHOLD,
            peak_threshold: DEFAULT_PEAK_THRESHOLD,
            sub_frame_fill_percentage: DEFAULT_FILL_PERCENTAGE,
            max_peaks: DEFAULT_MAX_PEAKS,
            annotation_color: DEFAULT_ANNOTATION_COLOR,
        }
    }
}

impl Settings {
    pub fn analyze_mode(&self) -> bool {
        self.analyze_mode
    }

    pub fn anomaly_threshold(&self) -> f64 {
        self.anomaly_threshold
    }

    pub fn peak_threshold(&self) -> f64 {
        self.peak_threshold
    }

    pub fn sub_frame_fill_percentage(&self) -> u8 {
        self.sub_frame_fill_percentage
    }

    pub fn max_peaks(&self) -> usize {
        self.max_peaks
    }

    pub fn annotation_color(&self) -> Rgb {
        self.annotation_color
    }

    pub fn set_analyze_mode(&mut self, enabled: bool) {
        self.analyze_mode = enabled;
    }

    pub fn set_anomaly_threshold(&mut self, value: f64) -> Result<(), SettingsError> {
        let range = anomaly_threshold_range();
        if !range.contains(&value) {
            return Err(SettingsError::AnomalyThreshold {
                value,
                min: *range.start(),
                max: *range.end(),
            });
        }
        self.anomaly_threshold = value;
        Ok(())
    }

    pub fn set_peak_threshold(&mut self, value: f64) -> Result<(), SettingsError> {
        if !PEAK_THRESHOLD_RANGE.contains(&value) {
            return Err(SettingsError::PeakThreshold {
                value,
                min: *PEAK_THRESHOLD_RANGE.start(),
                max: *PEAK_THRESHOLD_RANGE.end(),
            });
        }
        self.peak_threshold = value;
        Ok(())
    }

    pub fn set_sub_frame_fill_percentage(&mut self, value: u8) -> Result<(), SettingsError> {
        if !FILL_PERCENTAGE_RANGE.contains(&value) {
            return Err(SettingsError::FillPercentage {
                value,
                min: *FILL_PERCENTAGE_RANGE.start(),
                max: *FILL_PERCENTAGE_RANGE.end(),
            });
        }
        self.sub_frame_fill_percentage = value;
        Ok(())
    }

    pub fn set_max_peaks(&mut self, value: usize) -> Result<(), SettingsError> {
        if !MAX_PEAKS_RANGE.contains(&value) {
            return Err(SettingsError::MaxPeaks {
                value,
                min: *MAX_PEAKS_RANGE.start(),
                max: *MAX_PEAKS_RANGE.end(),
            });
        }
        self.max_peaks = value;
        Ok(())
    }

    /// Channels arrive as plain integers (e.g. from a color picker or a config file)
    /// and are range-checked before narrowing.
    pub fn set_annotation_color(&mut self, color: [i32; 3]) -> Result<(), SettingsError> {
        let mut checked = [0u8; 3];
        for (channel, (&value, slot)) in color.iter().zip(checked.iter_mut()).enumerate() {
            *slot = u8::try_from(value)
                .map_err(|_| SettingsError::AnnotationColor { channel, value })?;
        }
        self.annotation_color = checked;
        Ok(())
    }
}

/// Settings shared between the engine worker and whoever tunes them.
///
/// The engine copies the whole struct once per advance, so a change made while an
/// advance is running applies from the next one.
#[derive(Clone, Debug, Default)]
pub struct SharedSettings(Arc<RwLock<Settings>>);

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self(Arc::new(RwLock::new(settings)))
    }

    pub fn snapshot(&self) -> Settings {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the live settings. Setter errors are passed back untouched.
    pub fn update<T>(&self, f: impl FnOnce(&mut Settings) -> T) -> T {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
