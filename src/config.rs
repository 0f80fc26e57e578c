// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisError, EngineConfig, SignalTransformer, TransformerConfig};
use crate::settings::{Settings, SettingsError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub engine: EngineConfig,
    pub transformer: TransformerConfig,
    pub settings: SettingsOverrides,
    /// JSON template artifact for the anomaly scorer.
    pub model_path: Option<PathBuf>,
}

/// Optional starting values for [`Settings`]. Applied through the validating
/// setters, so a file is held to the same bounds as interactive changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsOverrides {
    pub analyze_mode: Option<bool>,
    pub anomaly_threshold: Option<f64>,
    pub peak_threshold: Option<f64>,
    pub sub_frame_fill_percentage: Option<u8>,
    pub max_peaks: Option<usize>,
    pub annotation_color: Option<[i32; 3]>,
}

impl SettingsOverrides {
    pub fn apply(&self, settings: &mut Settings) -> Result<(), SettingsError> {
        if let Some(enabled) = self.analyze_mode {
            settings.set_analyze_mode(enabled);
        }
        if let Some(value) = self.anomaly_threshold {
            settings.set_anomaly_threshold(value)?;
        }
        if let Some(value) = self.peak_threshold {
            settings.set_peak_threshold(value)?;
        }
        if let Some(value) = self.sub_frame_fill_percentage {
            settings.set_sub_frame_fill_percentage(value)?;
        }
        if let Some(value) = self.max_peaks {
            settings.set_max_peaks(value)?;
        }
        if let Some(color) = self.annotation_color {
            settings.set_annotation_color(color)?;
        }
        Ok(())
    }
}

impl StreamConfig {
    /// Default settings with this file's overrides applied.
    pub fn initial_settings(&self) -> Result<Settings, SettingsError> {
        let mut settings = Settings::default();
        self.settings.apply(&mut settings)?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        self.engine.validate()?;
        SignalTransformer::new(self.transformer.clone())?;
        self.initial_settings()?;
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<StreamConfig, AnalysisError> {
    let raw = fs::read_to_string(path)?;
    let config: StreamConfig = serde_json::from_str(&raw)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config<P: AsRef<Path>>(config: &StreamConfig, path: P) -> Result<(), AnalysisError> {
    fs::write(path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}
