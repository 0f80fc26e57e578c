use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::transform::CANONICAL_FRAME_SIZE;

/// Anomaly threshold of the shipped autoencoder (0.1% quantile of training error).
pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 0.0029483;

#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("scorer expects {expected} samples, got {actual}")]
    Shape { expected: usize, actual: usize },
    #[error("model failure: {0}")]
    Model(String),
    #[error("failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse model artifact: {0}")]
    Json(#[from] serde_json::Error),
}

/// Output of one scoring call.
#[derive(Clone, Debug, PartialEq)]
pub struct Score {
    pub reconstruction: Vec<f64>,
    pub error: f64,
    pub flagged: bool,
}

/// Reconstruction-based anomaly model consumed by the frame engine.
///
/// Inputs are normalized windows of [`CANONICAL_FRAME_SIZE`] samples.
pub trait AnomalyScorer: Send {
    fn score(&mut self, window: &[f64], threshold: f64) -> Result<Score, ScorerError>;

    /// One throwaway call so the first real score does not pay for lazy setup.
    fn warm_up(&mut self) -> Result<(), ScorerError> {
        self.score(&[0.0; CANONICAL_FRAME_SIZE], DEFAULT_ANOMALY_THRESHOLD)
            .map(|_| ())
    }
}

/// Mean squared difference between a window and its reconstruction.
pub fn reconstruction_error(original: &[f64], reconstruction: &[f64]) -> f64 {
    let len = original.len().min(reconstruction.len());
    if len == 0 {
        return 0.0;
    }
    original
        .iter()
        .zip(reconstruction)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        / len as f64
}

fn check_shape(window: &[f64]) -> Result<(), ScorerError> {
    if window.len() != CANONICAL_FRAME_SIZE {
        return Err(ScorerError::Shape {
            expected: CANONICAL_FRAME_SIZE,
            actual: window.len(),
        });
    }
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct TemplateArtifact {
    template: Vec<f64>,
}

/// Reconstructs every beat as one stored template beat.
#[derive(Clone, Debug)]
pub struct TemplateScorer {
    template: Vec<f64>,
}

impl TemplateScorer {
    pub fn new(template: Vec<f64>) -> Result<Self, ScorerError> {
        check_shape(&template)?;
        Ok(Self { template })
    }

    /// Flat mid-level template; every real beat scores far from it.
    pub fn flat() -> Self {
        Self {
            template: vec![0.5; CANONICAL_FRAME_SIZE],
        }
    }

    /// Load a `{"template": [..]}` JSON artifact.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ScorerError> {
        let raw = fs::read_to_string(path)?;
        let artifact: TemplateArtifact = serde_json::from_str(&raw)?;
        Self::new(artifact.template)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ScorerError> {
        let artifact = TemplateArtifact {
            template: self.template.clone(),
        };
        fs::write(path, serde_json::to_string(&artifact)?)?;
        Ok(())
    }
}

impl AnomalyScorer for TemplateScorer {
    fn score(&mut self, window: &[f64], threshold: f64) -> Result<Score, ScorerError> {
        check_shape(window)?;
        let error = reconstruction_error(window, &self.template);
        Ok(Score {
            reconstruction: self.template.clone(),
            error,
            flagged: error > threshold,
        })
    }
}
