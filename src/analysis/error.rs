use thiserror::Error;

use crate::analysis::scorer::ScorerError;
use crate::settings::SettingsError;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("signal contains no samples")]
    EmptySignal,
    #[error("signal needs at least two samples, got {len}")]
    SignalTooShort { len: usize },
    #[error("sample {index} is not a finite number")]
    NonFiniteSample { index: usize },
    #[error("signal is constant; it cannot be min-max normalized")]
    ConstantSignal,
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("analysis window contains no samples")]
    EmptyWindow,
    #[error("analysis window has zero variance after filtering")]
    DegenerateWindow,
    #[error("cursor must start at 1; index 0 has no predecessor sample")]
    InvalidCursor,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("canvas memory is not contiguous")]
    CanvasLayout,
    #[error("failed to render: {0}")]
    Plot(String),
    #[error("background worker has stopped")]
    WorkerStopped,
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Scorer(#[from] ScorerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for AnalysisError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        AnalysisError::Plot(format!("{value:?}"))
    }
}

impl From<image::ImageError> for AnalysisError {
    fn from(value: image::ImageError) -> Self {
        AnalysisError::Plot(value.to_string())
    }
}
