// src/analysis/mod.rs
pub mod canvas;
pub mod coords;
pub mod error;
pub mod frame;
pub mod handler;
pub mod peaks;
pub mod scorer;
pub mod severity;
pub mod source;
pub mod transform;

pub use canvas::{level_to_y, Canvas, Mark};
pub use coords::{latency_columns, sample_index, screen_x};
pub use error::AnalysisError;
pub use frame::{fill_step, FrameState, SharedFrames, SubFrame};
pub use handler::{Advance, AnalysisReport, EngineConfig, FrameEngine, ScoredPeak, TRACE_COLOR};
pub use peaks::{local_maxima, select_peaks, Peak, MIN_PEAK_DISTANCE};
pub use scorer::{
    reconstruction_error, AnomalyScorer, Score, ScorerError, TemplateScorer,
    DEFAULT_ANOMALY_THRESHOLD,
};
pub use severity::{severity_color, Rgb, SEVERITY_DOMAIN_MAX};
pub use source::{Annotation, ManualSource, RecordedSignal, SignalSource, SyntheticEcgSource};
pub use transform::{
    is_flat, min_max_normalize, resample, wiener, SignalTransformer, TransformerConfig,
    CANONICAL_FRAME_SIZE,
};
