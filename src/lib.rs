// src/lib.rs
pub mod analysis;
pub mod config;
pub mod engine;
pub mod settings;
pub mod types;

pub use analysis::{
    AnalysisError, AnomalyScorer, EngineConfig, FrameEngine, RecordedSignal, SignalTransformer,
    TemplateScorer,
};
pub use config::{load_config, StreamConfig};
pub use engine::{FrameScheduler, TickHandle};
pub use settings::{Settings, SettingsError, SharedSettings};
pub use types::{FrameSnapshot, StreamEvent, TickOutcome};
