// src/types.rs
use std::sync::Arc;

use crate::analysis::{AnalysisReport, Canvas, SubFrame};

/// Messages the engine worker sends back to its owner.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Log(String),
    SignalLoaded { len: usize },
    Analysis(AnalysisReport),
    /// The cursor ran off the end of the recording.
    Exhausted { position: usize },
}

/// What a single tick managed to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// An advance to this cursor position was queued.
    Submitted(usize),
    /// The worker was busy; nothing was submitted.
    Skipped,
    /// Streaming is paused.
    Idle,
    Exhausted,
    /// The worker is gone.
    Disconnected,
}

/// Copy of everything a display needs. Both canvases come from a single lock.
#[derive(Clone, Debug)]
pub struct FrameSnapshot {
    pub main: Canvas,
    pub sub_frame: Option<Arc<SubFrame>>,
    pub position: usize,
    pub running: bool,
}
