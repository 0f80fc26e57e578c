use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::analysis::canvas::{level_to_y, Mark};
use crate::analysis::coords::{latency_columns, sample_index, screen_x};
use crate::analysis::frame::{SharedFrames, SubFrame};
use crate::analysis::peaks::{select_peaks, Peak, MIN_PEAK_DISTANCE};
use crate::analysis::scorer::AnomalyScorer;
use crate::analysis::severity::{severity_color, Rgb};
use crate::analysis::source::RecordedSignal;
use crate::analysis::transform::{is_flat, SignalTransformer};
use crate::analysis::AnalysisError;
use crate::settings::{Settings, SharedSettings};

/// Color of the scrolling trace.
pub const TRACE_COLOR: Rgb = [11, 212, 11];
const MARKER_RADIUS: u32 = 2;
const TICK_HALF_WIDTH: i32 = 6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window_length: usize,
    pub width: usize,
    pub height: usize,
    /// Columns scrolled per advance.
    pub scale_x: usize,
    pub sub_frame_height: usize,
    /// Wall-clock time one advance represents; used to convert scoring latency
    /// into scrolled columns.
    pub tick_interval_micros: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_length: 432,
            width: 800,
            height: 400,
            scale_x: 1,
            sub_frame_height: 200,
            tick_interval_micros: 2778,
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(self.tick_interval_micros)
    }

    /// Columns the analysis window occupies on the main canvas.
    pub fn window_columns(&self) -> usize {
        self.window_length * self.scale_x
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.width == 0 || self.height == 0 || self.sub_frame_height == 0 {
            return Err(AnalysisError::InvalidConfig(
                "canvas dimensions must be non-zero".into(),
            ));
        }
        if self.window_length == 0 || self.scale_x == 0 {
            return Err(AnalysisError::InvalidConfig(
                "window_length and scale_x must be non-zero".into(),
            ));
        }
        if self.window_columns() > self.width {
            return Err(AnalysisError::InvalidConfig(format!(
                "window of {} columns does not fit a {}-wide canvas",
                self.window_columns(),
                self.width
            )));
        }
        Ok(())
    }
}

/// A peak that made it through scoring.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredPeak {
    pub sample_index: usize,
    pub window_offset: usize,
    pub error: f64,
    pub flagged: bool,
    pub severity: Rgb,
}

/// Outcome of one analysis pass.
#[derive(Clone, Debug, Serialize)]
pub struct AnalysisReport {
    pub window_index: usize,
    pub peaks: Vec<Peak>,
    pub scored: Vec<ScoredPeak>,
    /// Wall time spent scoring the batch.
    pub latency: Duration,
    /// Columns the score markers were shifted back by to make up for `latency`.
    pub latency_columns: usize,
    /// The window was constant, or flattened to a constant, and was not searched.
    pub degenerate: bool,
}

/// Scores of one window's peaks and the latency their markers were placed with.
#[derive(Debug, Default)]
struct Predictions {
    scored: Vec<ScoredPeak>,
    latency: Duration,
    latency_columns: usize,
}

impl AnalysisReport {
    fn empty(window_index: usize) -> Self {
        Self {
            window_index,
            peaks: Vec::new(),
            scored: Vec::new(),
            latency: Duration::ZERO,
            latency_columns: 0,
            degenerate: false,
        }
    }
}

#[derive(Debug)]
pub enum Advance {
    /// The trace moved one step; carries the report when a window boundary was crossed.
    Streamed(Option<AnalysisReport>),
    /// The cursor reached the end of the recording.
    Exhausted,
}

/// Streams a recording into the main canvas one sample per advance and runs the
/// peak search and per-peak scoring every `window_length` samples.
pub struct FrameEngine {
    signal: RecordedSignal,
    view: Vec<f64>,
    transformer: SignalTransformer,
    scorer: Box<dyn AnomalyScorer>,
    settings: SharedSettings,
    frames: SharedFrames,
    config: EngineConfig,
    window_index: usize,
    cursor: usize,
    running: bool,
}

impl FrameEngine {
    pub fn new(
        signal: RecordedSignal,
        transformer: SignalTransformer,
        scorer: Box<dyn AnomalyScorer>,
        settings: SharedSettings,
        config: EngineConfig,
    ) -> Result<Self, AnalysisError> {
        config.validate()?;
        let view = signal.normalized_view();
        let frames = SharedFrames::new(config.height, config.width);
        Ok(Self {
            signal,
            view,
            transformer,
            scorer,
            settings,
            frames,
            config,
            window_index: 0,
            cursor: 0,
            running: true,
        })
    }

    /// Replace the recording and restart streaming from the beginning.
    pub fn load_signal(&mut self, signal: RecordedSignal) {
        info!("loaded recording of {} samples", signal.len());
        self.view = signal.normalized_view();
        self.signal = signal;
        self.window_index = 0;
        self.cursor = 0;
        self.running = true;
        self.frames.reset();
    }

    pub fn set_scorer(&mut self, scorer: Box<dyn AnomalyScorer>) {
        info!("anomaly scorer replaced");
        self.scorer = scorer;
    }

    pub fn frames(&self) -> SharedFrames {
        self.frames.clone()
    }

    pub fn settings(&self) -> SharedSettings {
        self.settings.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn signal(&self) -> &RecordedSignal {
        &self.signal
    }

    /// Number of completed analysis passes (`ii`).
    pub fn windows_analyzed(&self) -> usize {
        self.window_index
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Draw sample `idx` and, on a window boundary, analyze the window just completed.
    ///
    /// `idx` starts at 1 since each step joins `idx - 1` to `idx`.
    pub fn advance(&mut self, idx: usize) -> Result<Advance, AnalysisError> {
        if idx == 0 {
            return Err(AnalysisError::InvalidCursor);
        }
        if idx >= self.view.len() {
            self.running = false;
            return Ok(Advance::Exhausted);
        }
        let settings = self.settings.snapshot();
        let (width, height) = (self.config.width as i32, self.config.height);
        let scale_x = self.config.scale_x as i32;
        {
            let mut state = self.frames.lock();
            state.main.shift_left(self.config.scale_x)?;
            state.main.draw(&[Mark::Segment {
                from: (width - scale_x, level_to_y(self.view[idx - 1], height)),
                to: (width - 1, level_to_y(self.view[idx], height)),
                color: TRACE_COLOR,
            }])?;
        }
        self.cursor = idx;
        self.running = true;

        if idx % self.config.window_length != 0 {
            return Ok(Advance::Streamed(None));
        }
        if settings.analyze_mode() {
            let top = (height / 8) as i32;
            let bottom = (height * 7 / 8) as i32;
            self.frames.lock().main.draw(&[Mark::Outline {
                top_left: (width - self.config.window_columns() as i32, top),
                bottom_right: (width - 1, bottom),
                color: settings.annotation_color(),
            }])?;
        }
        let report = self.find_signal_peaks(&settings);
        self.window_index += 1;
        report.map(|r| Advance::Streamed(Some(r)))
    }

    fn find_signal_peaks(&mut self, settings: &Settings) -> Result<AnalysisReport, AnalysisError> {
        let window_length = self.config.window_length;
        let start = self.window_index * window_length;
        let mut report = AnalysisReport::empty(self.window_index);
        let window = self.signal.slice(start, start + window_length);
        if is_flat(window) {
            debug!("window {} is constant; skipping peak search", self.window_index);
            report.degenerate = true;
            return Ok(report);
        }
        let transformed = match self.transformer.transform(window) {
            Ok(window) => window,
            Err(AnalysisError::DegenerateWindow) => {
                debug!("window {} is flat after filtering; skipping peak search", self.window_index);
                report.degenerate = true;
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        report.peaks = select_peaks(
            &transformed,
            settings.peak_threshold(),
            MIN_PEAK_DISTANCE,
            settings.max_peaks(),
        );
        if settings.analyze_mode() && !report.peaks.is_empty() {
            let y = (self.config.height / 4) as i32;
            let marks: Vec<Mark> = report
                .peaks
                .iter()
                .map(|p| Mark::Dot {
                    center: (self.peak_column(p.offset, 0), y),
                    radius: MARKER_RADIUS,
                    color: settings.annotation_color(),
                })
                .collect();
            self.frames.lock().main.draw(&marks)?;
        }

        let predictions = self.make_predictions(&report.peaks, settings)?;
        report.scored = predictions.scored;
        report.latency = predictions.latency;
        report.latency_columns = predictions.latency_columns;
        Ok(report)
    }

    fn peak_column(&self, window_offset: usize, latency: usize) -> i32 {
        screen_x(
            window_offset,
            self.config.window_columns(),
            self.config.width,
            latency,
        )
    }

    /// Score a centered sub-window around each peak, publish a sub-frame per scored
    /// peak, then mark the scores on the main canvas shifted back by the time spent.
    fn make_predictions(
        &mut self,
        peaks: &[Peak],
        settings: &Settings,
    ) -> Result<Predictions, AnalysisError> {
        if peaks.is_empty() {
            return Ok(Predictions::default());
        }
        let started = Instant::now();
        let half = self.transformer.frame_size() / 2;
        let mut scored = Vec::with_capacity(peaks.len());
        for peak in peaks {
            let peak_idx = sample_index(self.window_index, self.config.window_length, peak.offset);
            if peak_idx <= half {
                debug!("peak at sample {peak_idx} has too little history; skipped");
                continue;
            }
            let raw = self.signal.centered(peak_idx, half);
            if is_flat(raw) {
                debug!("sub-window at sample {peak_idx} is constant; skipped");
                continue;
            }
            let sub_window = match self.transformer.transform(raw) {
                Ok(window) => window,
                Err(e) => {
                    debug!("sub-window at sample {peak_idx} not scored: {e}");
                    continue;
                }
            };
            let score = match self.scorer.score(&sub_window, settings.anomaly_threshold()) {
                Ok(score) => score,
                Err(e) => {
                    warn!("scorer failed on sample {peak_idx}: {e}");
                    continue;
                }
            };
            if score.reconstruction.len() != sub_window.len() {
                warn!(
                    "scorer returned {} samples for a {}-sample window; ignored",
                    score.reconstruction.len(),
                    sub_window.len()
                );
                continue;
            }
            let severity = severity_color(score.error);
            match SubFrame::render(
                &sub_window,
                &score,
                severity,
                settings,
                peak_idx,
                self.config.sub_frame_height,
            ) {
                Ok(sub_frame) => self.frames.publish(sub_frame),
                Err(e) => {
                    warn!("sub-frame for sample {peak_idx} not rendered: {e}");
                    continue;
                }
            }
            scored.push(ScoredPeak {
                sample_index: peak_idx,
                window_offset: peak.offset,
                error: score.error,
                flagged: score.flagged,
                severity,
            });
        }
        let elapsed = started.elapsed();
        if scored.is_empty() {
            return Ok(Predictions {
                scored,
                latency: elapsed,
                latency_columns: 0,
            });
        }

        let latency = latency_columns(
            elapsed,
            self.config.tick_interval(),
            self.config.scale_x,
        );
        let y = (self.config.height / 13) as i32;
        let marks: Vec<Mark> = scored
            .iter()
            .flat_map(|s| {
                let x = self.peak_column(s.window_offset, latency);
                [
                    Mark::Dot {
                        center: (x, y),
                        radius: MARKER_RADIUS,
                        color: s.severity,
                    },
                    Mark::Segment {
                        from: (x - TICK_HALF_WIDTH, y + 4),
                        to: (x + TICK_HALF_WIDTH, y + 4),
                        color: s.severity,
                    },
                ]
            })
            .collect();
        self.frames.lock().main.draw(&marks)?;
        Ok(Predictions {
            scored,
            latency: elapsed,
            latency_columns: latency,
        })
    }
}
