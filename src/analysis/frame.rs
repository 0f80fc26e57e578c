use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::analysis::canvas::{level_to_y, Canvas, Mark};
use crate::analysis::scorer::Score;
use crate::analysis::severity::{Rgb, GREEN};
use crate::analysis::AnalysisError;
use crate::settings::Settings;

/// Rendered view of one scored peak: the normalized sub-window, and in analyze mode
/// the model's reconstruction plus ties between the two traces.
#[derive(Clone, Debug)]
pub struct SubFrame {
    pub canvas: Canvas,
    /// Recording index the sub-window is centered on.
    pub sample_index: usize,
    pub error: f64,
    pub flagged: bool,
    pub severity: Rgb,
}

impl SubFrame {
    pub fn render(
        window: &[f64],
        score: &Score,
        severity: Rgb,
        settings: &Settings,
        sample_index: usize,
        height: usize,
    ) -> Result<Self, AnalysisError> {
        let width = window.len();
        let mut canvas = Canvas::new(height, width);
        let mut marks = trace_marks(window, height, GREEN);
        if settings.analyze_mode() {
            marks.extend(trace_marks(&score.reconstruction, height, severity));
            let step = fill_step(settings.sub_frame_fill_percentage(), width);
            marks.extend(
                window
                    .iter()
                    .zip(&score.reconstruction)
                    .enumerate()
                    .step_by(step)
                    .map(|(x, (&original, &rebuilt))| Mark::Segment {
                        from: (x as i32, level_to_y(original, height)),
                        to: (x as i32, level_to_y(rebuilt, height)),
                        color: severity,
                    }),
            );
        }
        canvas.draw(&marks)?;
        Ok(Self {
            canvas,
            sample_index,
            error: score.error,
            flagged: score.flagged,
            severity,
        })
    }

    /// Bilinear downscale for compact display (the viewer shows 432 x 100).
    pub fn thumbnail(&self, width: u32, height: u32) -> Result<RgbImage, AnalysisError> {
        let full = self.canvas.to_image()?;
        Ok(imageops::resize(&full, width, height, FilterType::Triangle))
    }
}

/// Polyline through consecutive levels, one column per sample.
fn trace_marks(levels: &[f64], height: usize, color: Rgb) -> Vec<Mark> {
    levels
        .windows(2)
        .enumerate()
        .map(|(i, pair)| Mark::Segment {
            from: (i as i32, level_to_y(pair[0], height)),
            to: (i as i32 + 1, level_to_y(pair[1], height)),
            color,
        })
        .collect()
}

/// Column stride between ties: 0% draws a single tie across the whole width, 100%
/// ties every column, and percentages in between interpolate the density linearly.
pub fn fill_step(percentage: u8, width: usize) -> usize {
    let width = width.max(1);
    match percentage {
        0 => width,
        p if p >= 100 => 1,
        p => {
            let sparse = 1.0 / width as f64;
            let density = sparse + (1.0 - sparse) * f64::from(p) / 100.0;
            ((1.0 / density).round() as usize).clamp(1, width)
        }
    }
}

/// Everything the consumer may read. Guarded as one unit.
#[derive(Debug)]
pub struct FrameState {
    pub main: Canvas,
    /// Swapped whole, never drawn into after publication.
    pub sub_frame: Option<Arc<SubFrame>>,
}

/// The one lock shared by the engine (writer) and the display side (reader).
#[derive(Clone, Debug)]
pub struct SharedFrames(Arc<Mutex<FrameState>>);

impl SharedFrames {
    pub fn new(height: usize, width: usize) -> Self {
        Self(Arc::new(Mutex::new(FrameState {
            main: Canvas::new(height, width),
            sub_frame: None,
        })))
    }

    /// A panic while holding the guard leaves at worst a half-drawn overlay, so a
    /// poisoned lock is taken over rather than propagated.
    pub fn lock(&self) -> MutexGuard<'_, FrameState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn copy_out(&self) -> (Canvas, Option<Arc<SubFrame>>) {
        let state = self.lock();
        (state.main.clone(), state.sub_frame.clone())
    }

    pub fn publish(&self, sub_frame: SubFrame) {
        self.lock().sub_frame = Some(Arc::new(sub_frame));
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.main.clear();
        state.sub_frame = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::severity::RED;

    fn ramp(len: usize) -> Vec<f64> {
        (0..len).map(|i| i as f64 / (len - 1) as f64).collect()
    }

    fn score_for(window: &[f64]) -> Score {
        Score {
            reconstruction: window.iter().map(|v| 1.0 - v).collect(),
            error: 0.02,
            flagged: true,
        }
    }

    fn analyze(percentage: u8) -> Settings {
        let mut settings = Settings::default();
        settings.set_analyze_mode(true);
        settings.set_sub_frame_fill_percentage(percentage).unwrap();
        settings
    }

    #[test]
    fn fill_density_special_cases_are_exact() {
        assert_eq!(fill_step(0, 864), 864);
        assert_eq!(fill_step(100, 864), 1);
        assert_eq!(fill_step(50, 864), 2);
        assert!(fill_step(25, 864) > fill_step(75, 864));
    }

    #[test]
    fn overlay_only_in_analyze_mode() {
        let window = ramp(64);
        let plain = SubFrame::render(&window, &score_for(&window), RED, &Settings::default(), 500, 40)
            .unwrap();
        let overlaid =
            SubFrame::render(&window, &score_for(&window), RED, &analyze(100), 500, 40).unwrap();
        let red_in = |frame: &SubFrame| {
            (0..64)
                .flat_map(|x| (0..40).map(move |y| (x, y)))
                .filter(|&(x, y)| frame.canvas.pixel(x, y) == Some(RED))
                .count()
        };
        assert_eq!(red_in(&plain), 0);
        assert!(red_in(&overlaid) > 0);
        assert_eq!(overlaid.sample_index, 500);
        assert!(overlaid.flagged);
    }

    #[test]
    fn denser_fill_lights_more_columns() {
        let window = ramp(64);
        let lit = |percentage| {
            let frame =
                SubFrame::render(&window, &score_for(&window), RED, &analyze(percentage), 0, 40)
                    .unwrap();
            (0..64)
                .map(|x| frame.canvas.lit_in_column(x))
                .sum::<usize>()
        };
        assert!(lit(100) > lit(50));
        assert!(lit(50) > lit(0));
    }

    #[test]
    fn thumbnail_resizes() {
        let window = ramp(864);
        let frame =
            SubFrame::render(&window, &score_for(&window), RED, &Settings::default(), 0, 200)
                .unwrap();
        let thumb = frame.thumbnail(432, 100).unwrap();
        assert_eq!(thumb.dimensions(), (432, 100));
    }

    #[test]
    fn published_sub_frames_are_swapped_whole() {
        let frames = SharedFrames::new(10, 10);
        let window = ramp(16);
        let first = SubFrame::render(&window, &score_for(&window), RED, &Settings::default(), 1, 10)
            .unwrap();
        frames.publish(first);
        let (_, held) = frames.copy_out();
        let second = SubFrame::render(&window, &score_for(&window), RED, &Settings::default(), 2, 10)
            .unwrap();
        frames.publish(second);
        assert_eq!(held.unwrap().sample_index, 1);
        assert_eq!(frames.copy_out().1.unwrap().sample_index, 2);
        frames.reset();
        assert!(frames.copy_out().1.is_none());
    }
}
