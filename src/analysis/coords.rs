//! Window-local offsets -> recording indices and canvas columns.
//!
//! Peaks are found on a window resampled to the canonical frame size, so every
//! offset is first scaled back to the window's real length.

use std::time::Duration;

use crate::analysis::transform::CANONICAL_FRAME_SIZE;

/// `round(window_length / CANONICAL_FRAME_SIZE * offset)`.
fn scaled_offset(window_offset: usize, window_length: usize) -> usize {
    (window_length as f64 / CANONICAL_FRAME_SIZE as f64 * window_offset as f64).round() as usize
}

/// Absolute sample index of a peak found in the `window_index`-th window.
pub fn sample_index(window_index: usize, window_length: usize, window_offset: usize) -> usize {
    window_index * window_length + scaled_offset(window_offset, window_length)
}

/// Canvas column of a window offset, given that the window occupies the rightmost
/// `window_columns` columns and the canvas has since scrolled `latency_columns`
/// further. May fall off the left edge.
pub fn screen_x(
    window_offset: usize,
    window_columns: usize,
    buffer_width: usize,
    latency_columns: usize,
) -> i32 {
    buffer_width as i32 - window_columns as i32 + scaled_offset(window_offset, window_columns) as i32
        - latency_columns as i32
}

/// Columns the canvas would have scrolled during `elapsed` at one tick per
/// `tick_interval`, each tick shifting `scale_x` columns.
pub fn latency_columns(elapsed: Duration, tick_interval: Duration, scale_x: usize) -> usize {
    if tick_interval.is_zero() {
        return 0;
    }
    (elapsed.as_secs_f64() / tick_interval.as_secs_f64()).round() as usize * scale_x
}
