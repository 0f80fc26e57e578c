use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbImage};
use ndarray::{s, Array3, ArrayView1, ArrayView3};
use plotters::prelude::*;

use crate::analysis::severity::Rgb;
use crate::analysis::AnalysisError;

const CHANNELS: usize = 3;

/// Primitive the engine asks a canvas to rasterise. Coordinates are pixels with
/// the origin at the top-left; anything outside the canvas is clipped away.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mark {
    Segment {
        from: (i32, i32),
        to: (i32, i32),
        color: Rgb,
    },
    Outline {
        top_left: (i32, i32),
        bottom_right: (i32, i32),
        color: Rgb,
    },
    Dot {
        center: (i32, i32),
        radius: u32,
        color: Rgb,
    },
}

/// Row-major `height x width x 3` RGB pixel buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Canvas {
    pixels: Array3<u8>,
}

impl Canvas {
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            pixels: Array3::zeros((height, width, CHANNELS)),
        }
    }

    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn pixels(&self) -> ArrayView3<'_, u8> {
        self.pixels.view()
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgb> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let px = self.pixels.slice(s![y, x, ..]);
        Some([px[0], px[1], px[2]])
    }

    /// Number of pixels in column `x` that are not black.
    pub fn lit_in_column(&self, x: usize) -> usize {
        if x >= self.width() {
            return 0;
        }
        self.pixels
            .slice(s![.., x, ..])
            .outer_iter()
            .filter(|px| px.iter().any(|&c| c != 0))
            .count()
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    fn bytes_mut(&mut self) -> Result<&mut [u8], AnalysisError> {
        self.pixels.as_slice_mut().ok_or(AnalysisError::CanvasLayout)
    }

    /// Scroll everything `columns` to the left and blank the vacated right edge.
    pub fn shift_left(&mut self, columns: usize) -> Result<(), AnalysisError> {
        let row_len = self.width() * CHANNELS;
        if row_len == 0 {
            return Ok(());
        }
        let shift = columns.min(self.width()) * CHANNELS;
        for row in self.bytes_mut()?.chunks_exact_mut(row_len) {
            row.copy_within(shift.., 0);
            row[row_len - shift..].fill(0);
        }
        Ok(())
    }

    /// Rasterise `marks` in order. The bitmap backend clamps off-canvas points onto
    /// the border, so segments are clipped here first and dots that cross an edge
    /// are filled pixel by pixel.
    pub fn draw(&mut self, marks: &[Mark]) -> Result<(), AnalysisError> {
        let (width, height) = (self.width() as i32, self.height() as i32);
        if marks.is_empty() || width == 0 || height == 0 {
            return Ok(());
        }
        let mut edge_dots = Vec::new();
        {
            let buffer = self.bytes_mut()?;
            let root =
                BitMapBackend::with_buffer(buffer, (width as u32, height as u32)).into_drawing_area();
            for mark in marks {
                match *mark {
                    Mark::Segment { from, to, color } => {
                        if let Some((from, to)) = clip_segment(from, to, width, height) {
                            root.draw(&PathElement::new(vec![from, to], rgb(color).stroke_width(1)))?;
                        }
                    }
                    Mark::Outline {
                        top_left: (left, top),
                        bottom_right: (right, bottom),
                        color,
                    } => {
                        let edges = [
                            ((left, top), (right, top)),
                            ((right, top), (right, bottom)),
                            ((right, bottom), (left, bottom)),
                            ((left, bottom), (left, top)),
                        ];
                        for (from, to) in edges {
                            if let Some((from, to)) = clip_segment(from, to, width, height) {
                                root.draw(&PathElement::new(
                                    vec![from, to],
                                    rgb(color).stroke_width(1),
                                ))?;
                            }
                        }
                    }
                    Mark::Dot {
                        center,
                        radius,
                        color,
                    } => {
                        let r = radius as i32;
                        let (x, y) = center;
                        if x + r < 0 || y + r < 0 || x - r >= width || y - r >= height {
                            continue;
                        }
                        if x - r >= 0 && y - r >= 0 && x + r < width && y + r < height {
                            root.draw(&Circle::new(center, radius, rgb(color).filled()))?;
                        } else {
                            edge_dots.push((center, r, color));
                        }
                    }
                }
            }
            root.present()?;
        }
        for ((cx, cy), r, color) in edge_dots {
            for y in (cy - r).max(0)..=(cy + r).min(height - 1) {
                for x in (cx - r).max(0)..=(cx + r).min(width - 1) {
                    if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                        self.pixels
                            .slice_mut(s![y as usize, x as usize, ..])
                            .assign(&ArrayView1::from(&color[..]));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn to_image(&self) -> Result<RgbImage, AnalysisError> {
        let raw = self.pixels.iter().copied().collect();
        RgbImage::from_raw(self.width() as u32, self.height() as u32, raw)
            .ok_or_else(|| AnalysisError::Plot("failed to allocate image buffer".into()))
    }

    pub fn to_png(&self) -> Result<Vec<u8>, AnalysisError> {
        let mut output = Vec::new();
        DynamicImage::ImageRgb8(self.to_image()?)
            .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
        Ok(output)
    }
}

/// Liang-Barsky clip of a segment to the pixel grid `[0, width) x [0, height)`.
fn clip_segment(
    from: (i32, i32),
    to: (i32, i32),
    width: i32,
    height: i32,
) -> Option<((i32, i32), (i32, i32))> {
    let (x0, y0) = (f64::from(from.0), f64::from(from.1));
    let (dx, dy) = (f64::from(to.0) - x0, f64::from(to.1) - y0);
    let (x_max, y_max) = (f64::from(width - 1), f64::from(height - 1));
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [(-dx, x0), (dx, x_max - x0), (-dy, y0), (dy, y_max - y0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    let at = |t: f64| ((x0 + t * dx).round() as i32, (y0 + t * dy).round() as i32);
    Some((at(t0), at(t1)))
}

fn rgb(color: Rgb) -> RGBColor {
    RGBColor(color[0], color[1], color[2])
}

/// Row for a normalized level: 1.0 maps to the top, 0.0 to the bottom edge.
pub fn level_to_y(level: f64, amplitude: usize) -> i32 {
    (amplitude as f64 - level * amplitude as f64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE_PX: Rgb = [255, 255, 255];

    #[test]
    fn shifting_moves_columns_and_blanks_the_edge() {
        let mut canvas = Canvas::new(4, 6);
        canvas
            .draw(&[Mark::Segment {
                from: (5, 0),
                to: (5, 3),
                color: WHITE_PX,
            }])
            .unwrap();
        assert_eq!(canvas.lit_in_column(5), 4);
        canvas.shift_left(2).unwrap();
        assert_eq!(canvas.lit_in_column(3), 4);
        assert_eq!(canvas.lit_in_column(5), 0);
        assert_eq!(canvas.pixel(3, 1), Some(WHITE_PX));
        canvas.shift_left(10).unwrap();
        assert_eq!(canvas, Canvas::new(4, 6));
    }

    #[test]
    fn marks_outside_the_canvas_are_clipped() {
        let mut canvas = Canvas::new(10, 10);
        canvas
            .draw(&[
                Mark::Dot {
                    center: (-40, 5),
                    radius: 2,
                    color: WHITE_PX,
                },
                Mark::Outline {
                    top_left: (2, 2),
                    bottom_right: (7, 7),
                    color: [255, 0, 0],
                },
            ])
            .unwrap();
        assert_eq!(canvas.pixel(2, 4), Some([255, 0, 0]));
        assert_eq!(canvas.pixel(4, 4), Some([0, 0, 0]));
        assert_eq!(canvas.lit_in_column(0), 0);
    }

    #[test]
    fn segments_crossing_the_edge_keep_their_inside_part() {
        let mut canvas = Canvas::new(10, 10);
        canvas
            .draw(&[
                Mark::Segment {
                    from: (-10, 5),
                    to: (4, 5),
                    color: WHITE_PX,
                },
                Mark::Segment {
                    from: (-9, 0),
                    to: (-3, 9),
                    color: WHITE_PX,
                },
            ])
            .unwrap();
        for x in 0..=4 {
            assert_eq!(canvas.pixel(x, 5), Some(WHITE_PX));
        }
        assert_eq!(canvas.pixel(5, 5), Some([0, 0, 0]));
        assert_eq!(canvas.lit_in_column(0), 1);
    }

    #[test]
    fn dots_on_the_border_are_cut_not_smeared() {
        let mut canvas = Canvas::new(10, 10);
        canvas
            .draw(&[Mark::Dot {
                center: (-1, 5),
                radius: 2,
                color: WHITE_PX,
            }])
            .unwrap();
        // Only the disc's own pixels in column 0 (dy in -1..=1) and column 1 (dy 0).
        assert_eq!(canvas.lit_in_column(0), 3);
        assert_eq!(canvas.lit_in_column(1), 1);
        assert_eq!(canvas.lit_in_column(2), 0);
    }

    #[test]
    fn png_export_round_trips_dimensions() {
        let canvas = Canvas::new(20, 30);
        let png = canvas.to_png().unwrap();
        assert!(!png.is_empty());
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (30, 20));
    }

    #[test]
    fn levels_map_top_to_bottom() {
        assert_eq!(level_to_y(1.0, 400), 0);
        assert_eq!(level_to_y(0.0, 400), 400);
        assert_eq!(level_to_y(0.5, 200), 100);
    }
}
