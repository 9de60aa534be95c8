// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Skew estimation — Canny edges, a Hough transform restricted to
// near-horizontal lines, and the median angle of the strongest lines.

use image::GrayImage;
use imageproc::edges::canny;
use tracing::{debug, instrument};

/// Angular resolution of the Hough accumulator, in degrees.
const ANGLE_STEP_DEG: f64 = 0.1;

/// Upper bound on the number of lines fed into the median.
const MAX_LINES: usize = 64;

/// Edge points this close to an accepted line belong to it.
const LINE_TOLERANCE_PX: f64 = 2.0;

/// Canny hysteresis thresholds.
const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;

/// A detected straight line: skew angle in degrees (positive = descending to
/// the right in image coordinates) and its vote count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewLine {
    pub angle: f64,
    pub votes: u32,
}

/// Estimate the document skew angle in degrees.
///
/// Only lines with `|angle| < max_angle` are considered. Returns the median
/// angle of the strongest lines, or `0.0` when none qualify.
#[instrument(skip(gray), fields(width = gray.width(), height = gray.height()))]
pub fn estimate_skew_angle(gray: &GrayImage, max_angle: f64) -> f64 {
    if max_angle <= 0.0 {
        return 0.0;
    }

    let edges = canny(gray, CANNY_LOW, CANNY_HIGH);
    let mut angles: Vec<f64> = detect_near_horizontal_lines(&edges, max_angle)
        .into_iter()
        .map(|line| line.angle)
        .filter(|angle| angle.abs() < max_angle)
        .collect();

    if angles.is_empty() {
        debug!("No near-horizontal lines found; assuming no skew");
        return 0.0;
    }

    let angle = median(&mut angles);
    debug!(line_count = angles.len(), angle, "Skew angle estimated");
    angle
}

/// Hough transform over line normals within `max_angle` of vertical, i.e.
/// lines within `max_angle` of horizontal.
///
/// A line with normal angle `theta` satisfies `x cos(theta) + y sin(theta) = r`;
/// its skew is `theta - 90°`. Lines are taken greedily from the strongest
/// accumulator cell; once a line is accepted its edge points withdraw their
/// votes, so the spread of one line over neighbouring angles never yields a
/// second line.
pub fn detect_near_horizontal_lines(edges: &GrayImage, max_angle: f64) -> Vec<SkewLine> {
    let (w, h) = edges.dimensions();
    let points: Vec<(f64, f64)> = edges
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] > 0)
        .map(|(x, y, _)| (x as f64, y as f64))
        .collect();
    if points.is_empty() {
        return Vec::new();
    }

    let steps = (max_angle / ANGLE_STEP_DEG).ceil() as i64;
    let thetas: Vec<(f64, f64, f64)> = (-steps..=steps)
        .map(|i| {
            let skew = i as f64 * ANGLE_STEP_DEG;
            let (sin, cos) = (90.0 + skew).to_radians().sin_cos();
            (skew, cos, sin)
        })
        .collect();

    let diagonal = ((w as f64).powi(2) + (h as f64).powi(2)).sqrt().ceil() as i64;
    let rho_bins = (2 * diagonal + 1) as usize;
    let cell = |t: usize, x: f64, y: f64| {
        let (_, cos, sin) = thetas[t];
        t * rho_bins + ((x * cos + y * sin).round() as i64 + diagonal) as usize
    };

    let mut accumulator = vec![0u32; thetas.len() * rho_bins];
    for &(x, y) in &points {
        for t in 0..thetas.len() {
            accumulator[cell(t, x, y)] += 1;
        }
    }

    // A line must span at least a tenth of the page width to count.
    let vote_threshold = ((w as f64 * 0.1).max(30.0)) as u32;
    let mut alive = vec![true; points.len()];
    let mut lines = Vec::new();

    while lines.len() < MAX_LINES {
        let (best, votes) = accumulator
            .iter()
            .enumerate()
            .fold((0, 0u32), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        if votes < vote_threshold {
            break;
        }

        let (skew, cos, sin) = thetas[best / rho_bins];
        let rho = (best % rho_bins) as f64 - diagonal as f64;
        for (i, &(x, y)) in points.iter().enumerate() {
            if !alive[i] || (x * cos + y * sin - rho).abs() > LINE_TOLERANCE_PX {
                continue;
            }
            alive[i] = false;
            for t in 0..thetas.len() {
                accumulator[cell(t, x, y)] -= 1;
            }
        }

        lines.push(SkewLine { angle: skew, votes });
    }

    lines
}

/// Median of a non-empty slice (mean of the middle pair for even lengths).
fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// White page with three thick dark bars sloping at `degrees`.
    fn slanted_bars(degrees: f64) -> GrayImage {
        let mut img = GrayImage::from_pixel(400, 300, Luma([255u8]));
        let slope = degrees.to_radians().tan();
        for y0 in [60.0, 130.0, 200.0] {
            for x in 20..380u32 {
                let yc = y0 + (x as f64 - 20.0) * slope;
                for t in 0..6 {
                    let y = (yc + t as f64).round() as i64;
                    if (0..300).contains(&y) {
                        img.put_pixel(x, y as u32, Luma([0u8]));
                    }
                }
            }
        }
        img
    }

    /// White page with three rows of word-sized blocks sloping at `degrees`.
    fn sparse_text_page(degrees: f64) -> GrayImage {
        let mut img = GrayImage::from_pixel(400, 300, Luma([255u8]));
        let slope = degrees.to_radians().tan();
        for y0 in [80.0, 140.0, 200.0] {
            for word in 0..7u32 {
                let start = 20 + word * 52;
                for x in start..start + 40 {
                    let yc = y0 + (x as f64 - 20.0) * slope;
                    for t in 0..10 {
                        let y = (yc + t as f64).round() as i64;
                        if (0..300).contains(&y) {
                            img.put_pixel(x, y as u32, Luma([0u8]));
                        }
                    }
                }
            }
        }
        img
    }

    #[test]
    fn blank_page_has_no_skew() {
        let img = GrayImage::from_pixel(200, 200, Luma([240u8]));
        assert_eq!(estimate_skew_angle(&img, 15.0), 0.0);
    }

    #[test]
    fn level_bars_have_no_skew() {
        let angle = estimate_skew_angle(&slanted_bars(0.0), 15.0);
        assert!(angle.abs() < 0.5, "expected ~0, got {angle}");
    }

    #[test]
    fn detects_positive_skew() {
        let angle = estimate_skew_angle(&slanted_bars(5.0), 15.0);
        assert!((angle - 5.0).abs() < 1.0, "expected ~5, got {angle}");
    }

    #[test]
    fn detects_negative_skew() {
        let angle = estimate_skew_angle(&slanted_bars(-3.0), 15.0);
        assert!((angle + 3.0).abs() < 1.0, "expected ~-3, got {angle}");
    }

    #[test]
    fn each_edge_is_reported_once() {
        let lines = detect_near_horizontal_lines(&canny(&slanted_bars(0.0), CANNY_LOW, CANNY_HIGH), 15.0);
        // Three bars, each with a top and a bottom edge.
        assert!(!lines.is_empty() && lines.len() <= 6, "got {} lines", lines.len());
        assert!(lines.iter().all(|l| l.angle.abs() < 0.2), "{lines:?}");
    }

    #[test]
    fn sparse_level_text_has_no_skew() {
        let angle = estimate_skew_angle(&sparse_text_page(0.0), 15.0);
        assert!(angle.abs() < 0.5, "expected ~0, got {angle}");
    }

    #[test]
    fn sparse_skewed_text_is_measured() {
        let angle = estimate_skew_angle(&sparse_text_page(3.0), 15.0);
        assert!((angle - 3.0).abs() < 0.5, "expected ~3, got {angle}");
    }

    #[test]
    fn lines_outside_window_are_ignored() {
        // A 5° skew is invisible when only ±2° is searched.
        let angle = estimate_skew_angle(&slanted_bars(5.0), 2.0);
        assert!(angle.abs() < 2.0);
    }

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
