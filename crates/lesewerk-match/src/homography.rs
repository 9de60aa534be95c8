// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Planar homography estimation — normalised DLT fitted by least squares,
// wrapped in RANSAC with an adaptive iteration bound.

use lesewerk_core::{BoundingBox, TemplateMatchConfig};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use tracing::{debug, instrument};

type Matrix3 = [[f64; 3]; 3];

/// Points needed for a minimal homography fit.
pub const MIN_CORRESPONDENCES: usize = 4;

const RANSAC_SEED: u64 = 0x4c57_5253;

/// Smallest triangle area (px²) a sample may span before it counts as
/// collinear.
const COLLINEAR_EPS: f64 = 1e-3;

const PIVOT_EPS: f64 = 1e-12;

/// A 3x3 projective transform acting on `(x, y, 1)` column vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(Matrix3);

impl Homography {
    pub fn identity() -> Self {
        Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self([[1.0, 0.0, tx], [0.0, 1.0, ty], [0.0, 0.0, 1.0]])
    }

    pub fn from_matrix(matrix: Matrix3) -> Self {
        Self(matrix)
    }

    pub fn matrix(&self) -> Matrix3 {
        self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().flatten().all(|v| v.is_finite())
    }

    /// Map a point. `None` when it lands on the line at infinity.
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let m = &self.0;
        let w = m[2][0] * x + m[2][1] * y + m[2][2];
        if w.abs() < PIVOT_EPS {
            return None;
        }
        let u = (m[0][0] * x + m[0][1] * y + m[0][2]) / w;
        let v = (m[1][0] * x + m[1][1] * y + m[1][2]) / w;
        (u.is_finite() && v.is_finite()).then_some((u, v))
    }
}

/// RANSAC settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RansacParams {
    /// Maximum reprojection error, in pixels, for a correspondence to count
    /// as an inlier.
    pub reproj_threshold: f64,
    pub max_iters: u32,
    pub confidence: f64,
}

impl From<&TemplateMatchConfig> for RansacParams {
    fn from(config: &TemplateMatchConfig) -> Self {
        Self {
            reproj_threshold: config.ransac_reproj_threshold,
            max_iters: config.ransac_max_iters,
            confidence: config.ransac_confidence,
        }
    }
}

/// Best model found by [`find_homography`] and which correspondences agree
/// with it.
#[derive(Debug, Clone, PartialEq)]
pub struct RansacEstimate {
    pub homography: Homography,
    pub inlier_mask: Vec<bool>,
}

impl RansacEstimate {
    pub fn inlier_count(&self) -> usize {
        self.inlier_mask.iter().filter(|inlier| **inlier).count()
    }
}

/// Robustly estimate the homography taking `src[i]` to `dst[i]`.
///
/// Returns `None` with fewer than four correspondences or when no
/// non-degenerate sample yields a model.
#[instrument(skip_all, fields(points = src.len()))]
pub fn find_homography(
    src: &[(f64, f64)],
    dst: &[(f64, f64)],
    params: &RansacParams,
) -> Option<RansacEstimate> {
    let n = src.len().min(dst.len());
    if n < MIN_CORRESPONDENCES {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(RANSAC_SEED);
    let threshold_sq = params.reproj_threshold * params.reproj_threshold;
    let max_iters = params.max_iters.max(1) as usize;

    let mut best: Option<(Homography, Vec<bool>, usize)> = None;
    let mut needed = max_iters;
    let mut iteration = 0;

    while iteration < needed {
        iteration += 1;

        let picks = index::sample(&mut rng, n, MIN_CORRESPONDENCES);
        let sample_src: Vec<(f64, f64)> = picks.iter().map(|i| src[i]).collect();
        let sample_dst: Vec<(f64, f64)> = picks.iter().map(|i| dst[i]).collect();
        if has_collinear_triple(&sample_src) || has_collinear_triple(&sample_dst) {
            continue;
        }

        let Some(model) = fit_homography(&sample_src, &sample_dst) else {
            continue;
        };
        let mask = inlier_mask(&model, &src[..n], &dst[..n], threshold_sq);
        let count = mask.iter().filter(|m| **m).count();

        if best.as_ref().is_none_or(|(_, _, best_count)| count > *best_count) {
            needed = adaptive_iterations(count, n, params.confidence, max_iters);
            best = Some((model, mask, count));
        }
    }

    let (model, mask, count) = best?;
    if count < MIN_CORRESPONDENCES {
        debug!(count, "Best model has too few inliers");
        return None;
    }

    // Refit on the consensus set; keep the refit only if it does not lose support.
    let (inlier_src, inlier_dst): (Vec<_>, Vec<_>) = mask
        .iter()
        .enumerate()
        .filter(|(_, inlier)| **inlier)
        .map(|(i, _)| (src[i], dst[i]))
        .unzip();

    let (homography, inlier_mask) = match fit_homography(&inlier_src, &inlier_dst) {
        Some(refined) if refined.is_finite() => {
            let refined_mask = inlier_mask(&refined, &src[..n], &dst[..n], threshold_sq);
            if refined_mask.iter().filter(|m| **m).count() >= count {
                (refined, refined_mask)
            } else {
                (model, mask)
            }
        }
        _ => (model, mask),
    };

    let estimate = RansacEstimate {
        homography,
        inlier_mask,
    };
    debug!(iterations = iteration, inliers = estimate.inlier_count(), "RANSAC converged");
    Some(estimate)
}

/// Least-squares homography through all correspondences (at least four),
/// with Hartley normalisation of both point sets.
pub fn fit_homography(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Homography> {
    if src.len() < MIN_CORRESPONDENCES || src.len() != dst.len() {
        return None;
    }
    let t_src = normalizer(src)?;
    let t_dst = normalizer(dst)?;

    // Unknowns h0..h7 with h8 = 1:
    //   u = (h0 x + h1 y + h2) / (h6 x + h7 y + 1)
    //   v = (h3 x + h4 y + h5) / (h6 x + h7 y + 1)
    let mut ata = [[0.0f64; 8]; 8];
    let mut atb = [0.0f64; 8];
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
        let (x, y) = project(&t_src, sx, sy);
        let (u, v) = project(&t_dst, dx, dy);
        let rows = [
            ([x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u], u),
            ([0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v], v),
        ];
        for (row, rhs) in rows {
            for i in 0..8 {
                atb[i] += row[i] * rhs;
                for j in 0..8 {
                    ata[i][j] += row[i] * row[j];
                }
            }
        }
    }

    let h = solve8(ata, atb)?;
    let normalized = [[h[0], h[1], h[2]], [h[3], h[4], h[5]], [h[6], h[7], 1.0]];
    let mut m = multiply(&multiply(&invert_normalizer(&t_dst), &normalized), &t_src);

    let scale = m[2][2];
    if scale.abs() > PIVOT_EPS {
        for value in m.iter_mut().flatten() {
            *value /= scale;
        }
    }

    let homography = Homography(m);
    homography.is_finite().then_some(homography)
}

/// Map a box through `homography` and take the axis-aligned bounds of its
/// four corners, clamped to a `width` x `height` image. Rotation is reset
/// to zero. Corners mapped to infinity are ignored; if all are, the result
/// is an empty box.
pub fn transform_bounding_box(
    bbox: &BoundingBox,
    homography: &Homography,
    width: u32,
    height: u32,
) -> BoundingBox {
    let corners = [
        (bbox.x, bbox.y),
        (bbox.x + bbox.width, bbox.y),
        (bbox.x + bbox.width, bbox.y + bbox.height),
        (bbox.x, bbox.y + bbox.height),
    ];
    let mapped: Vec<(f64, f64)> = corners
        .iter()
        .filter_map(|&(x, y)| homography.apply(x, y))
        .collect();
    if mapped.is_empty() {
        return BoundingBox::new(0.0, 0.0, 0.0, 0.0);
    }

    let min_x = mapped.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_x = mapped.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = mapped.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = mapped.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

    let x0 = min_x.clamp(0.0, width as f64);
    let y0 = min_y.clamp(0.0, height as f64);
    let x1 = max_x.clamp(0.0, width as f64);
    let y1 = max_y.clamp(0.0, height as f64);
    BoundingBox::new(x0, y0, x1 - x0, y1 - y0)
}

fn inlier_mask(
    model: &Homography,
    src: &[(f64, f64)],
    dst: &[(f64, f64)],
    threshold_sq: f64,
) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(&(x, y), &(u, v))| match model.apply(x, y) {
            Some((px, py)) => (px - u).powi(2) + (py - v).powi(2) <= threshold_sq,
            None => false,
        })
        .collect()
}

/// Iterations needed to draw an all-inlier sample with probability
/// `confidence`, given the current inlier ratio.
fn adaptive_iterations(inliers: usize, total: usize, confidence: f64, max_iters: usize) -> usize {
    let ratio = inliers as f64 / total as f64;
    let p_good = ratio.powi(MIN_CORRESPONDENCES as i32);
    if p_good >= 1.0 - f64::EPSILON {
        return 1;
    }
    if p_good <= f64::EPSILON {
        return max_iters;
    }
    let k = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if k.is_finite() {
        (k.ceil().max(1.0) as usize).min(max_iters)
    } else {
        max_iters
    }
}

fn has_collinear_triple(points: &[(f64, f64)]) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                let (a, b, c) = (points[i], points[j], points[k]);
                let cross = (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0);
                if cross.abs() < COLLINEAR_EPS {
                    return true;
                }
            }
        }
    }
    false
}

/// Similarity moving the centroid to the origin with mean distance √2.
fn normalizer(points: &[(f64, f64)]) -> Option<Matrix3> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < PIVOT_EPS {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some([[s, 0.0, -s * cx], [0.0, s, -s * cy], [0.0, 0.0, 1.0]])
}

fn invert_normalizer(t: &Matrix3) -> Matrix3 {
    let s = t[0][0];
    [
        [1.0 / s, 0.0, -t[0][2] / s],
        [0.0, 1.0 / s, -t[1][2] / s],
        [0.0, 0.0, 1.0],
    ]
}

fn project(t: &Matrix3, x: f64, y: f64) -> (f64, f64) {
    (t[0][0] * x + t[0][2], t[1][1] * y + t[1][2])
}

fn multiply(a: &Matrix3, b: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Gaussian elimination with partial pivoting on an 8x8 system.
fn solve8(mut a: [[f64; 8]; 8], mut b: [f64; 8]) -> Option<[f64; 8]> {
    for col in 0..8 {
        let pivot = (col..8).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < PIVOT_EPS {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..8 {
            let factor = a[row][col] / a[col][col];
            for k in col..8 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; 8];
    for row in (0..8).rev() {
        let tail: f64 = (row + 1..8).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
