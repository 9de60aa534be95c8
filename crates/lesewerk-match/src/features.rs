// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ORB feature extraction — FAST-9 corners on a scale pyramid, ranked by
// Harris response, oriented by intensity centroid, described by a 256-bit
// rotated BRIEF test pattern.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::corners::{Corner, corners_fast9};
use imageproc::definitions::Image;
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use lesewerk_core::TemplateMatchConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Bits per descriptor.
pub const DESCRIPTOR_BITS: usize = 256;

/// Bytes per descriptor.
pub const DESCRIPTOR_BYTES: usize = DESCRIPTOR_BITS / 8;

/// A binary feature descriptor.
pub type Descriptor = [u8; DESCRIPTOR_BYTES];

/// Half-width of the square the BRIEF test points are drawn from.
const PATTERN_EXTENT: i32 = 13;

/// Fixed seed so every extractor uses the same test pattern.
const PATTERN_SEED: u64 = 0x0_2b_5e_ed;

/// Side of the Harris window.
const HARRIS_BLOCK: i32 = 7;
const HARRIS_K: f64 = 0.04;

/// Smoothing applied before the binary tests.
const DESCRIPTOR_BLUR_SIGMA: f32 = 2.0;

/// A detected feature in full-resolution image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub x: f32,
    pub y: f32,
    /// Diameter of the described patch, in full-resolution pixels.
    pub size: f32,
    /// Orientation in degrees, `[0, 360)`.
    pub angle: f32,
    pub response: f32,
    /// Pyramid level the point was found on.
    pub octave: i32,
    pub class_id: i32,
}

/// Keypoints and their descriptors, index-aligned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Keypoint centres as `(x, y)` pairs.
    pub fn point(&self, index: usize) -> (f64, f64) {
        let kp = &self.keypoints[index];
        (kp.x as f64, kp.y as f64)
    }
}

/// Number of differing bits between two descriptors.
pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// ORB detector and descriptor.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: TemplateMatchConfig,
    pattern: Vec<[i32; 4]>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(&TemplateMatchConfig::default())
    }
}

impl FeatureExtractor {
    pub fn new(config: &TemplateMatchConfig) -> Self {
        Self {
            config: config.normalized(),
            pattern: sampling_pattern(),
        }
    }

    /// Detect and describe up to `n_features` keypoints in `image`.
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn extract(&self, image: &GrayImage) -> FeatureSet {
        let cfg = &self.config;
        let quotas = level_quotas(cfg.n_features as usize, cfg.scale_factor, cfg.n_levels);
        let border = cfg.edge_threshold.max(cfg.patch_size / 2 + 1);

        let mut found: Vec<(KeyPoint, Descriptor)> = Vec::new();
        for (level, &quota) in quotas.iter().enumerate() {
            let scale = cfg.scale_factor.powi(level as i32 - cfg.first_level as i32);
            let width = (image.width() as f64 / scale).round() as u32;
            let height = (image.height() as f64 / scale).round() as u32;
            if width <= 2 * border || height <= 2 * border {
                break;
            }

            let level_image = if (scale - 1.0).abs() < 1e-9 {
                image.clone()
            } else {
                imageops::resize(image, width, height, FilterType::Triangle)
            };
            let level_features = self.extract_level(&level_image, level as i32, scale, quota, border);
            debug!(level, scale, count = level_features.len(), "Pyramid level processed");
            found.extend(level_features);
        }

        if found.len() > cfg.n_features as usize {
            found.sort_by(|a, b| b.0.response.total_cmp(&a.0.response));
            found.truncate(cfg.n_features as usize);
        }

        let (keypoints, descriptors): (Vec<_>, Vec<_>) = found.into_iter().unzip();
        debug!(keypoints = keypoints.len(), "ORB extraction complete");
        FeatureSet {
            keypoints,
            descriptors,
        }
    }

    fn extract_level(
        &self,
        image: &GrayImage,
        level: i32,
        scale: f64,
        quota: usize,
        border: u32,
    ) -> Vec<(KeyPoint, Descriptor)> {
        if quota == 0 {
            return Vec::new();
        }
        let (w, h) = image.dimensions();

        let corners = suppress_non_maximum(&corners_fast9(image, self.config.fast_threshold), w, h);
        let gx = horizontal_sobel(image);
        let gy = vertical_sobel(image);

        let mut scored: Vec<(u32, u32, f32)> = corners
            .into_iter()
            .filter(|c| c.x >= border && c.y >= border && c.x < w - border && c.y < h - border)
            .map(|c| (c.x, c.y, harris_response(&gx, &gy, c.x, c.y)))
            .collect();
        scored.sort_by(|a, b| b.2.total_cmp(&a.2));
        scored.truncate(quota);

        let blurred = gaussian_blur_f32(image, DESCRIPTOR_BLUR_SIGMA);
        let radius = (self.config.patch_size / 2) as i32;

        scored
            .into_iter()
            .map(|(x, y, response)| {
                let angle = intensity_centroid_angle(image, x as i32, y as i32, radius);
                let descriptor = self.describe(&blurred, x as i32, y as i32, angle);
                let keypoint = KeyPoint {
                    x: (x as f64 * scale) as f32,
                    y: (y as f64 * scale) as f32,
                    size: (self.config.patch_size as f64 * scale) as f32,
                    angle: angle as f32,
                    response,
                    octave: level,
                    class_id: -1,
                };
                (keypoint, descriptor)
            })
            .collect()
    }

    /// Rotated BRIEF: bit `i` is set when the first point of test `i` is
    /// darker than the second, after rotating both by `angle`.
    fn describe(&self, blurred: &GrayImage, x: i32, y: i32, angle: f64) -> Descriptor {
        let (sin, cos) = angle.to_radians().sin_cos();
        let rotate = |px: i32, py: i32| {
            let rx = (cos * px as f64 - sin * py as f64).round() as i32;
            let ry = (sin * px as f64 + cos * py as f64).round() as i32;
            clamped(blurred, x + rx, y + ry)
        };

        let mut descriptor = [0u8; DESCRIPTOR_BYTES];
        for (i, &[x1, y1, x2, y2]) in self.pattern.iter().enumerate() {
            if rotate(x1, y1) < rotate(x2, y2) {
                descriptor[i / 8] |= 1 << (i % 8);
            }
        }
        descriptor
    }
}

/// Geometric split of `total` features over the pyramid levels.
fn level_quotas(total: usize, scale_factor: f64, levels: u32) -> Vec<usize> {
    let levels = levels.max(1) as usize;
    let factor = 1.0 / scale_factor;
    let first = if (factor - 1.0).abs() < 1e-9 {
        total as f64 / levels as f64
    } else {
        total as f64 * (1.0 - factor) / (1.0 - factor.powi(levels as i32))
    };

    let mut quotas = Vec::with_capacity(levels);
    let mut assigned = 0usize;
    let mut desired = first;
    for _ in 0..levels - 1 {
        let quota = (desired.round() as usize).min(total - assigned);
        quotas.push(quota);
        assigned += quota;
        desired *= factor;
    }
    quotas.push(total - assigned);
    quotas
}

/// The 256 point-pair tests, each `[x1, y1, x2, y2]` relative to the
/// keypoint.
fn sampling_pattern() -> Vec<[i32; 4]> {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let mut coord = || rng.gen_range(-PATTERN_EXTENT..=PATTERN_EXTENT);
    (0..DESCRIPTOR_BITS)
        .map(|_| [coord(), coord(), coord(), coord()])
        .collect()
}

/// Keep corners whose FAST score is a strict local maximum in their 3x3
/// neighbourhood (ties go to the first corner in raster order).
fn suppress_non_maximum(corners: &[Corner], width: u32, height: u32) -> Vec<Corner> {
    let mut scores = vec![f32::NEG_INFINITY; width as usize * height as usize];
    for c in corners {
        scores[c.y as usize * width as usize + c.x as usize] = c.score;
    }

    corners
        .iter()
        .filter(|c| {
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = c.x as i64 + dx;
                    let ny = c.y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let neighbour = scores[ny as usize * width as usize + nx as usize];
                    let earlier = dy < 0 || (dy == 0 && dx < 0);
                    if neighbour > c.score || (earlier && neighbour == c.score) {
                        return false;
                    }
                }
            }
            true
        })
        .copied()
        .collect()
}

/// Harris corner measure over a `HARRIS_BLOCK` window of Sobel gradients.
fn harris_response(gx: &Image<Luma<i16>>, gy: &Image<Luma<i16>>, x: u32, y: u32) -> f32 {
    let (w, h) = gx.dimensions();
    let half = HARRIS_BLOCK / 2;
    let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);
    for dy in -half..=half {
        for dx in -half..=half {
            let px = (x as i32 + dx).clamp(0, w as i32 - 1) as u32;
            let py = (y as i32 + dy).clamp(0, h as i32 - 1) as u32;
            let ix = gx.get_pixel(px, py).0[0] as f64;
            let iy = gy.get_pixel(px, py).0[0] as f64;
            sxx += ix * ix;
            syy += iy * iy;
            sxy += ix * iy;
        }
    }
    let trace = sxx + syy;
    (sxx * syy - sxy * sxy - HARRIS_K * trace * trace) as f32
}

/// Orientation of the vector from the keypoint to the intensity centroid of
/// its circular patch, in degrees `[0, 360)`.
fn intensity_centroid_angle(image: &GrayImage, x: i32, y: i32, radius: i32) -> f64 {
    let (mut m10, mut m01) = (0.0f64, 0.0f64);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let value = clamped(image, x + dx, y + dy) as f64;
            m10 += dx as f64 * value;
            m01 += dy as f64 * value;
        }
    }
    let angle = m01.atan2(m10).to_degrees();
    if angle < 0.0 { angle + 360.0 } else { angle }
}

fn clamped(image: &GrayImage, x: i32, y: i32) -> u8 {
    let px = x.clamp(0, image.width() as i32 - 1) as u32;
    let py = y.clamp(0, image.height() as i32 - 1) as u32;
    image.get_pixel(px, py).0[0]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Deterministic blocky texture: 12px cells of random gray levels.
    pub(crate) fn textured(width: u32, height: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let cells_x = width.div_ceil(12);
        let cells_y = height.div_ceil(12);
        let levels: Vec<u8> = (0..cells_x * cells_y)
            .map(|_| rng.gen_range(0..=255u8))
            .collect();
        GrayImage::from_fn(width, height, |x, y| {
            Luma([levels[((y / 12) * cells_x + x / 12) as usize]])
        })
    }

    #[test]
    fn hamming_counts_bits() {
        let a = [0u8; DESCRIPTOR_BYTES];
        let mut b = [0u8; DESCRIPTOR_BYTES];
        assert_eq!(hamming_distance(&a, &b), 0);
        b[0] = 0b1011;
        b[31] = 0xFF;
        assert_eq!(hamming_distance(&a, &b), 11);
    }

    #[test]
    fn quotas_sum_to_total() {
        let quotas = level_quotas(1000, 1.2, 8);
        assert_eq!(quotas.len(), 8);
        assert_eq!(quotas.iter().sum::<usize>(), 1000);
        assert!(quotas[0] > quotas[7]);
    }

    #[test]
    fn pattern_is_stable_and_bounded() {
        let a = sampling_pattern();
        let b = sampling_pattern();
        assert_eq!(a, b);
        assert_eq!(a.len(), DESCRIPTOR_BITS);
        assert!(a.iter().flatten().all(|v| v.abs() <= PATTERN_EXTENT));
    }

    #[test]
    fn blank_image_has_no_features() {
        let img = GrayImage::from_pixel(200, 200, Luma([128u8]));
        assert!(FeatureExtractor::default().extract(&img).is_empty());
    }

    #[test]
    fn textured_image_yields_aligned_features() {
        let features = FeatureExtractor::default().extract(&textured(320, 240, 7));
        assert!(features.len() > 50, "only {} keypoints", features.len());
        assert_eq!(features.keypoints.len(), features.descriptors.len());
        assert!(features.len() <= 1000);
        for kp in &features.keypoints {
            assert!((0.0..360.0).contains(&kp.angle));
            assert_eq!(kp.class_id, -1);
            assert!(kp.x >= 0.0 && kp.x < 320.0);
        }
    }

    #[test]
    fn feature_cap_is_respected() {
        let config = TemplateMatchConfig {
            n_features: 40,
            ..TemplateMatchConfig::default()
        };
        let features = FeatureExtractor::new(&config).extract(&textured(320, 240, 3));
        assert!(features.len() <= 40);
    }

    #[test]
    fn extraction_is_deterministic() {
        let img = textured(200, 200, 11);
        let extractor = FeatureExtractor::default();
        assert_eq!(extractor.extract(&img), extractor.extract(&img));
    }
}
