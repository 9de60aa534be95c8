// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Noise reduction — Gaussian smoothing followed by an edge-preserving
// bilateral filter.

use image::GrayImage;
use imageproc::filter::{bilateral_filter as imageproc_bilateral, separable_filter_equal};
use lesewerk_core::config::MAX_BILATERAL_DIAMETER;
use tracing::debug;

use super::threshold::sigma_for_kernel;

/// Gaussian blur over a `kernel_size` window.
///
/// The kernel never extends past `kernel_size`, whatever the sigma. A
/// `sigma` of zero derives it from `kernel_size`; a 1-pixel kernel leaves
/// the image untouched. Borders replicate.
pub fn gaussian_smooth(gray: &GrayImage, kernel_size: u32, sigma: f64) -> GrayImage {
    if kernel_size <= 1 {
        return gray.clone();
    }
    let kernel_size = kernel_size | 1;
    let sigma = if sigma > 0.0 {
        sigma as f32
    } else {
        sigma_for_kernel(kernel_size)
    };
    debug!(kernel_size, sigma, "Gaussian smoothing");
    separable_filter_equal(gray, &gaussian_kernel(kernel_size, sigma))
}

/// Normalised 1-D Gaussian of odd length `size`.
fn gaussian_kernel(size: u32, sigma: f32) -> Vec<f32> {
    let half = (size / 2) as i32;
    let denom = 2.0 * sigma * sigma;
    let weights: Vec<f32> = (-half..=half)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let total: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Edge-preserving bilateral filter.
///
/// A non-positive `diameter` derives the window from `sigma_space`; either
/// way the window is odd and at most [`MAX_BILATERAL_DIAMETER`].
pub fn bilateral_filter(
    gray: &GrayImage,
    diameter: i32,
    sigma_color: f64,
    sigma_space: f64,
) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    let sigma_color = if sigma_color <= 0.0 { 1.0 } else { sigma_color };
    let sigma_space = if sigma_space <= 0.0 { 1.0 } else { sigma_space };
    let radius = if diameter <= 0 {
        (sigma_space * 1.5).round() as i32
    } else {
        diameter / 2
    }
    .clamp(1, MAX_BILATERAL_DIAMETER / 2);
    let window = (2 * radius + 1) as u32;

    debug!(window, sigma_color, sigma_space, "Bilateral filter");
    imageproc_bilateral(gray, window, sigma_color as f32, sigma_space as f32)
}
