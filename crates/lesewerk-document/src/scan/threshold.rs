// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Thresholding primitives — Otsu global threshold and Gaussian-weighted
// adaptive threshold. Every output pixel is exactly 0 or 255.

use image::{GrayImage, Luma};
use imageproc::contrast::{ThresholdType, otsu_level, threshold};
use imageproc::filter::gaussian_blur_f32;
use lesewerk_core::error::{LesewerkError, Result};
use tracing::debug;

/// Gaussian sigma implied by a kernel size when none is given explicitly.
pub fn sigma_for_kernel(kernel_size: u32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Global Otsu binarization. Pixels brighter than the Otsu level become 255,
/// the rest 0; with `inverted` the mapping is swapped, turning dark ink into
/// foreground.
pub fn otsu_binarize(gray: &GrayImage, inverted: bool) -> GrayImage {
    let level = otsu_level(gray);
    debug!(level, inverted, "Otsu threshold computed");
    let kind = if inverted {
        ThresholdType::BinaryInverted
    } else {
        ThresholdType::Binary
    };
    threshold(gray, level, kind)
}

/// Adaptive threshold against a Gaussian-weighted local mean.
///
/// A pixel becomes 255 when it is brighter than the weighted mean of its
/// `block_size` neighbourhood minus `constant`, otherwise 0.
///
/// # Errors
///
/// Returns a recoverable [`LesewerkError::StageFailure`] when the block is
/// smaller than 3 or larger than the image; callers fall back to Otsu.
pub fn adaptive_gaussian_threshold(
    gray: &GrayImage,
    block_size: u32,
    constant: f64,
) -> Result<GrayImage> {
    let (w, h) = gray.dimensions();
    if block_size < 3 || block_size % 2 == 0 {
        return Err(LesewerkError::stage(
            "adaptive threshold",
            format!("block size {} must be odd and at least 3", block_size),
        ));
    }
    if w < block_size || h < block_size {
        return Err(LesewerkError::stage(
            "adaptive threshold",
            format!("block size {} exceeds image {}x{}", block_size, w, h),
        ));
    }

    let sigma = sigma_for_kernel(block_size);
    let local_mean = gaussian_blur_f32(gray, sigma);
    debug!(block_size, sigma, constant, "Gaussian local mean computed");

    Ok(GrayImage::from_fn(w, h, |x, y| {
        let value = gray.get_pixel(x, y).0[0] as f64;
        let mean = local_mean.get_pixel(x, y).0[0] as f64;
        if value > mean - constant {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn half_and_half(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, _| {
            if x < width / 2 { Luma([0u8]) } else { Luma([255u8]) }
        })
    }

    #[test]
    fn otsu_separates_two_inks() {
        let img = GrayImage::from_fn(20, 20, |x, _| {
            if x < 10 { Luma([40u8]) } else { Luma([210u8]) }
        });
        let out = otsu_binarize(&img, false);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(19, 0).0[0], 255);
    }

    #[test]
    fn inverted_otsu_swaps_polarity() {
        let img = half_and_half(10, 4);
        let inverted = otsu_binarize(&img, true);
        assert_eq!(inverted.get_pixel(0, 0).0[0], 255);
        assert_eq!(inverted.get_pixel(9, 0).0[0], 0);
    }

    #[test]
    fn adaptive_output_is_strictly_binary() {
        let img = half_and_half(50, 50);
        let out = adaptive_gaussian_threshold(&img, 11, 2.0).unwrap();
        let mut values: Vec<u8> = out.pixels().map(|p| p.0[0]).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values, vec![0, 255]);
    }

    #[test]
    fn adaptive_rejects_block_larger_than_image() {
        let img = half_and_half(8, 8);
        let err = adaptive_gaussian_threshold(&img, 11, 2.0).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn kernel_three_gives_opencv_sigma() {
        assert!((sigma_for_kernel(3) - 0.8).abs() < 1e-6);
        assert!((sigma_for_kernel(11) - 2.0).abs() < 1e-6);
    }
}
