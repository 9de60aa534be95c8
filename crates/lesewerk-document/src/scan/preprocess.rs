// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan preprocessing pipeline — load, resize, noise reduction, deskew, and
// adaptive binarization, turning a raw scan into an OCR-ready image.

use image::{DynamicImage, GrayImage};
use lesewerk_core::error::Result;
use lesewerk_core::{ImageSize, PreprocessingConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::denoise::{bilateral_filter, gaussian_smooth};
use super::skew;
use super::threshold::{adaptive_gaussian_threshold, otsu_binarize};
use crate::image::processor::ImageProcessor;

/// Skew angles smaller than this (degrees) are treated as no skew.
pub const MIN_DESKEW_ANGLE: f64 = 0.5;

/// A pipeline stage that changed the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessingStep {
    Resize,
    NoiseReduction,
    Deskew,
    Binarize,
}

impl PreprocessingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resize => "resize",
            Self::NoiseReduction => "noise_reduction",
            Self::Deskew => "deskew",
            Self::Binarize => "binarize",
        }
    }
}

impl std::fmt::Display for PreprocessingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of [`Preprocessor::preprocess`].
#[derive(Debug, Clone)]
pub struct PreprocessingResult {
    pub image: DynamicImage,
    pub original_size: ImageSize,
    /// Size after resizing, i.e. the coordinate space OCR boxes refer to
    /// before any deskew canvas growth.
    pub processed_size: ImageSize,
    pub deskew_angle: f64,
    /// Stages that changed the image, in the order they ran.
    pub steps_applied: Vec<PreprocessingStep>,
}

/// Deterministic raw-scan-to-OCR-input converter.
///
/// Only [`load`](Self::load) can fail; every later stage is best-effort and
/// recovers on its own (for example binarization falls back to Otsu).
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessingConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessingConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &PreprocessingConfig {
        &self.config
    }

    // -- Individual stages ----------------------------------------------------

    /// Decode PNG/JPEG bytes.
    ///
    /// # Errors
    ///
    /// Returns [`LesewerkError::Decode`](lesewerk_core::LesewerkError::Decode)
    /// when the bytes are not a raster image.
    pub fn load(data: &[u8]) -> Result<DynamicImage> {
        Ok(ImageProcessor::from_bytes(data)?.into_dynamic())
    }

    /// Downscale to fit within the bounds, preserving aspect ratio.
    ///
    /// Returns `(image, original_size, new_size)`; a no-op when the image
    /// already fits.
    pub fn resize(image: DynamicImage, max_width: u32, max_height: u32) -> (DynamicImage, ImageSize, ImageSize) {
        let processor = ImageProcessor::from_dynamic(image);
        let original = processor.size();
        let (processor, _) = processor.fit_within(max_width, max_height);
        let new_size = processor.size();
        (processor.into_dynamic(), original, new_size)
    }

    /// Gaussian blur then bilateral filter. Produces a grayscale image.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn reduce_noise(&self, image: &DynamicImage) -> DynamicImage {
        let gray = image.to_luma8();
        let smoothed = gaussian_smooth(
            &gray,
            self.config.gaussian_kernel_size,
            self.config.gaussian_sigma,
        );
        let filtered = bilateral_filter(
            &smoothed,
            self.config.bilateral_d,
            self.config.bilateral_sigma_color,
            self.config.bilateral_sigma_space,
        );
        debug!("Noise reduction complete");
        DynamicImage::ImageLuma8(filtered)
    }

    /// Estimate the skew of `image` in degrees (see [`skew::estimate_skew_angle`]).
    pub fn estimate_skew_angle(image: &DynamicImage, max_angle: f64) -> f64 {
        skew::estimate_skew_angle(&image.to_luma8(), max_angle)
    }

    /// Rotate `image` to remove skew.
    ///
    /// With `angle == None` the angle is estimated. Angles under
    /// [`MIN_DESKEW_ANGLE`] leave the image untouched and report `0.0`;
    /// larger ones are clamped to `±max_angle`. Returns the image and the
    /// angle actually applied.
    #[instrument(skip(image), fields(width = image.width(), height = image.height()))]
    pub fn deskew(image: DynamicImage, angle: Option<f64>, max_angle: f64) -> (DynamicImage, f64) {
        let max_angle = max_angle.abs();
        let angle = angle.unwrap_or_else(|| Self::estimate_skew_angle(&image, max_angle));

        if !angle.is_finite() || angle.abs() < MIN_DESKEW_ANGLE {
            debug!(angle, "Skew below threshold; leaving image unchanged");
            return (image, 0.0);
        }

        let applied = angle.clamp(-max_angle, max_angle);
        if applied != angle {
            warn!(angle, applied, "Skew angle clamped to configured maximum");
        }

        let rotated = ImageProcessor::from_dynamic(image)
            .rotate_expanded(applied)
            .into_dynamic();
        info!(applied, "Deskew applied");
        (rotated, applied)
    }

    /// Adaptive Gaussian binarization with an Otsu fallback. Output pixels
    /// are exactly 0 or 255.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn binarize(&self, image: &DynamicImage) -> GrayImage {
        let gray = image.to_luma8();
        match adaptive_gaussian_threshold(
            &gray,
            self.config.adaptive_block_size,
            self.config.adaptive_constant,
        ) {
            Ok(binary) => binary,
            Err(err) => {
                warn!(error = %err, "Adaptive threshold failed; falling back to Otsu");
                otsu_binarize(&gray, false)
            }
        }
    }

    // -- Full pipeline --------------------------------------------------------

    /// Run load → resize → [noise reduction] → [deskew] → [binarize].
    ///
    /// # Errors
    ///
    /// Fails only when `data` cannot be decoded.
    #[instrument(skip(self, data), fields(data_len = data.len()))]
    pub fn preprocess(&self, data: &[u8]) -> Result<PreprocessingResult> {
        let image = Self::load(data)?;
        Ok(self.preprocess_image(image))
    }

    /// Same as [`preprocess`](Self::preprocess) for an already decoded image.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn preprocess_image(&self, image: DynamicImage) -> PreprocessingResult {
        let config = &self.config;
        let mut steps_applied = Vec::new();

        let (mut image, original_size, processed_size) =
            Self::resize(image, config.max_width, config.max_height);
        if processed_size != original_size {
            steps_applied.push(PreprocessingStep::Resize);
        }

        if config.noise_reduction {
            image = self.reduce_noise(&image);
            steps_applied.push(PreprocessingStep::NoiseReduction);
        }

        let mut deskew_angle = 0.0;
        if config.deskew {
            let (rotated, applied) = Self::deskew(image, None, config.max_skew_angle);
            image = rotated;
            deskew_angle = applied;
            if applied != 0.0 {
                steps_applied.push(PreprocessingStep::Deskew);
            }
        }

        if config.binarize {
            image = DynamicImage::ImageLuma8(self.binarize(&image));
            steps_applied.push(PreprocessingStep::Binarize);
        }

        info!(
            original = %original_size,
            processed = %processed_size,
            deskew_angle,
            steps = steps_applied.len(),
            "Preprocessing complete"
        );

        PreprocessingResult {
            image,
            original_size,
            processed_size,
            deskew_angle,
            steps_applied,
        }
    }
}
