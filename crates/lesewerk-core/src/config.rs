// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline configuration. Invalid numeric settings are normalised rather than
// rejected; only unparseable files produce an error.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LesewerkError, Result};

/// Largest bilateral neighbourhood diameter, explicit or derived.
pub const MAX_BILATERAL_DIAMETER: i32 = 31;

/// Round an even value up to the next odd one.
pub fn make_odd(value: u32) -> u32 {
    if value % 2 == 0 { value + 1 } else { value }
}

/// Settings for turning a raw scan into an OCR-ready binary image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// Gaussian blur followed by a bilateral filter.
    pub noise_reduction: bool,
    /// Gaussian sigma; `0` derives it from the kernel size.
    pub gaussian_sigma: f64,
    /// Gaussian kernel size in pixels (forced odd).
    pub gaussian_kernel_size: u32,
    /// Bilateral neighbourhood diameter; `<= 0` derives it from `bilateral_sigma_space`.
    pub bilateral_d: i32,
    pub bilateral_sigma_color: f64,
    pub bilateral_sigma_space: f64,
    pub deskew: bool,
    /// Largest correction (degrees) deskew will apply in either direction.
    pub max_skew_angle: f64,
    pub binarize: bool,
    /// Adaptive threshold neighbourhood (forced odd, at least 3).
    pub adaptive_block_size: u32,
    /// Constant subtracted from the weighted local mean.
    pub adaptive_constant: f64,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            noise_reduction: true,
            gaussian_sigma: 0.0,
            gaussian_kernel_size: 3,
            bilateral_d: 9,
            bilateral_sigma_color: 75.0,
            bilateral_sigma_space: 75.0,
            deskew: true,
            max_skew_angle: 15.0,
            binarize: true,
            adaptive_block_size: 11,
            adaptive_constant: 2.0,
            max_width: 4000,
            max_height: 4000,
        }
    }
}

impl PreprocessingConfig {
    /// Return a copy with every numeric field forced into its valid range.
    pub fn normalized(&self) -> Self {
        Self {
            gaussian_sigma: self.gaussian_sigma.max(0.0),
            gaussian_kernel_size: make_odd(self.gaussian_kernel_size.max(1)),
            bilateral_d: self.bilateral_d.min(MAX_BILATERAL_DIAMETER),
            bilateral_sigma_color: self.bilateral_sigma_color.max(0.0),
            bilateral_sigma_space: self.bilateral_sigma_space.max(0.0),
            max_skew_angle: self.max_skew_angle.abs().min(45.0),
            adaptive_block_size: make_odd(self.adaptive_block_size.max(3)),
            max_width: self.max_width.max(1),
            max_height: self.max_height.max(1),
            ..self.clone()
        }
    }
}

/// Settings passed through to the recognition engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Engine language code(s), e.g. `eng` or `eng+deu`.
    pub language: String,
    /// Page segmentation mode (Tesseract `--psm`).
    pub page_segmentation_mode: u8,
    /// Engine mode (Tesseract `--oem`).
    pub engine_mode: u8,
    /// Extra engine arguments, passed verbatim.
    pub engine_flags: Vec<String>,
    /// Tokens below this confidence (0–100) are discarded.
    pub min_confidence: f64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "eng".into(),
            page_segmentation_mode: 3,
            engine_mode: 3,
            engine_flags: Vec::new(),
            min_confidence: 0.0,
        }
    }
}

/// Settings for ORB matching, RANSAC, and transformed-box validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateMatchConfig {
    // -- ORB --
    pub n_features: u32,
    pub scale_factor: f64,
    pub n_levels: u32,
    pub edge_threshold: u32,
    pub first_level: u32,
    /// Points compared per descriptor element. Only 2 is supported.
    pub wta_k: u32,
    pub patch_size: u32,
    pub fast_threshold: u8,

    // -- Matching --
    /// Lowe's ratio: keep a match when `best < ratio_threshold * second_best`.
    pub ratio_threshold: f64,
    pub min_match_count: usize,

    // -- RANSAC --
    pub ransac_reproj_threshold: f64,
    pub ransac_max_iters: u32,
    pub ransac_confidence: f64,

    // -- Outcome / validation --
    pub min_confidence: f64,
    pub max_area_ratio: f64,
    pub max_aspect_change: f64,
    pub min_box_area: f64,
}

impl Default for TemplateMatchConfig {
    fn default() -> Self {
        Self {
            n_features: 1000,
            scale_factor: 1.2,
            n_levels: 8,
            edge_threshold: 31,
            first_level: 0,
            wta_k: 2,
            patch_size: 31,
            fast_threshold: 20,
            ratio_threshold: 0.75,
            min_match_count: 10,
            ransac_reproj_threshold: 5.0,
            ransac_max_iters: 2000,
            ransac_confidence: 0.995,
            min_confidence: 0.5,
            max_area_ratio: 4.0,
            max_aspect_change: 0.5,
            min_box_area: 100.0,
        }
    }
}

impl TemplateMatchConfig {
    /// Return a copy with every numeric field forced into its valid range.
    pub fn normalized(&self) -> Self {
        let defaults = Self::default();
        let n_levels = self.n_levels.max(1);
        let patch_size = self.patch_size.max(7);
        Self {
            n_features: self.n_features.max(1),
            scale_factor: if self.scale_factor > 1.0 {
                self.scale_factor
            } else {
                defaults.scale_factor
            },
            n_levels,
            edge_threshold: self.edge_threshold.max(patch_size / 2 + 1),
            first_level: self.first_level.min(n_levels - 1),
            wta_k: 2,
            patch_size,
            ratio_threshold: if self.ratio_threshold > 0.0 && self.ratio_threshold <= 1.0 {
                self.ratio_threshold
            } else {
                defaults.ratio_threshold
            },
            // A homography needs at least four correspondences.
            min_match_count: self.min_match_count.max(4),
            ransac_reproj_threshold: if self.ransac_reproj_threshold > 0.0 {
                self.ransac_reproj_threshold
            } else {
                defaults.ransac_reproj_threshold
            },
            ransac_max_iters: self.ransac_max_iters.max(1),
            ransac_confidence: self.ransac_confidence.clamp(0.0, 0.999_999),
            min_confidence: self.min_confidence.clamp(0.0, 1.0),
            max_area_ratio: self.max_area_ratio.max(1.0),
            max_aspect_change: self.max_aspect_change.max(0.0),
            min_box_area: self.min_box_area.max(0.0),
            ..self.clone()
        }
    }
}

/// All pipeline settings, loadable from a single TOML file.
///
/// Every section is optional; missing sections and fields take defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub preprocessing: PreprocessingConfig,
    pub ocr: OcrConfig,
    pub matching: TemplateMatchConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| LesewerkError::Config(err.to_string()))
    }

    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents).map_err(|err| {
            LesewerkError::Config(format!("{}: {}", path.as_ref().display(), err))
        })
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| LesewerkError::Config(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn even_kernel_sizes_are_forced_odd() {
        let config = PreprocessingConfig {
            gaussian_kernel_size: 4,
            adaptive_block_size: 10,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.gaussian_kernel_size, 5);
        assert_eq!(config.adaptive_block_size, 11);
    }

    #[test]
    fn tiny_block_size_is_raised_to_three() {
        let config = PreprocessingConfig {
            adaptive_block_size: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.adaptive_block_size, 3);
    }

    #[test]
    fn oversized_bilateral_diameter_is_capped() {
        let config = PreprocessingConfig {
            bilateral_d: 100_000,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.bilateral_d, MAX_BILATERAL_DIAMETER);

        let derived = PreprocessingConfig {
            bilateral_d: -1,
            ..Default::default()
        }
        .normalized();
        assert_eq!(derived.bilateral_d, -1);
    }

    #[test]
    fn match_config_normalizes_out_of_range_values() {
        let config = TemplateMatchConfig {
            wta_k: 4,
            ratio_threshold: 1.5,
            min_match_count: 1,
            scale_factor: 0.9,
            n_levels: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.wta_k, 2);
        assert_eq!(config.ratio_threshold, 0.75);
        assert_eq!(config.min_match_count, 4);
        assert_eq!(config.scale_factor, 1.2);
        assert_eq!(config.n_levels, 1);
        assert_eq!(config.first_level, 0);
    }

    #[test]
    fn defaults_survive_normalization() {
        let config = TemplateMatchConfig::default();
        assert_eq!(config.normalized(), config);
        let pre = PreprocessingConfig::default();
        assert_eq!(pre.normalized(), pre);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [preprocessing]
            max_width = 1024
            deskew = false

            [ocr]
            min_confidence = 60.0
            "#,
        )
        .unwrap();
        assert_eq!(config.preprocessing.max_width, 1024);
        assert!(!config.preprocessing.deskew);
        assert_eq!(config.preprocessing.max_height, 4000);
        assert_eq!(config.ocr.min_confidence, 60.0);
        assert_eq!(config.ocr.language, "eng");
        assert_eq!(config.matching, TemplateMatchConfig::default());
    }

    #[test]
    fn load_from_file_round_trips() {
        let original = PipelineConfig::default();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(original.to_toml_string().unwrap().as_bytes())
            .unwrap();
        let loaded = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = PipelineConfig::from_toml_str("[preprocessing\nmax_width = ").unwrap_err();
        assert!(matches!(err, LesewerkError::Config(_)));
    }
}
