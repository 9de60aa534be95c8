// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Template matching — relocate a template's labelled fields onto a new
// document image.
//
// Stages:
//   1. load the template fingerprint
//   2. extract ORB features from the document
//   3. two-nearest-neighbour Hamming matching with Lowe's ratio test
//   4. RANSAC homography
//   5. transform every label box into document pixels
//   6. validate each transformed box
//   7. score the match
//   8. accept, or defer to manual anchor placement
//
// Stages 1-4 end early with `requires_manual_anchors` set when there is not
// enough to work with. That is an ordinary outcome, not an error.

use image::DynamicImage;
use lesewerk_core::error::Result;
use lesewerk_core::{
    BoundingBox, LesewerkError, MatchResult, Template, TemplateLabel, TemplateMatchConfig,
    TransformedBox,
};
use tracing::{debug, info, instrument, warn};

use crate::features::{Descriptor, FeatureExtractor, FeatureSet, hamming_distance};
use crate::fingerprint::{deserialize_fingerprint, serialize_fingerprint};
use crate::homography::{Homography, RansacParams, find_homography, transform_bounding_box};

pub const NO_FINGERPRINT: &str = "no stored feature keypoints";
pub const INSUFFICIENT_KEYPOINTS: &str = "insufficient keypoints in document";
pub const INSUFFICIENT_MATCHES: &str = "insufficient feature matches";
pub const HOMOGRAPHY_FAILED: &str = "failed to compute homography matrix";

/// Match count at which the match-volume term of the confidence saturates.
const SATURATING_MATCHES: f64 = 50.0;

/// A template descriptor paired with its nearest document descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    /// Index into the template features.
    pub query: usize,
    /// Index into the document features.
    pub train: usize,
    pub distance: u32,
}

/// Brute-force two-nearest-neighbour matching.
///
/// A match is kept only if `best < ratio * second_best`. Template
/// descriptors with fewer than two candidates produce no match.
pub fn ratio_test_matches(
    template: &[Descriptor],
    document: &[Descriptor],
    ratio: f64,
) -> Vec<FeatureMatch> {
    template
        .iter()
        .enumerate()
        .filter_map(|(query, descriptor)| {
            let mut best: Option<(usize, u32)> = None;
            let mut second: Option<u32> = None;
            for (train, candidate) in document.iter().enumerate() {
                let distance = hamming_distance(descriptor, candidate);
                match best {
                    Some((_, best_distance)) if distance >= best_distance => {
                        if second.is_none_or(|s| distance < s) {
                            second = Some(distance);
                        }
                    }
                    _ => {
                        second = best.map(|(_, d)| d);
                        best = Some((train, distance));
                    }
                }
            }
            let (train, distance) = best?;
            let second = second?;
            ((distance as f64) < ratio * second as f64).then_some(FeatureMatch {
                query,
                train,
                distance,
            })
        })
        .collect()
}

/// Weighted match confidence in `[0, 1]`.
///
/// `0.4 * inlier ratio + 0.3 * valid box ratio + 0.3 * match volume`, with
/// the volume term saturating at fifty matches. Exactly `0.0` when there
/// are no matches; a template without labels contributes nothing for the
/// box term.
pub fn calculate_match_confidence(
    inlier_count: usize,
    total_matches: usize,
    valid_boxes: usize,
    total_boxes: usize,
) -> f64 {
    if total_matches == 0 {
        return 0.0;
    }
    let inlier_ratio = (inlier_count as f64 / total_matches as f64).min(1.0);
    let box_ratio = if total_boxes == 0 {
        0.0
    } else {
        valid_boxes as f64 / total_boxes as f64
    };
    let volume = (total_matches as f64 / SATURATING_MATCHES).min(1.0);
    (0.4 * inlier_ratio + 0.3 * box_ratio + 0.3 * volume).clamp(0.0, 1.0)
}

/// Relocates template fields onto document images.
#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    config: TemplateMatchConfig,
    extractor: FeatureExtractor,
}

impl Default for TemplateMatcher {
    fn default() -> Self {
        Self::new(TemplateMatchConfig::default())
    }
}

impl TemplateMatcher {
    pub fn new(config: TemplateMatchConfig) -> Self {
        let config = config.normalized();
        Self {
            extractor: FeatureExtractor::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &TemplateMatchConfig {
        &self.config
    }

    /// Extract features from a template's source image and encode them as
    /// the blob stored in [`Template::feature_keypoints`].
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn capture_fingerprint(&self, image: &DynamicImage) -> Result<Vec<u8>> {
        let features = self.extractor.extract(&image.to_luma8());
        info!(keypoints = features.len(), "Template fingerprint captured");
        serialize_fingerprint(&features)
    }

    /// Decode `data` and run [`match_template`](Self::match_template).
    pub fn match_template_bytes(&self, template: &Template, data: &[u8]) -> Result<MatchResult> {
        let document = image::load_from_memory(data)
            .map_err(|err| LesewerkError::Decode(format!("failed to decode document image: {}", err)))?;
        self.match_template(template, &document)
    }

    /// Locate `template` in `document` and map its labels into document
    /// pixels.
    ///
    /// # Errors
    ///
    /// Only a corrupt fingerprint blob is an error. Every "cannot match"
    /// condition is reported through the returned [`MatchResult`].
    #[instrument(skip_all, fields(template = %template.id, labels = template.labels.len()))]
    pub fn match_template(&self, template: &Template, document: &DynamicImage) -> Result<MatchResult> {
        // 1. Fingerprint
        let blob = match template.feature_keypoints.as_deref() {
            Some(blob) if !blob.is_empty() => blob,
            _ => return Ok(manual(NO_FINGERPRINT, 0)),
        };
        let template_features = deserialize_fingerprint(blob)?;

        // 2. Document features
        let gray = document.to_luma8();
        let (doc_width, doc_height) = gray.dimensions();
        let document_features = self.extractor.extract(&gray);
        if document_features.len() < self.config.min_match_count {
            return Ok(manual(INSUFFICIENT_KEYPOINTS, 0));
        }

        // 3. Matching
        let matches = ratio_test_matches(
            &template_features.descriptors,
            &document_features.descriptors,
            self.config.ratio_threshold,
        );
        let total_matches = matches.len();
        debug!(
            template_keypoints = template_features.len(),
            document_keypoints = document_features.len(),
            total_matches,
            "Descriptors matched"
        );
        if total_matches < self.config.min_match_count {
            return Ok(manual(INSUFFICIENT_MATCHES, total_matches));
        }

        // 4. Geometric verification
        let Some((homography, inlier_count)) =
            self.estimate_homography(&matches, &template_features, &document_features)
        else {
            return Ok(manual(HOMOGRAPHY_FAILED, total_matches));
        };

        // 5-6. Field transformation and validation
        let transformed_boxes: Vec<TransformedBox> = template
            .labels
            .iter()
            .map(|label| self.transform_label(label, &homography, doc_width, doc_height))
            .collect();
        let valid_boxes = transformed_boxes.iter().filter(|b| b.is_valid).count();

        // 7. Confidence
        let confidence =
            calculate_match_confidence(inlier_count, total_matches, valid_boxes, transformed_boxes.len());

        // 8. Outcome
        let success = confidence >= self.config.min_confidence;
        let error_message = if success {
            info!(confidence, inlier_count, total_matches, valid_boxes, "Template matched");
            None
        } else {
            warn!(
                confidence,
                min_confidence = self.config.min_confidence,
                "Match confidence below threshold; manual anchors required"
            );
            Some(format!(
                "match confidence {:.2} below threshold {:.2}",
                confidence, self.config.min_confidence
            ))
        };

        Ok(MatchResult {
            success,
            confidence,
            transformed_boxes,
            homography_matrix: Some(homography.matrix()),
            inlier_count,
            total_matches,
            error_message,
            requires_manual_anchors: !success,
        })
    }

    fn estimate_homography(
        &self,
        matches: &[FeatureMatch],
        template: &FeatureSet,
        document: &FeatureSet,
    ) -> Option<(Homography, usize)> {
        let src: Vec<(f64, f64)> = matches.iter().map(|m| template.point(m.query)).collect();
        let dst: Vec<(f64, f64)> = matches.iter().map(|m| document.point(m.train)).collect();
        let estimate = find_homography(&src, &dst, &RansacParams::from(&self.config))?;
        let inliers = estimate.inlier_count();
        Some((estimate.homography, inliers))
    }

    /// Convert a label to document pixels, push it through the homography,
    /// and validate the result.
    fn transform_label(
        &self,
        label: &TemplateLabel,
        homography: &Homography,
        width: u32,
        height: u32,
    ) -> TransformedBox {
        let original = label.to_absolute(width, height);
        let bounding_box = transform_bounding_box(&original, homography, width, height);
        let validation_error = self.validate_box(&original, &bounding_box);
        if let Some(reason) = &validation_error {
            debug!(label = %label.label_name, reason = %reason, "Transformed box rejected");
        }
        TransformedBox {
            original_label: label.clone(),
            bounding_box,
            is_valid: validation_error.is_none(),
            validation_error,
        }
    }

    /// Reason a transformed box is unusable, if any.
    fn validate_box(&self, original: &BoundingBox, transformed: &BoundingBox) -> Option<String> {
        let cfg = &self.config;
        if transformed.width <= 0.0 || transformed.height <= 0.0 {
            return Some("transformed box has non-positive dimensions".into());
        }

        let area = transformed.area();
        if area < cfg.min_box_area {
            return Some(format!(
                "transformed box area {:.1} below minimum {:.1}",
                area, cfg.min_box_area
            ));
        }

        let original_area = original.area();
        if original_area <= 0.0 {
            return Some("template label has non-positive dimensions".into());
        }
        let area_ratio = area / original_area;
        if area_ratio < 1.0 / cfg.max_area_ratio || area_ratio > cfg.max_area_ratio {
            return Some(format!("area ratio {:.2} out of range", area_ratio));
        }

        let original_aspect = original.aspect_ratio();
        let aspect_change = (transformed.aspect_ratio() - original_aspect).abs() / original_aspect;
        if aspect_change > cfg.max_aspect_change {
            return Some(format!("aspect ratio changed by {:.0}%", aspect_change * 100.0));
        }

        None
    }
}

fn manual(message: &str, total_matches: usize) -> MatchResult {
    warn!(reason = message, total_matches, "Template match deferred to manual anchors");
    MatchResult {
        total_matches,
        ..MatchResult::needs_manual_anchors(message)
    }
}
