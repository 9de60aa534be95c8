// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Lesewerk document pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Geometry -----------------------------------------------------------------

/// Axis-aligned pixel rectangle with an optional rotation (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            rotation: 0.0,
        }
    }

    /// A box is valid when it has strictly positive extent on both axes.
    pub fn is_valid(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Width divided by height; 0.0 for degenerate boxes.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Smallest box containing both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }
}

/// Width/height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// -- Templates ----------------------------------------------------------------

/// The kind of field a template label marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    Header,
    Table,
    Signature,
    Date,
    Amount,
    Custom,
}

/// A labelled field stored on a template, in resolution-independent
/// coordinates (fractions of document width/height, each in `[0, 1]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateLabel {
    pub id: Uuid,
    pub label_type: LabelType,
    pub label_name: String,
    /// Display colour, e.g. `#FF0000`.
    pub color: String,
    pub relative_x: f64,
    pub relative_y: f64,
    pub relative_width: f64,
    pub relative_height: f64,
    #[serde(default)]
    pub expected_format: Option<String>,
    #[serde(default)]
    pub is_required: bool,
}

impl TemplateLabel {
    /// Convert the relative box into absolute pixels for a `width` x `height`
    /// image.
    pub fn to_absolute(&self, width: u32, height: u32) -> BoundingBox {
        let (w, h) = (width as f64, height as f64);
        BoundingBox::new(
            self.relative_x * w,
            self.relative_y * h,
            self.relative_width * w,
            self.relative_height * h,
        )
    }
}

/// A reusable field layout plus the visual fingerprint of its source
/// document.
///
/// `feature_keypoints` is written once by the persistence layer when the
/// template is created; the matcher only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub labels: Vec<TemplateLabel>,
    #[serde(default)]
    pub feature_keypoints: Option<Vec<u8>>,
    #[serde(default)]
    pub source_document_id: Option<Uuid>,
}

impl Template {
    pub fn has_fingerprint(&self) -> bool {
        self.feature_keypoints
            .as_deref()
            .is_some_and(|blob| !blob.is_empty())
    }
}

/// A field placed on a concrete document, optionally carrying OCR output.
///
/// `confidence` is normalised to `[0, 1]`, unlike the 0–100 scale used by
/// the OCR result types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: Uuid,
    pub label_name: String,
    #[serde(default)]
    pub label_type: Option<LabelType>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub extracted_text: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

// -- OCR output ---------------------------------------------------------------

/// A single recognised word. Confidence is on the engine's 0–100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f64,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub block_num: u32,
    pub par_num: u32,
    pub line_num: u32,
    pub word_num: u32,
}

impl OcrWord {
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::new(
            self.x as f64,
            self.y as f64,
            self.width as f64,
            self.height as f64,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    pub words: Vec<OcrWord>,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrBlock {
    pub text: String,
    pub lines: Vec<OcrLine>,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f64,
}

/// Classification of an autodetected layout region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionType {
    Header,
    Text,
    Table,
    Signature,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedRegion {
    #[serde(rename = "type")]
    pub region_type: RegionType,
    pub bounding_box: BoundingBox,
    pub area: f64,
    pub aspect_ratio: f64,
}

/// Structured OCR output for one image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OcrResult {
    pub full_text: String,
    pub words: Vec<OcrWord>,
    pub lines: Vec<OcrLine>,
    pub blocks: Vec<OcrBlock>,
    pub average_confidence: f64,
    pub word_count: usize,
    pub detected_regions: Vec<DetectedRegion>,
}

impl OcrResult {
    pub fn to_json(&self) -> Result<String, crate::LesewerkError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// -- Template matching output -------------------------------------------------

/// A template label relocated onto a new document image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedBox {
    pub original_label: TemplateLabel,
    pub bounding_box: BoundingBox,
    pub is_valid: bool,
    #[serde(default)]
    pub validation_error: Option<String>,
}

/// Outcome of matching a template against a document image.
///
/// "Could not match" is a normal result with `requires_manual_anchors`
/// set, never an error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchResult {
    pub success: bool,
    pub confidence: f64,
    pub transformed_boxes: Vec<TransformedBox>,
    pub homography_matrix: Option<[[f64; 3]; 3]>,
    pub inlier_count: usize,
    pub total_matches: usize,
    pub error_message: Option<String>,
    pub requires_manual_anchors: bool,
}

impl MatchResult {
    /// A terminal failure that defers to manual anchor placement.
    pub fn needs_manual_anchors(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            requires_manual_anchors: true,
            ..Default::default()
        }
    }

    pub fn valid_boxes(&self) -> impl Iterator<Item = &TransformedBox> {
        self.transformed_boxes.iter().filter(|b| b.is_valid)
    }

    pub fn to_json(&self) -> Result<String, crate::LesewerkError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(x: f64, y: f64, w: f64, h: f64) -> TemplateLabel {
        TemplateLabel {
            id: Uuid::new_v4(),
            label_type: LabelType::Amount,
            label_name: "total".into(),
            color: "#00FF00".into(),
            relative_x: x,
            relative_y: y,
            relative_width: w,
            relative_height: h,
            expected_format: None,
            is_required: true,
        }
    }

    #[test]
    fn bounding_box_union_covers_both() {
        let a = BoundingBox::new(10.0, 10.0, 20.0, 5.0);
        let b = BoundingBox::new(40.0, 0.0, 10.0, 30.0);
        let u = a.union(&b);
        assert_eq!(u, BoundingBox::new(10.0, 0.0, 40.0, 30.0));
    }

    #[test]
    fn zero_height_box_is_invalid() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 0.0);
        assert!(!b.is_valid());
        assert_eq!(b.aspect_ratio(), 0.0);
    }

    #[test]
    fn label_to_absolute_scales_by_image_size() {
        let abs = label(0.1, 0.5, 0.25, 0.1).to_absolute(800, 1000);
        assert!((abs.x - 80.0).abs() < 1e-9);
        assert!((abs.y - 500.0).abs() < 1e-9);
        assert!((abs.width - 200.0).abs() < 1e-9);
        assert!((abs.height - 100.0).abs() < 1e-9);
    }

    #[test]
    fn template_without_blob_has_no_fingerprint() {
        let mut template = Template {
            id: Uuid::new_v4(),
            name: "invoice".into(),
            labels: vec![label(0.0, 0.0, 0.5, 0.5)],
            feature_keypoints: None,
            source_document_id: None,
        };
        assert!(!template.has_fingerprint());
        template.feature_keypoints = Some(Vec::new());
        assert!(!template.has_fingerprint());
        template.feature_keypoints = Some(vec![1, 2, 3]);
        assert!(template.has_fingerprint());
    }

    #[test]
    fn label_type_serializes_lowercase() {
        let json = serde_json::to_string(&LabelType::Signature).unwrap();
        assert_eq!(json, "\"signature\"");
        let region = serde_json::to_string(&RegionType::Table).unwrap();
        assert_eq!(region, "\"table\"");
    }

    #[test]
    fn manual_anchor_result_is_unsuccessful() {
        let result = MatchResult::needs_manual_anchors("no stored feature keypoints");
        assert!(!result.success);
        assert!(result.requires_manual_anchors);
        assert_eq!(result.confidence, 0.0);
        let json = result.to_json().unwrap();
        assert!(json.contains("\"requires_manual_anchors\": true"));
    }
}
