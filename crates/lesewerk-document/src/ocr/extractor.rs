// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Structured text extraction — runs a recognition engine and assembles its
// tokens into the word → line → block hierarchy, plus region-scoped and
// annotation-scoped extraction.
//
// Confidence stays on the engine's 0–100 scale everywhere in this module
// except when written onto an `Annotation`, where it is divided by 100.

use std::collections::BTreeMap;

use image::{DynamicImage, GrayImage, Luma};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use lesewerk_core::error::Result;
use lesewerk_core::{
    Annotation, BoundingBox, ImageSize, OcrBlock, OcrConfig, OcrLine, OcrResult, OcrWord,
};
use tracing::{debug, info, instrument};

use super::engine::{OcrToken, RecognitionEngine};
use crate::image::processor::ImageProcessor;

/// Extracts structured text from images through a [`RecognitionEngine`].
pub struct OcrExtractor<E> {
    engine: E,
}

impl<E: RecognitionEngine> OcrExtractor<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Plain-text recognition of the whole image, trimmed.
    #[instrument(skip_all, fields(engine = self.engine.name(), width = image.width(), height = image.height()))]
    pub fn extract_text_simple(&self, image: &DynamicImage, config: &OcrConfig) -> Result<String> {
        let gray = image.to_luma8();
        let text = self.engine.recognize_text(&gray, config)?;
        Ok(text.trim().to_owned())
    }

    /// Per-token recognition assembled into lines and blocks.
    ///
    /// Tokens with empty text or confidence below `config.min_confidence`
    /// are discarded before assembly.
    #[instrument(skip_all, fields(engine = self.engine.name(), width = image.width(), height = image.height()))]
    pub fn extract_text_with_data(&self, image: &DynamicImage, config: &OcrConfig) -> Result<OcrResult> {
        let gray = image.to_luma8();
        self.extract_from_gray(&gray, config)
    }

    fn extract_from_gray(&self, gray: &GrayImage, config: &OcrConfig) -> Result<OcrResult> {
        let tokens = self.engine.recognize_tokens(gray, config)?;
        let result = assemble_result(tokens, config.min_confidence);
        info!(
            words = result.word_count,
            lines = result.lines.len(),
            blocks = result.blocks.len(),
            average_confidence = result.average_confidence,
            "Structured OCR complete"
        );
        Ok(result)
    }

    /// Recognise the text inside `bbox`.
    ///
    /// The box is clamped to the image. When nothing of it remains, returns
    /// `("", 0.0)` without invoking the engine. A non-zero `bbox.rotation`
    /// (degrees, counter-clockwise) is undone about the crop centre first.
    /// Returns the text and its average confidence (0–100).
    #[instrument(skip(self, image, config), fields(engine = self.engine.name()))]
    pub fn extract_text_from_region(
        &self,
        image: &DynamicImage,
        bbox: &BoundingBox,
        config: &OcrConfig,
    ) -> Result<(String, f64)> {
        let processor = ImageProcessor::from_dynamic(image.clone());
        let Some(crop) = processor.crop_clamped(
            bbox.x.floor() as i64,
            bbox.y.floor() as i64,
            bbox.width.round() as i64,
            bbox.height.round() as i64,
        ) else {
            debug!("Region lies outside the image; skipping recognition");
            return Ok((String::new(), 0.0));
        };

        let mut gray = crop.to_luma8();
        if bbox.rotation != 0.0 {
            gray = rotate_about_center(
                &gray,
                (-bbox.rotation).to_radians() as f32,
                Interpolation::Bilinear,
                Luma([255u8]),
            );
        }

        let result = self.extract_from_gray(&gray, config)?;
        Ok((result.full_text, result.average_confidence))
    }

    /// Fill `extracted_text` and `confidence` (normalised to `[0, 1]`) on
    /// every annotation that has a bounding box. Annotations without one are
    /// returned untouched.
    #[instrument(skip_all, fields(engine = self.engine.name(), annotations = annotations.len()))]
    pub fn extract_text_for_annotations(
        &self,
        image: &DynamicImage,
        mut annotations: Vec<Annotation>,
        config: &OcrConfig,
    ) -> Result<Vec<Annotation>> {
        let mut filled = 0usize;
        for annotation in annotations.iter_mut() {
            let Some(bbox) = annotation.bounding_box else {
                continue;
            };
            let (text, confidence) = self.extract_text_from_region(image, &bbox, config)?;
            annotation.extracted_text = Some(text);
            annotation.confidence = Some(confidence / 100.0);
            filled += 1;
        }
        info!(filled, "Annotation text extracted");
        Ok(annotations)
    }
}

/// Rescale a box from processed-image coordinates back to the original
/// image. Identity when both sizes are equal.
pub fn map_coordinates(bbox: &BoundingBox, original: ImageSize, processed: ImageSize) -> BoundingBox {
    if original == processed || processed.width == 0 || processed.height == 0 {
        return *bbox;
    }
    let scale_x = original.width as f64 / processed.width as f64;
    let scale_y = original.height as f64 / processed.height as f64;
    BoundingBox {
        x: bbox.x * scale_x,
        y: bbox.y * scale_y,
        width: bbox.width * scale_x,
        height: bbox.height * scale_y,
        rotation: bbox.rotation,
    }
}

/// Build an [`OcrResult`] from raw engine tokens.
///
/// Lines are keyed by `(block, paragraph, line)` with words sorted by x;
/// blocks are keyed by block number with lines sorted by y.
pub fn assemble_result(tokens: Vec<OcrToken>, min_confidence: f64) -> OcrResult {
    let words: Vec<OcrWord> = tokens
        .into_iter()
        .filter(|token| !token.text.trim().is_empty() && token.confidence >= min_confidence)
        .map(OcrToken::into_word)
        .collect();

    let mut line_groups: BTreeMap<(u32, u32, u32), Vec<OcrWord>> = BTreeMap::new();
    for word in &words {
        line_groups
            .entry((word.block_num, word.par_num, word.line_num))
            .or_default()
            .push(word.clone());
    }

    let mut lines = Vec::with_capacity(line_groups.len());
    let mut block_groups: BTreeMap<u32, Vec<OcrLine>> = BTreeMap::new();
    for ((block_num, _, _), mut line_words) in line_groups {
        line_words.sort_by_key(|w| w.x);
        let line = build_line(line_words);
        block_groups.entry(block_num).or_default().push(line.clone());
        lines.push(line);
    }

    let blocks: Vec<OcrBlock> = block_groups
        .into_values()
        .map(|mut block_lines| {
            block_lines.sort_by_key(|l| l.y);
            build_block(block_lines)
        })
        .collect();

    let full_text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let average_confidence = mean_positive(words.iter().map(|w| w.confidence));

    OcrResult {
        full_text,
        word_count: words.len(),
        average_confidence,
        words,
        lines,
        blocks,
        detected_regions: Vec::new(),
    }
}

fn build_line(words: Vec<OcrWord>) -> OcrLine {
    let (x, y, width, height) = union_rect(words.iter().map(|w| (w.x, w.y, w.width, w.height)));
    OcrLine {
        text: words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        confidence: mean_positive(words.iter().map(|w| w.confidence)),
        words,
        x,
        y,
        width,
        height,
    }
}

fn build_block(lines: Vec<OcrLine>) -> OcrBlock {
    let (x, y, width, height) = union_rect(lines.iter().map(|l| (l.x, l.y, l.width, l.height)));
    OcrBlock {
        text: lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        confidence: mean_positive(lines.iter().map(|l| l.confidence)),
        lines,
        x,
        y,
        width,
        height,
    }
}

/// Union of `(x, y, w, h)` rectangles; all zeros for an empty input.
fn union_rect(rects: impl Iterator<Item = (i32, i32, i32, i32)>) -> (i32, i32, i32, i32) {
    let mut bounds: Option<(i32, i32, i32, i32)> = None;
    for (x, y, w, h) in rects {
        bounds = Some(match bounds {
            None => (x, y, x + w, y + h),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x + w), y1.max(y + h)),
        });
    }
    match bounds {
        Some((x0, y0, x1, y1)) => (x0, y0, x1 - x0, y1 - y0),
        None => (0, 0, 0, 0),
    }
}

/// Mean of the strictly positive values, or 0.0 if there are none.
fn mean_positive(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .filter(|v| *v > 0.0)
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Engine that replays fixed tokens and counts invocations.
    struct ScriptedEngine {
        tokens: Vec<OcrToken>,
        calls: AtomicUsize,
    }

    impl ScriptedEngine {
        fn new(tokens: Vec<OcrToken>) -> Self {
            Self {
                tokens,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RecognitionEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        fn recognize_text(&self, _image: &GrayImage, _config: &OcrConfig) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("  hello world \n".into())
        }

        fn recognize_tokens(&self, _image: &GrayImage, _config: &OcrConfig) -> Result<Vec<OcrToken>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tokens.clone())
        }
    }

    fn token(block: u32, line: u32, word: u32, x: i32, y: i32, conf: f64, text: &str) -> OcrToken {
        OcrToken {
            level: 5,
            block_num: block,
            par_num: 1,
            line_num: line,
            word_num: word,
            left: x,
            top: y,
            width: 40,
            height: 20,
            confidence: conf,
            text: text.into(),
        }
    }

    fn sample_tokens() -> Vec<OcrToken> {
        vec![
            token(1, 1, 2, 60, 10, 90.0, "World"),
            token(1, 1, 1, 10, 12, 80.0, "Hello"),
            token(1, 2, 1, 10, 40, 70.0, "again"),
            token(2, 1, 1, 10, 100, 50.0, "Total"),
            token(2, 1, 2, 60, 100, 95.0, "   "),
        ]
    }

    fn blank_image() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 150, Luma([255u8])))
    }

    #[test]
    fn assembles_lines_and_blocks() {
        let result = assemble_result(sample_tokens(), 0.0);
        assert_eq!(result.word_count, 4);
        assert_eq!(result.full_text, "World Hello again Total");
        assert_eq!(result.lines.len(), 3);
        assert_eq!(result.lines[0].text, "Hello World");
        assert_eq!(result.lines[0].x, 10);
        assert_eq!(result.lines[0].y, 10);
        assert_eq!(result.lines[0].width, 90);
        assert_eq!(result.lines[0].height, 22);
        assert!((result.lines[0].confidence - 85.0).abs() < 1e-9);
        assert_eq!(result.blocks.len(), 2);
        assert_eq!(result.blocks[0].text, "Hello World\nagain");
        assert!((result.average_confidence - 72.5).abs() < 1e-9);
    }

    #[test]
    fn min_confidence_drops_weak_tokens() {
        let result = assemble_result(sample_tokens(), 60.0);
        assert_eq!(result.word_count, 3);
        assert!(!result.full_text.contains("Total"));
        assert_eq!(result.blocks.len(), 1);
    }

    #[test]
    fn average_ignores_non_positive_confidence() {
        let tokens = vec![
            token(1, 1, 1, 0, 0, -1.0, "a"),
            token(1, 1, 2, 50, 0, 0.0, "b"),
            token(1, 1, 3, 90, 0, 60.0, "c"),
        ];
        let result = assemble_result(tokens, -10.0);
        assert_eq!(result.word_count, 3);
        assert!((result.average_confidence - 60.0).abs() < 1e-9);
    }

    #[test]
    fn empty_tokens_give_zero_confidence() {
        let result = assemble_result(Vec::new(), 0.0);
        assert_eq!(result.average_confidence, 0.0);
        assert!(result.full_text.is_empty());
        assert!(result.blocks.is_empty());
    }

    #[test]
    fn simple_extraction_trims_text() {
        let extractor = OcrExtractor::new(ScriptedEngine::new(Vec::new()));
        let text = extractor
            .extract_text_simple(&blank_image(), &OcrConfig::default())
            .unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn region_outside_image_skips_engine() {
        let engine = ScriptedEngine::new(sample_tokens());
        let extractor = OcrExtractor::new(&engine);
        let config = OcrConfig::default();

        let outside = BoundingBox::new(500.0, 500.0, 50.0, 50.0);
        assert_eq!(
            extractor.extract_text_from_region(&blank_image(), &outside, &config).unwrap(),
            (String::new(), 0.0)
        );
        let empty = BoundingBox::new(10.0, 10.0, 0.0, 30.0);
        assert_eq!(
            extractor.extract_text_from_region(&blank_image(), &empty, &config).unwrap(),
            (String::new(), 0.0)
        );
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn region_inside_image_runs_engine() {
        let engine = ScriptedEngine::new(sample_tokens());
        let extractor = OcrExtractor::new(&engine);
        let bbox = BoundingBox {
            rotation: 5.0,
            ..BoundingBox::new(20.0, 20.0, 100.0, 60.0)
        };
        let (text, confidence) = extractor
            .extract_text_from_region(&blank_image(), &bbox, &OcrConfig::default())
            .unwrap();
        assert_eq!(text, "World Hello again Total");
        assert!(confidence > 0.0);
        assert_eq!(engine.calls(), 1);
    }

    #[test]
    fn annotations_get_normalised_confidence() {
        let engine = ScriptedEngine::new(vec![token(1, 1, 1, 0, 0, 80.0, "42.00")]);
        let extractor = OcrExtractor::new(&engine);
        let with_box = Annotation {
            id: Uuid::new_v4(),
            label_name: "amount".into(),
            label_type: None,
            bounding_box: Some(BoundingBox::new(0.0, 0.0, 50.0, 20.0)),
            extracted_text: None,
            confidence: None,
        };
        let without_box = Annotation {
            bounding_box: None,
            label_name: "notes".into(),
            ..with_box.clone()
        };

        let out = extractor
            .extract_text_for_annotations(
                &blank_image(),
                vec![with_box, without_box.clone()],
                &OcrConfig::default(),
            )
            .unwrap();
        assert_eq!(out[0].extracted_text.as_deref(), Some("42.00"));
        assert!((out[0].confidence.unwrap() - 0.8).abs() < 1e-9);
        assert_eq!(out[1], without_box);
        assert_eq!(engine.calls(), 1);
    }

    #[test]
    fn map_coordinates_identity_for_equal_sizes() {
        let bbox = BoundingBox::new(12.5, 7.0, 30.0, 40.0);
        let size = ImageSize::new(640, 480);
        assert_eq!(map_coordinates(&bbox, size, size), bbox);
    }

    #[test]
    fn map_coordinates_scales_to_original() {
        let bbox = BoundingBox::new(100.0, 50.0, 20.0, 10.0);
        let mapped = map_coordinates(&bbox, ImageSize::new(2000, 1000), ImageSize::new(1000, 500));
        assert_eq!(mapped, BoundingBox::new(200.0, 100.0, 40.0, 20.0));
    }
}
