// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One-call document processing: preprocess, recognise, detect layout.

use lesewerk_core::error::Result;
use lesewerk_core::{ImageSize, OcrConfig, OcrResult, PreprocessingConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::ocr::engine::RecognitionEngine;
use crate::ocr::extractor::OcrExtractor;
use crate::ocr::layout::{DEFAULT_MIN_REGION_AREA, detect_document_regions, detect_tables};
use crate::scan::{PreprocessingStep, Preprocessor};

/// Summary of what happened to a document on its way through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub original_size: ImageSize,
    pub processed_size: ImageSize,
    pub steps_applied: Vec<PreprocessingStep>,
    pub deskew_angle: f64,
    pub word_count: usize,
    pub average_confidence: f64,
    pub region_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub ocr: OcrResult,
    pub metadata: ProcessingMetadata,
}

/// Composes the [`Preprocessor`] and [`OcrExtractor`].
///
/// Word boxes refer to the processed image; detected regions refer to the
/// original decoded image.
pub struct DocumentProcessor<E> {
    extractor: OcrExtractor<E>,
    preprocessing: PreprocessingConfig,
    ocr: OcrConfig,
}

impl<E: RecognitionEngine> DocumentProcessor<E> {
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, PreprocessingConfig::default(), OcrConfig::default())
    }

    /// Processor with default configurations used when a call passes `None`.
    pub fn with_config(engine: E, preprocessing: PreprocessingConfig, ocr: OcrConfig) -> Self {
        Self {
            extractor: OcrExtractor::new(engine),
            preprocessing,
            ocr,
        }
    }

    pub fn extractor(&self) -> &OcrExtractor<E> {
        &self.extractor
    }

    /// Decode `data`, preprocess it, run structured OCR on the processed
    /// image, and attach regions and tables found on the original image.
    ///
    /// # Errors
    ///
    /// Fails when the bytes cannot be decoded or the engine fails.
    #[instrument(skip_all, fields(data_len = data.len()))]
    pub fn process_document(
        &self,
        data: &[u8],
        preprocessing: Option<&PreprocessingConfig>,
        ocr: Option<&OcrConfig>,
    ) -> Result<ProcessedDocument> {
        let preprocessor = Preprocessor::new(preprocessing.unwrap_or(&self.preprocessing).clone());
        let ocr_config = ocr.unwrap_or(&self.ocr);

        let original = Preprocessor::load(data)?;
        let prepared = preprocessor.preprocess_image(original.clone());

        let mut result = self
            .extractor
            .extract_text_with_data(&prepared.image, ocr_config)?;

        // Regions and tables may overlap; both lists are kept as found.
        let mut regions = detect_document_regions(&original, DEFAULT_MIN_REGION_AREA);
        regions.extend(detect_tables(&original));
        result.detected_regions = regions;

        let metadata = ProcessingMetadata {
            original_size: prepared.original_size,
            processed_size: prepared.processed_size,
            steps_applied: prepared.steps_applied,
            deskew_angle: prepared.deskew_angle,
            word_count: result.word_count,
            average_confidence: result.average_confidence,
            region_count: result.detected_regions.len(),
        };

        info!(
            words = metadata.word_count,
            regions = metadata.region_count,
            average_confidence = metadata.average_confidence,
            "Document processed"
        );

        Ok(ProcessedDocument {
            ocr: result,
            metadata,
        })
    }
}
