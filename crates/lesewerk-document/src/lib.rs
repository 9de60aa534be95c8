// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// lesewerk-document — Scan preprocessing and structured OCR for Lesewerk.
//
// Turns raw phone or flatbed scans into OCR-ready images (resize, denoise,
// deskew, binarize), extracts hierarchical text through a pluggable
// recognition engine, and detects headers, tables, and signature blocks.

pub mod image;
pub mod ocr;
pub mod pipeline;
pub mod scan;

// Re-export the primary structs so callers can use `lesewerk_document::Preprocessor` etc.
pub use self::image::processor::ImageProcessor;
pub use ocr::{OcrExtractor, RecognitionEngine, TesseractEngine};
pub use pipeline::{DocumentProcessor, ProcessedDocument, ProcessingMetadata};
pub use scan::{PreprocessingResult, PreprocessingStep, Preprocessor};
