// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OCR module — recognition engine seam, Tesseract backend, structured
// extraction, and layout detection.

pub mod engine;
pub mod extractor;
pub mod layout;
pub mod tesseract;

pub use engine::{OcrToken, RecognitionEngine};
pub use extractor::{OcrExtractor, assemble_result, map_coordinates};
pub use layout::{detect_document_regions, detect_tables};
pub use tesseract::TesseractEngine;
