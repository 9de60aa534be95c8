// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanning pipeline — noise reduction, skew estimation and correction, and
// adaptive binarization of raw document scans.

pub mod denoise;
pub mod preprocess;
pub mod skew;
pub mod threshold;

pub use preprocess::{PreprocessingResult, PreprocessingStep, Preprocessor};
