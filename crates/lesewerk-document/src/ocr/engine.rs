// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition engine seam. The extractor only needs plain text and
// per-token records; any engine that can produce both plugs in here.

use image::GrayImage;
use lesewerk_core::error::Result;
use lesewerk_core::{OcrConfig, OcrWord};

/// Row level of a word token in the engine's page/block/paragraph/line/word
/// hierarchy.
pub const WORD_LEVEL: u32 = 5;

/// One raw record emitted by an engine in per-token mode.
///
/// `confidence` is on a 0–100 scale; engines report `-1` for rows that carry
/// no recognition result.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrToken {
    pub level: u32,
    pub block_num: u32,
    pub par_num: u32,
    pub line_num: u32,
    pub word_num: u32,
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f64,
    pub text: String,
}

impl OcrToken {
    /// Convert into an [`OcrWord`], trimming surrounding whitespace.
    pub fn into_word(self) -> OcrWord {
        OcrWord {
            text: self.text.trim().to_owned(),
            confidence: self.confidence,
            x: self.left,
            y: self.top,
            width: self.width,
            height: self.height,
            block_num: self.block_num,
            par_num: self.par_num,
            line_num: self.line_num,
            word_num: self.word_num,
        }
    }
}

/// A text recognition backend.
///
/// Implementations must be safe to share between worker threads; each call
/// receives its own image buffer.
pub trait RecognitionEngine: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Recognise all text in `image`, returning it as plain text.
    fn recognize_text(&self, image: &GrayImage, config: &OcrConfig) -> Result<String>;

    /// Recognise `image` in per-token mode.
    fn recognize_tokens(&self, image: &GrayImage, config: &OcrConfig) -> Result<Vec<OcrToken>>;
}

impl<E: RecognitionEngine + ?Sized> RecognitionEngine for &E {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn recognize_text(&self, image: &GrayImage, config: &OcrConfig) -> Result<String> {
        (**self).recognize_text(image, config)
    }

    fn recognize_tokens(&self, image: &GrayImage, config: &OcrConfig) -> Result<Vec<OcrToken>> {
        (**self).recognize_tokens(image, config)
    }
}

impl<E: RecognitionEngine + ?Sized> RecognitionEngine for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn recognize_text(&self, image: &GrayImage, config: &OcrConfig) -> Result<String> {
        (**self).recognize_text(image, config)
    }

    fn recognize_tokens(&self, image: &GrayImage, config: &OcrConfig) -> Result<Vec<OcrToken>> {
        (**self).recognize_tokens(image, config)
    }
}
