// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tesseract recognition engine.
//
// Drives the `tesseract` executable over stdin/stdout: the image is piped in
// as PNG and the result is read back either as plain text or as TSV (one row
// per page/block/paragraph/line/word with box and confidence).
//
// # Setup
//
// The binary and language data must be installed separately, e.g.
//
//   ```sh
//   apt install tesseract-ocr tesseract-ocr-eng
//   ```
//
// A non-default binary can be selected with [`TesseractEngine::with_binary`]
// or the `LESEWERK_TESSERACT` environment variable.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::{GrayImage, ImageFormat};
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::OcrConfig;
use tracing::{debug, info, instrument, warn};

use super::engine::{OcrToken, RecognitionEngine, WORD_LEVEL};

/// Environment variable overriding the binary location.
pub const BINARY_ENV_VAR: &str = "LESEWERK_TESSERACT";

const DEFAULT_BINARY: &str = "tesseract";

/// Output formats requested from the binary.
#[derive(Debug, Clone, Copy)]
enum OutputFormat {
    Text,
    Tsv,
}

/// Tesseract-backed [`RecognitionEngine`].
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
}

impl Default for TesseractEngine {
    fn default() -> Self {
        let binary = std::env::var_os(BINARY_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY));
        Self { binary }
    }
}

impl TesseractEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `tesseract` executable.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Whether the binary can be executed at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Build the argument list for one invocation.
    fn arguments(config: &OcrConfig, format: OutputFormat) -> Vec<String> {
        let mut args = vec![
            "stdin".to_owned(),
            "stdout".to_owned(),
            "-l".to_owned(),
            config.language.clone(),
            "--oem".to_owned(),
            config.engine_mode.to_string(),
            "--psm".to_owned(),
            config.page_segmentation_mode.to_string(),
        ];
        args.extend(config.engine_flags.iter().cloned());
        if let OutputFormat::Tsv = format {
            args.push("tsv".to_owned());
        }
        args
    }

    #[instrument(skip(self, image, config), fields(
        width = image.width(),
        height = image.height(),
        format = ?format,
    ))]
    fn run(&self, image: &GrayImage, config: &OcrConfig, format: OutputFormat) -> Result<String> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|err| LesewerkError::Ocr(format!("failed to encode OCR input: {}", err)))?;

        let mut child = Command::new(&self.binary)
            .args(Self::arguments(config, format))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => LesewerkError::EngineUnavailable(format!(
                    "{} not found; install Tesseract or set {}",
                    self.binary.display(),
                    BINARY_ENV_VAR
                )),
                _ => LesewerkError::Ocr(format!(
                    "failed to start {}: {}",
                    self.binary.display(),
                    err
                )),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(&png) {
                drop(stdin);
                // Closing stdin lets the child finish; reap it before failing.
                let stderr = child
                    .wait_with_output()
                    .map(|output| String::from_utf8_lossy(&output.stderr).trim().to_owned())
                    .unwrap_or_default();
                return Err(LesewerkError::Ocr(format!(
                    "failed to send image to {}: {} {}",
                    self.binary.display(),
                    err,
                    stderr
                )));
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LesewerkError::Ocr(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(bytes = stdout.len(), "Engine output received");
        Ok(stdout)
    }
}

impl RecognitionEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize_text(&self, image: &GrayImage, config: &OcrConfig) -> Result<String> {
        let text = self.run(image, config, OutputFormat::Text)?;
        info!(chars = text.len(), "Plain-text recognition complete");
        Ok(text)
    }

    fn recognize_tokens(&self, image: &GrayImage, config: &OcrConfig) -> Result<Vec<OcrToken>> {
        let tsv = self.run(image, config, OutputFormat::Tsv)?;
        let tokens = parse_tsv(&tsv);
        info!(tokens = tokens.len(), "Token recognition complete");
        Ok(tokens)
    }
}

/// Parse Tesseract TSV output into word-level tokens.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num, left,
/// top, width, height, conf, text. The header row, non-word rows, and
/// malformed rows are skipped.
pub fn parse_tsv(tsv: &str) -> Vec<OcrToken> {
    let mut tokens = Vec::new();
    for (line_no, row) in tsv.lines().enumerate() {
        if row.is_empty() || row.starts_with("level") {
            continue;
        }
        match parse_row(row) {
            Some(token) if token.level == WORD_LEVEL => tokens.push(token),
            Some(_) => {}
            None => warn!(line_no, "Skipping malformed TSV row"),
        }
    }
    tokens
}

fn parse_row(row: &str) -> Option<OcrToken> {
    let mut fields = row.splitn(12, '\t');
    let mut int = || fields.next()?.trim().parse::<i64>().ok();

    let level = int()? as u32;
    let _page_num = int()?;
    let block_num = int()? as u32;
    let par_num = int()? as u32;
    let line_num = int()? as u32;
    let word_num = int()? as u32;
    let left = int()? as i32;
    let top = int()? as i32;
    let width = int()? as i32;
    let height = int()? as i32;
    let confidence = fields.next()?.trim().parse::<f64>().ok()?;
    let text = fields.next().unwrap_or("").to_owned();

    Some(OcrToken {
        level,
        block_num,
        par_num,
        line_num,
        word_num,
        left,
        top,
        width,
        height,
        confidence,
        text,
    })
}
