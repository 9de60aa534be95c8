// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Lesewerk.

use thiserror::Error;

/// Top-level error type for all Lesewerk operations.
///
/// Only malformed input (undecodable bytes, corrupt fingerprint blobs, bad
/// config files) and recognition-engine failures surface to callers.
/// Unusual image *content* never produces an error.
#[derive(Debug, Error)]
pub enum LesewerkError {
    // -- Input errors --
    #[error("image decode failed: {0}")]
    Decode(String),

    // -- Recognition engine --
    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("recognition engine unavailable: {0}")]
    EngineUnavailable(String),

    // -- Recoverable pipeline stage failure (caught internally) --
    #[error("{stage} stage failed: {detail}")]
    StageFailure { stage: &'static str, detail: String },

    // -- Template fingerprints --
    #[error("invalid feature fingerprint: {0}")]
    Fingerprint(String),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    // -- Configuration / persistence --
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LesewerkError {
    /// Build a [`LesewerkError::StageFailure`] for the named pipeline stage.
    pub fn stage(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::StageFailure {
            stage,
            detail: detail.into(),
        }
    }

    /// Whether the pipeline is expected to recover from this error on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::StageFailure { .. })
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LesewerkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_failure_is_recoverable() {
        let err = LesewerkError::stage("binarize", "block larger than image");
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "binarize stage failed: block larger than image"
        );
    }

    #[test]
    fn decode_error_is_terminal() {
        let err = LesewerkError::Decode("not a PNG".into());
        assert!(!err.is_recoverable());
    }
}
