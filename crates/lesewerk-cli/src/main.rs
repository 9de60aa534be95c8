// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lesewerk — document digitization core.
//
// Entry point. Initialises logging, loads the pipeline configuration, and
// dispatches to one of the processing commands. Every command prints its
// result as JSON on stdout; logs go to stderr.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lesewerk_core::{Annotation, PipelineConfig, Template};
use lesewerk_document::{
    DocumentProcessor, ImageProcessor, OcrExtractor, Preprocessor, TesseractEngine,
};
use lesewerk_match::TemplateMatcher;

/// Scan preprocessing, structured OCR, and template field relocation.
#[derive(Parser, Debug)]
#[command(name = "lesewerk")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Pipeline configuration (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Tesseract executable to use for recognition
    #[arg(long, global = true)]
    tesseract: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resize, denoise, deskew, and binarize a scan
    Preprocess {
        image: PathBuf,

        /// Where to write the processed PNG
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Preprocess, recognise text, and detect layout regions
    Ocr { image: PathBuf },

    /// Recognise the text inside each annotation's bounding box
    Fields {
        image: PathBuf,

        /// JSON array of annotations
        #[arg(short, long)]
        annotations: PathBuf,
    },

    /// Capture the feature fingerprint of a template source image
    Fingerprint {
        image: PathBuf,

        /// Where to write the fingerprint blob
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Locate a template in a document and relocate its fields
    Match {
        image: PathBuf,

        /// Template record (JSON)
        #[arg(short, long)]
        template: PathBuf,

        /// Fingerprint blob overriding the one stored on the template
        #[arg(short, long)]
        fingerprint: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let engine = match &cli.tesseract {
        Some(binary) => TesseractEngine::with_binary(binary),
        None => TesseractEngine::default(),
    };

    tracing::info!(command = ?cli.command, "Lesewerk starting");

    match cli.command {
        Command::Preprocess { image, output } => {
            let data = read(&image)?;
            let result = Preprocessor::new(config.preprocessing).preprocess(&data)?;
            let png = ImageProcessor::from_dynamic(result.image).to_png_bytes()?;
            fs::write(&output, png).with_context(|| format!("writing {}", output.display()))?;
            print_json(&serde_json::json!({
                "output": output,
                "original_size": result.original_size,
                "processed_size": result.processed_size,
                "deskew_angle": result.deskew_angle,
                "steps_applied": result.steps_applied,
            }))
        }

        Command::Ocr { image } => {
            let data = read(&image)?;
            let processor = DocumentProcessor::with_config(engine, config.preprocessing, config.ocr);
            let document = processor.process_document(&data, None, None)?;
            print_json(&document)
        }

        Command::Fields { image, annotations } => {
            let data = read(&image)?;
            let annotations: Vec<Annotation> = serde_json::from_slice(&read(&annotations)?)
                .with_context(|| format!("parsing annotations from {}", annotations.display()))?;
            let page = ImageProcessor::from_bytes(&data)?.into_dynamic();
            let filled = OcrExtractor::new(engine).extract_text_for_annotations(&page, annotations, &config.ocr)?;
            print_json(&filled)
        }

        Command::Fingerprint { image, output } => {
            let data = read(&image)?;
            let page = ImageProcessor::from_bytes(&data)?.into_dynamic();
            let blob = TemplateMatcher::new(config.matching).capture_fingerprint(&page)?;
            fs::write(&output, &blob).with_context(|| format!("writing {}", output.display()))?;
            print_json(&serde_json::json!({
                "output": output,
                "bytes": blob.len(),
            }))
        }

        Command::Match {
            image,
            template,
            fingerprint,
        } => {
            let data = read(&image)?;
            let mut record: Template = serde_json::from_slice(&read(&template)?)
                .with_context(|| format!("parsing template from {}", template.display()))?;
            if let Some(path) = fingerprint {
                record.feature_keypoints = Some(read(&path)?);
            }
            let result = TemplateMatcher::new(config.matching).match_template_bytes(&record, &data)?;
            print_json(&result)
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
