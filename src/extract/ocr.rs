//! Text recognition for image uploads.
//!
//! The default engine shells out to the `tesseract` CLI and reads its TSV
//! report, which carries both the words and a per-word confidence. Each
//! preprocessed variant is read under every configured segmentation mode
//! until one reading is confident enough or the time budget runs out.

use std::{
    path::Path,
    process::Stdio,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{OcrConfig, OcrMode};

use super::preprocess::{self, Variant};

/// Uniform block, then sparse text.
const PSMS_FAST: &[u8] = &[6, 11];
const PSMS_FULL: &[u8] = &[6, 11, 3, 7, 8, 4, 13];
const EARLY_STOP_CONFIDENCE: f64 = 0.70;
const EARLY_STOP_MIN_CHARS: usize = 10;
/// Whitelisted readings get a small edge over unconstrained ones.
const WHITELIST_BONUS: f64 = 0.02;

static HORIZONTAL_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+").expect("valid whitespace regex"));
static BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid blank line regex"));

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    /// Mean word confidence in `[0, 1]`; `0` when no word was recognized.
    pub confidence: f64,
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine not available: {0}")]
    NotAvailable(String),
    #[error("OCR failed: {0}")]
    Failed(String),
    #[error("OCR timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn recognize(&self, image: &[u8], language: &str) -> Result<OcrOutput, OcrError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pass {
    psm: u8,
    whitelist: bool,
}

#[derive(Debug, Clone)]
pub struct TesseractOcr {
    config: OcrConfig,
}

impl TesseractOcr {
    pub fn new(config: OcrConfig) -> Self {
        Self { config }
    }

    fn passes(&self) -> Vec<Pass> {
        let psms = match self.config.mode {
            OcrMode::Fast => PSMS_FAST,
            OcrMode::Aggressive => PSMS_FULL,
        };
        let mut passes: Vec<Pass> = psms
            .iter()
            .map(|&psm| Pass { psm, whitelist: false })
            .collect();
        if self.config.whitelist.is_some() {
            let whitelisted = match self.config.mode {
                OcrMode::Fast => &PSMS_FAST[..1],
                OcrMode::Aggressive => PSMS_FULL,
            };
            passes.extend(whitelisted.iter().map(|&psm| Pass { psm, whitelist: true }));
        }
        passes
    }

    async fn prepare_variants(&self, image: &[u8]) -> Vec<Variant> {
        let bytes = image.to_vec();
        let (mode, upscale) = (self.config.mode, self.config.upscale);
        match tokio::task::spawn_blocking(move || preprocess::variants(&bytes, mode, upscale)).await {
            Ok(Ok(variants)) if !variants.is_empty() => variants,
            Ok(Ok(_)) => vec![Variant::original(image)],
            Ok(Err(err)) => {
                debug!(target: "ocr", error = %err, "preprocessing skipped; reading the upload as is");
                vec![Variant::original(image)]
            }
            Err(err) => {
                warn!(target: "ocr", error = %err, "preprocessing task failed");
                vec![Variant::original(image)]
            }
        }
    }

    async fn run_passes(&self, image: &[u8], language: &str) -> Result<OcrOutput, OcrError> {
        let started = Instant::now();
        let variants = self.prepare_variants(image).await;
        let passes = self.passes();
        let mut best: Option<OcrOutput> = None;

        'variants: for variant in &variants {
            let temp_file = NamedTempFile::new()
                .map_err(|e| OcrError::Failed(format!("failed to create temp file: {e}")))?;
            tokio::fs::write(temp_file.path(), &variant.image)
                .await
                .map_err(|e| OcrError::Failed(format!("failed to write image: {e}")))?;

            for &pass in &passes {
                let mut output = match self.run_tesseract(temp_file.path(), language, pass).await {
                    Ok(output) => output,
                    Err(err) if best.is_some() => {
                        warn!(target: "ocr", variant = %variant.tag, psm = pass.psm, error = %err, "OCR pass failed; keeping earlier result");
                        break 'variants;
                    }
                    Err(err) => return Err(err),
                };
                if pass.whitelist {
                    output.confidence = (output.confidence + WHITELIST_BONUS).min(1.0);
                }
                debug!(
                    target: "ocr",
                    variant = %variant.tag,
                    psm = pass.psm,
                    whitelist = pass.whitelist,
                    chars = output.text.chars().count(),
                    confidence = output.confidence,
                    "OCR pass finished"
                );

                let early_stop = output.confidence >= EARLY_STOP_CONFIDENCE
                    && output.text.chars().count() >= EARLY_STOP_MIN_CHARS;
                if !output.text.is_empty()
                    && best
                        .as_ref()
                        .map_or(true, |current| output.confidence > current.confidence)
                {
                    best = Some(output);
                }
                if early_stop {
                    break 'variants;
                }
                if started.elapsed() > self.config.time_budget {
                    debug!(target: "ocr", elapsed_ms = started.elapsed().as_millis() as u64, "OCR time budget spent");
                    break 'variants;
                }
            }
        }

        Ok(best.unwrap_or_default())
    }

    async fn run_tesseract(
        &self,
        image_path: &Path,
        language: &str,
        pass: Pass,
    ) -> Result<OcrOutput, OcrError> {
        let mut cmd = Command::new(&self.config.tesseract_cmd);
        cmd.arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .arg("--oem")
            .arg("3")
            .arg("--psm")
            .arg(pass.psm.to_string());
        if let (true, Some(chars)) = (pass.whitelist, self.config.whitelist.as_deref()) {
            cmd.arg("-c").arg(format!("tessedit_char_whitelist={chars}"));
        }
        cmd.arg("tsv")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OcrError::NotAvailable(format!(
                    "tesseract not found at '{}'",
                    self.config.tesseract_cmd.display()
                ))
            } else {
                OcrError::Failed(format!("failed to run tesseract: {e}"))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(format!(
                "tesseract exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn recognize(&self, image: &[u8], language: &str) -> Result<OcrOutput, OcrError> {
        let hard_limit = self.config.timeout;
        tokio::time::timeout(hard_limit, self.run_passes(image, language))
            .await
            .map_err(|_| OcrError::Timeout(hard_limit))?
    }
}

/// Rebuilds text from a tesseract TSV report.
///
/// Words (level 5) with a non-negative confidence are kept; words sharing a
/// block/paragraph/line id form one line and a new paragraph starts after a
/// blank line.
pub fn parse_tsv(tsv: &str) -> OcrOutput {
    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut current_line: Option<(&str, &str, &str, &str)> = None;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let Ok(conf) = cols[10].trim().parse::<f64>() else {
            continue;
        };
        let word = cols[11].trim();
        if conf < 0.0 || word.is_empty() {
            continue;
        }

        let line_id = (cols[1], cols[2], cols[3], cols[4]);
        match current_line {
            Some(prev) if prev == line_id => text.push(' '),
            Some(prev) if (prev.0, prev.1, prev.2) == (line_id.0, line_id.1, line_id.2) => {
                text.push('\n')
            }
            Some(_) => text.push_str("\n\n"),
            None => {}
        }
        current_line = Some(line_id);

        text.push_str(word);
        confidences.push(conf);
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        (confidences.iter().sum::<f64>() / confidences.len() as f64 / 100.0).clamp(0.0, 1.0)
    };

    OcrOutput {
        text: clean_text(&text),
        confidence,
    }
}

/// Collapses runs of spaces and limits blank lines to one.
pub fn clean_text(text: &str) -> String {
    let text = HORIZONTAL_SPACE.replace_all(text, " ");
    BLANK_LINES.replace_all(&text, "\n\n").trim().to_string()
}
