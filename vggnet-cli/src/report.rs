//! Result file writing, reference comparison and JSON export.

use std::{
    fmt::Write as _,
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use vggnet_core::{InferenceOutput, class_name};

/// Confidence differences up to this value are not reported by [`compare_reports`].
pub const CONFIDENCE_TOLERANCE: f32 = 1e-4;

/// Render the report: one `Image NNNN: <class> <confidence>` line per image
/// followed by `Accuracy: <ratio>`.
pub fn render_report(output: &InferenceOutput, truth: &[usize]) -> String {
    let mut text = String::with_capacity(output.len() * 32 + 24);
    for (index, prediction) in output.predictions().enumerate() {
        let _ = writeln!(
            text,
            "Image {index:04}: {} {:.6}",
            class_name(prediction.label),
            prediction.confidence
        );
    }
    let _ = writeln!(text, "Accuracy: {:.6}", output.accuracy(truth));
    text
}

pub fn write_report(path: &Path, output: &InferenceOutput, truth: &[usize]) -> Result<()> {
    fs::write(path, render_report(output, truth))
        .with_context(|| format!("failed to write report {}", path.display()))
}

/// One parsed `Image` line of a report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLine {
    pub index: usize,
    pub class: String,
    pub confidence: f32,
}

/// Parse the `Image` lines of a report; the accuracy line and blank lines are skipped.
pub fn parse_report(text: &str) -> Result<Vec<ReportLine>> {
    let mut lines = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("Image ") else {
            continue;
        };
        let parsed = rest.split_once(':').and_then(|(index, tail)| {
            let mut fields = tail.split_whitespace();
            let class = fields.next()?;
            let confidence = fields.next()?.parse().ok()?;
            Some(ReportLine {
                index: index.trim().parse().ok()?,
                class: class.to_string(),
                confidence,
            })
        });
        let entry =
            parsed.with_context(|| format!("malformed report line {}: '{line}'", number + 1))?;
        lines.push(entry);
    }
    Ok(lines)
}

/// Outcome of comparing two reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Comparison {
    pub images: usize,
    pub label_mismatches: usize,
    pub confidence_mismatches: usize,
    pub max_confidence_delta: f32,
}

impl Comparison {
    /// Labels (and the number of images) agree.
    pub fn labels_match(&self) -> bool {
        self.label_mismatches == 0
    }
}

/// Compare `actual` against `reference` line by line.
///
/// A differing image count fails outright. Label mismatches are counted and
/// logged, as are confidence differences above [`CONFIDENCE_TOLERANCE`].
pub fn compare_reports(actual: &[ReportLine], reference: &[ReportLine]) -> Result<Comparison> {
    anyhow::ensure!(
        actual.len() == reference.len(),
        "report has {} images, the reference has {}",
        actual.len(),
        reference.len()
    );

    let mut comparison = Comparison {
        images: actual.len(),
        ..Comparison::default()
    };
    for (ours, theirs) in actual.iter().zip(reference) {
        if ours.index != theirs.index || ours.class != theirs.class {
            comparison.label_mismatches += 1;
            warn!(
                "image {:04}: '{}' differs from reference image {:04} '{}'",
                ours.index, ours.class, theirs.index, theirs.class
            );
            continue;
        }
        let delta = (ours.confidence - theirs.confidence).abs();
        comparison.max_confidence_delta = comparison.max_confidence_delta.max(delta);
        if delta > CONFIDENCE_TOLERANCE {
            comparison.confidence_mismatches += 1;
            warn!(
                "image {:04}: confidence {:.6} vs reference {:.6}",
                ours.index, ours.confidence, theirs.confidence
            );
        }
    }
    Ok(comparison)
}

/// Read both report files and compare them.
pub fn compare_report_files(actual: &Path, reference: &Path) -> Result<Comparison> {
    let read = |path: &Path| -> Result<Vec<ReportLine>> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read report {}", path.display()))?;
        parse_report(&text).with_context(|| format!("failed to parse {}", path.display()))
    };
    compare_reports(&read(actual)?, &read(reference)?)
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PredictionRecord {
    pub image: usize,
    pub label: usize,
    pub class: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<usize>,
}

pub fn prediction_records(output: &InferenceOutput, truth: &[usize]) -> Vec<PredictionRecord> {
    output
        .predictions()
        .enumerate()
        .map(|(image, prediction)| PredictionRecord {
            image,
            label: prediction.label,
            class: class_name(prediction.label).to_string(),
            confidence: prediction.confidence,
            expected: truth.get(image).copied(),
        })
        .collect()
}

pub fn write_json(path: &Path, records: &[PredictionRecord]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create JSON output {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)
        .with_context(|| format!("failed to write JSON output {}", path.display()))?;
    writer.flush()?;
    Ok(())
}
