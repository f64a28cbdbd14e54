// SPDX-License-Identifier: MIT OR Apache-2.0
//! Report sinks: deterministic output paths plus JSON and text renderers.
//!
//! Every run writes a machine-readable scorecard and a human-readable
//! summary, even on failure. Filenames derive from the job id so two runs
//! of the same job overwrite rather than accumulate.

use crate::job::{Intent, LayerId};
use crate::scorecard::Scorecard;
use crate::CoreError;
use std::path::{Path, PathBuf};

/// Deterministic output locations for one job.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    /// Directory the primary PDF artifact is written to.
    pub out_dir: PathBuf,
    /// Root directory for scorecards and per-layer subreports.
    pub report_dir: PathBuf,
}

impl ReportPaths {
    /// Create the path set rooted at the given directories.
    #[must_use]
    pub fn new(out_dir: impl Into<PathBuf>, report_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            report_dir: report_dir.into(),
        }
    }

    /// `<outdir>/<jobId>-<intent>.pdf`
    #[must_use]
    pub fn artifact_pdf(&self, job_id: &str, intent: Intent) -> PathBuf {
        self.out_dir.join(format!("{job_id}-{intent}.pdf"))
    }

    /// `<reportdir>/pipeline/<jobId>-scorecard.json`
    #[must_use]
    pub fn scorecard_json(&self, job_id: &str) -> PathBuf {
        self.report_dir
            .join("pipeline")
            .join(format!("{job_id}-scorecard.json"))
    }

    /// `<reportdir>/pipeline/<jobId>-report.txt`
    #[must_use]
    pub fn report_txt(&self, job_id: &str) -> PathBuf {
        self.report_dir
            .join("pipeline")
            .join(format!("{job_id}-report.txt"))
    }

    /// `<reportdir>/<layer>/<jobId>-<layer>.json`
    #[must_use]
    pub fn layer_report(&self, job_id: &str, layer: LayerId) -> PathBuf {
        self.report_dir
            .join(layer.slug())
            .join(format!("{job_id}-{}.json", layer.slug()))
    }

    /// `<reportdir>/experiments/<jobId>-<timestamp>.json`
    #[must_use]
    pub fn experiment_summary(&self, job_id: &str, timestamp: &str) -> PathBuf {
        self.report_dir
            .join("experiments")
            .join(format!("{job_id}-{timestamp}.json"))
    }
}

/// Writes scorecards and subreports to their deterministic locations.
#[derive(Debug, Clone)]
pub struct ReportSink {
    paths: ReportPaths,
}

impl ReportSink {
    /// Create a sink over the given path set.
    #[must_use]
    pub fn new(paths: ReportPaths) -> Self {
        Self { paths }
    }

    /// The underlying path set.
    #[must_use]
    pub fn paths(&self) -> &ReportPaths {
        &self.paths
    }

    /// Write the scorecard JSON and the text summary. Returns the JSON path.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] when a directory cannot be created or a file
    /// cannot be written.
    pub fn write_scorecard(&self, card: &Scorecard) -> Result<PathBuf, CoreError> {
        let json_path = self.paths.scorecard_json(&card.job_id);
        write_json(&json_path, card)?;
        let txt_path = self.paths.report_txt(&card.job_id);
        write_text(&txt_path, &render_text_report(card))?;
        Ok(json_path)
    }

    /// Write one layer's subreport. Returns the written path.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on directory or write failure.
    pub fn write_layer_report(
        &self,
        job_id: &str,
        layer: LayerId,
        body: &impl serde::Serialize,
    ) -> Result<PathBuf, CoreError> {
        let path = self.paths.layer_report(job_id, layer);
        write_json(&path, body)?;
        Ok(path)
    }

    /// Write an experiment summary. Returns the written path.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on directory or write failure.
    pub fn write_experiment_summary(
        &self,
        job_id: &str,
        timestamp: &str,
        body: &impl serde::Serialize,
    ) -> Result<PathBuf, CoreError> {
        let path = self.paths.experiment_summary(job_id, timestamp);
        write_json(&path, body)?;
        Ok(path)
    }
}

fn write_json(path: &Path, body: &impl serde::Serialize) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(body)?;
    std::fs::write(path, text)?;
    Ok(())
}

fn write_text(path: &Path, body: &str) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, body)?;
    Ok(())
}

/// Render the human-readable summary for one scorecard.
#[must_use]
pub fn render_text_report(card: &Scorecard) -> String {
    let mut out = String::new();
    out.push_str(&format!("job:      {}\n", card.job_id));
    out.push_str(&format!(
        "overall:  {:.1}/{:.0} ({})\n",
        card.overall,
        card.overall_scale.max(),
        card.verdict
    ));
    out.push_str(&format!(
        "status:   {}\n",
        if card.overall_passed { "PASSED" } else { "FAILED" }
    ));
    out.push_str(&format!("exit:     {}\n", card.exit_code));
    out.push_str(&format!("duration: {}ms\n", card.duration_ms));
    if let Some(err) = &card.error {
        out.push_str(&format!("error:    [{}] {}\n", err.category, err.message));
    }
    out.push('\n');
    for layer in &card.per_layer {
        let status = if layer.skipped {
            "skip"
        } else if layer.passed {
            "pass"
        } else {
            "FAIL"
        };
        out.push_str(&format!(
            "  {:<6} {:<18} {:>7.2}/{:<6.1} [{}]\n",
            layer.layer.code(),
            layer.layer.slug(),
            layer.score,
            layer.max_score,
            status
        ));
        for finding in &layer.findings {
            let page = finding
                .page
                .map(|p| format!(" p{p}"))
                .unwrap_or_default();
            out.push_str(&format!(
                "         - {:?} {}:{}{}\n",
                finding.severity, finding.category, finding.message, page
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorecard::ErrorCategory;

    #[test]
    fn paths_are_deterministic_per_job() {
        let paths = ReportPaths::new("/out", "/reports");
        assert_eq!(
            paths.artifact_pdf("j1", Intent::Print),
            PathBuf::from("/out/j1-print.pdf")
        );
        assert_eq!(
            paths.scorecard_json("j1"),
            PathBuf::from("/reports/pipeline/j1-scorecard.json")
        );
        assert_eq!(
            paths.layer_report("j1", LayerId::PdfQuality),
            PathBuf::from("/reports/pdf_quality/j1-pdf_quality.json")
        );
    }

    #[test]
    fn scorecard_written_even_on_infra_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ReportSink::new(ReportPaths::new(dir.path(), dir.path()));
        let card = Scorecard::from_error("dead", ErrorCategory::Transport, "proxy down");
        let path = sink.write_scorecard(&card).unwrap();
        let loaded: Scorecard =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(loaded.exit_code, 3);
        assert_eq!(loaded.error.unwrap().category, ErrorCategory::Transport);
        assert!(dir.path().join("pipeline/dead-report.txt").exists());
    }

    #[test]
    fn text_report_lists_layers_and_findings() {
        use crate::scorecard::{Finding, LayerResult};
        let mut card = Scorecard::from_error("txt", ErrorCategory::Validation, "gate");
        card.per_layer.push(LayerResult {
            findings: vec![Finding::critical("font", "unembedded:SomeFont").on_page(2)],
            passed: false,
            skipped: false,
            ..LayerResult::skipped_passing(LayerId::PdfQuality)
        });
        let text = render_text_report(&card);
        assert!(text.contains("pdf_quality"));
        assert!(text.contains("unembedded:SomeFont"));
        assert!(text.contains("FAIL"));
    }
}
