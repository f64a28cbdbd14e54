// SPDX-License-Identifier: MIT OR Apache-2.0
//! Layer results, the aggregated scorecard, verdicts, and exit codes.

use crate::job::{LayerId, ScoreScale};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Exit code when every enabled layer passed and the overall gate cleared.
pub const EXIT_PASS: i32 = 0;
/// Exit code for a genuine quality failure (layer gate or overall gate).
pub const EXIT_QUALITY: i32 = 1;
/// Exit code for infrastructure faults: transport down, invalid config,
/// exhausted wall-clock budget. Distinguishes retryable faults from
/// quality failures in CI.
pub const EXIT_INFRA: i32 = 3;

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// Severity of one finding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational note; never gates.
    Info,
    /// Degradation worth surfacing; never gates on its own.
    Warning,
    /// Fails the owning layer unless the layer explicitly permits it.
    Critical,
}

/// One observation produced by a validation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    /// How serious the observation is.
    pub severity: Severity,
    /// Machine-stable grouping key (e.g. `"font"`, `"color"`, `"overflow"`).
    pub category: String,
    /// Human-readable description.
    pub message: String,
    /// 1-based page number, when the finding is page-local.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Free-form locator (element id, bounding box, token).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
}

impl Finding {
    /// Construct a critical finding.
    #[must_use]
    pub fn critical(category: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Critical, category, message)
    }

    /// Construct a warning finding.
    #[must_use]
    pub fn warning(category: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, message)
    }

    /// Construct an info finding.
    #[must_use]
    pub fn info(category: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, category, message)
    }

    fn new(severity: Severity, category: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.to_string(),
            message: message.into(),
            page: None,
            locator: None,
        }
    }

    /// Attach a page number.
    #[must_use]
    pub fn on_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Attach a locator.
    #[must_use]
    pub fn at(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Layer results
// ---------------------------------------------------------------------------

/// The outcome of one validation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LayerResult {
    /// Which layer produced this result.
    pub layer: LayerId,
    /// Score on the layer's native scale.
    pub score: f64,
    /// Maximum score on that scale.
    pub max_score: f64,
    /// Whether the layer gate passed.
    pub passed: bool,
    /// Whether the layer was skipped (disabled, missing baseline, or
    /// short-circuited by an earlier failure).
    pub skipped: bool,
    /// Set when a provider ran in dry-run mode and the score is synthetic.
    #[serde(default)]
    pub dry_run: bool,
    /// First-attempt score preserved across an auto-fix retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_attempt_score: Option<f64>,
    /// Observations recorded while the layer ran.
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Wall-clock duration of the layer.
    pub duration_ms: u64,
    /// Paths of subreports the layer wrote.
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
}

impl LayerResult {
    /// A skipped layer that counts as passed (disabled, or no baseline).
    #[must_use]
    pub fn skipped_passing(layer: LayerId) -> Self {
        let max = layer.scale().max();
        Self {
            layer,
            score: max,
            max_score: max,
            passed: true,
            skipped: true,
            dry_run: false,
            first_attempt_score: None,
            findings: Vec::new(),
            duration_ms: 0,
            artifacts: Vec::new(),
        }
    }

    /// A layer skipped because an earlier layer already failed. Keeps the
    /// overall failure signal: `skipped` and `passed == false`.
    #[must_use]
    pub fn skipped_after_failure(layer: LayerId) -> Self {
        Self {
            passed: false,
            score: 0.0,
            ..Self::skipped_passing(layer)
        }
    }

    /// `true` when any finding is [`Severity::Critical`].
    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity == Severity::Critical)
    }

    /// Normalized score in `[0, 1]`.
    #[must_use]
    pub fn normalized(&self) -> f64 {
        if self.max_score > 0.0 {
            (self.score / self.max_score).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// Letter grade derived from the overall score. Informational, not gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Verdict {
    /// ≥ the A+ band.
    #[serde(rename = "A+")]
    APlus,
    /// ≥ the A band.
    A,
    /// ≥ the B band.
    B,
    /// ≥ the C band.
    C,
    /// Below every band.
    F,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::APlus => write!(f, "A+"),
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
            Self::F => write!(f, "F"),
        }
    }
}

/// Verdict band thresholds, expressed on the grade (0–100) scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VerdictBands {
    /// Floor of the A+ band.
    pub a_plus: f64,
    /// Floor of the A band.
    pub a: f64,
    /// Floor of the B band.
    pub b: f64,
    /// Floor of the C band.
    pub c: f64,
}

impl Default for VerdictBands {
    fn default() -> Self {
        Self {
            a_plus: 95.0,
            a: 90.0,
            b: 80.0,
            c: 70.0,
        }
    }
}

impl VerdictBands {
    /// Band an overall score. The input is converted from `scale` onto the
    /// grade scale before comparison, so callers never mix scales.
    #[must_use]
    pub fn verdict(&self, overall: f64, scale: ScoreScale) -> Verdict {
        let grade = scale.convert(overall, ScoreScale::Grade);
        if grade >= self.a_plus {
            Verdict::APlus
        } else if grade >= self.a {
            Verdict::A
        } else if grade >= self.b {
            Verdict::B
        } else if grade >= self.c {
            Verdict::C
        } else {
            Verdict::F
        }
    }
}

// ---------------------------------------------------------------------------
// Error categories
// ---------------------------------------------------------------------------

/// Top-level taxonomy of run failures; each category maps to one exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed job, missing field, weight-sum mismatch.
    Configuration,
    /// Proxy unreachable, registration refused, session died, timeout.
    Transport,
    /// The layout application rejected or failed a script.
    Script,
    /// The export itself failed.
    Export,
    /// A validation layer gated the run.
    Validation,
    /// The auto-fix retry did not recover the run.
    Remediation,
    /// An external provider misbehaved and the job opted into failing.
    Provider,
    /// Output path unwritable or other filesystem fault.
    Io,
}

impl ErrorCategory {
    /// The process exit code this category maps to.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Configuration | Self::Transport | Self::Io => EXIT_INFRA,
            Self::Script
            | Self::Export
            | Self::Validation
            | Self::Remediation
            | Self::Provider => EXIT_QUALITY,
        }
    }

    /// Stable lowercase label used in scorecards and logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Transport => "transport",
            Self::Script => "script",
            Self::Export => "export",
            Self::Validation => "validation",
            Self::Remediation => "remediation",
            Self::Provider => "provider",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The error block embedded in a scorecard when a run dies on infrastructure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunError {
    /// Which taxonomy bucket the failure falls in.
    pub category: ErrorCategory,
    /// Human-readable description.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Run audit
// ---------------------------------------------------------------------------

/// Thread-safe audit trail collected while a pipeline runs and flushed into
/// the scorecard's metadata. The layout worker records the export preset
/// here *before* issuing the export.
#[derive(Debug, Clone, Default)]
pub struct RunAudit {
    entries: Arc<Mutex<BTreeMap<String, serde_json::Value>>>,
}

impl RunAudit {
    /// Create an empty audit trail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key-value entry. Later writes to the same key win.
    pub fn record(&self, key: &str, value: serde_json::Value) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value);
        }
    }

    /// Snapshot of all recorded entries.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, serde_json::Value> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Scorecard
// ---------------------------------------------------------------------------

/// The aggregated result document for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scorecard {
    /// Job this scorecard describes.
    pub job_id: String,
    /// Weighted overall score on the rubric (0–150) scale.
    pub overall: f64,
    /// Scale `overall` is expressed on; always [`ScoreScale::Rubric`].
    pub overall_scale: ScoreScale,
    /// Every layer result, in execution order.
    pub per_layer: Vec<LayerResult>,
    /// Whether all enabled layers passed and the overall gate cleared.
    pub overall_passed: bool,
    /// Letter grade banded from `overall`.
    pub verdict: Verdict,
    /// Wall-clock duration of the whole run.
    pub duration_ms: u64,
    /// Process exit code this run maps to.
    pub exit_code: i32,
    /// When the scorecard was produced.
    pub produced_at: DateTime<Utc>,
    /// Present when the run failed before or outside validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    /// Audit entries (export preset, retry counters, provider notes).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Scorecard {
    /// A partial scorecard for a run that died before validation completed.
    /// Carries the minimum contract fields; the exit code follows the
    /// error category (3 for infrastructure, 1 for production failures).
    #[must_use]
    pub fn from_error(job_id: &str, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            overall: 0.0,
            overall_scale: ScoreScale::Rubric,
            per_layer: Vec::new(),
            overall_passed: false,
            verdict: Verdict::F,
            duration_ms: 0,
            exit_code: category.exit_code(),
            produced_at: Utc::now(),
            error: Some(RunError {
                category,
                message: message.into(),
            }),
            metadata: BTreeMap::new(),
        }
    }

    /// Result for `layer`, if present.
    #[must_use]
    pub fn layer(&self, layer: LayerId) -> Option<&LayerResult> {
        self.per_layer.iter().find(|r| r.layer == layer)
    }
}
