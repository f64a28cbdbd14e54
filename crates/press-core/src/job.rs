// SPDX-License-Identifier: MIT OR Apache-2.0
//! The immutable job description and its constituent specs.
//!
//! A [`Job`] is loaded once by `press-config`, validated, and then passed
//! by shared reference through the router, worker, and validation engine.
//! Nothing downstream mutates it; experiment variants are produced by
//! deep-merging overrides into a *clone* of the base job.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Score scales
// ---------------------------------------------------------------------------

/// The scale a score or threshold is expressed on.
///
/// Three scales coexist in this system: per-layer unit scores, the 0–100
/// letter-grade scale the verdict bands use, and the 0–150 rubric scale the
/// overall score and gate threshold use. Every threshold boundary names its
/// scale explicitly; configs that leave the scale ambiguous are rejected at
/// load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScoreScale {
    /// `[0.0, 1.0]` — individual layer scores (L0, L2..L5).
    Unit,
    /// `[0.0, 100.0]` — the letter-grade scale used by verdict banding.
    Grade,
    /// `[0.0, 150.0]` — the rubric scale used by L1 and the overall score.
    Rubric,
}

impl ScoreScale {
    /// The maximum value representable on this scale.
    #[must_use]
    pub fn max(self) -> f64 {
        match self {
            Self::Unit => 1.0,
            Self::Grade => 100.0,
            Self::Rubric => 150.0,
        }
    }

    /// Convert `value` from this scale onto `target`.
    #[must_use]
    pub fn convert(self, value: f64, target: ScoreScale) -> f64 {
        value / self.max() * target.max()
    }
}

impl fmt::Display for ScoreScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "unit"),
            Self::Grade => write!(f, "grade"),
            Self::Rubric => write!(f, "rubric"),
        }
    }
}

/// A threshold paired with the scale it is expressed on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Threshold {
    /// The gate value.
    pub value: f64,
    /// The scale `value` is expressed on.
    pub scale: ScoreScale,
}

impl Threshold {
    /// Construct a threshold on the rubric scale.
    #[must_use]
    pub fn rubric(value: f64) -> Self {
        Self {
            value,
            scale: ScoreScale::Rubric,
        }
    }

    /// The threshold converted to the rubric scale.
    #[must_use]
    pub fn as_rubric(&self) -> f64 {
        self.scale.convert(self.value, ScoreScale::Rubric)
    }

    /// `true` when `value` lies inside `[0, scale.max()]`.
    #[must_use]
    pub fn in_range(&self) -> bool {
        self.value >= 0.0 && self.value <= self.scale.max()
    }
}

// ---------------------------------------------------------------------------
// Job mode / intent
// ---------------------------------------------------------------------------

/// How the job should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Single pipeline run with the job's own thresholds.
    #[default]
    Normal,
    /// Single pipeline run with the elevated world-class gate; implies
    /// print intent.
    WorldClass,
    /// Run N variants and pick a winner by composite score.
    Experiment,
}

/// Export intent: affects both the export preset behaviour and validation
/// expectations (DPI floors, color space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Higher-DPI, CMYK expectations.
    Print,
    /// Lower-DPI, RGB expectations.
    #[default]
    Screen,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Print => write!(f, "print"),
            Self::Screen => write!(f, "screen"),
        }
    }
}

// ---------------------------------------------------------------------------
// Layer identifiers
// ---------------------------------------------------------------------------

/// Identifier of one validation layer, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum LayerId {
    /// Semantic document analysis on rasterized pages.
    Structural,
    /// PDF text-layer content and brand rubric checks.
    Content,
    /// Page geometry, fonts, and image integrity.
    PdfQuality,
    /// Pixel diff against a named baseline.
    VisualRegression,
    /// External multimodal review.
    AiVision,
    /// Accessibility compliance and remediation.
    Accessibility,
}

impl LayerId {
    /// All layers in execution order.
    pub const ALL: [LayerId; 6] = [
        LayerId::Structural,
        LayerId::Content,
        LayerId::PdfQuality,
        LayerId::VisualRegression,
        LayerId::AiVision,
        LayerId::Accessibility,
    ];

    /// Short positional code (`"L0"`..`"L5"`).
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Structural => "L0",
            Self::Content => "L1",
            Self::PdfQuality => "L2",
            Self::VisualRegression => "L3",
            Self::AiVision => "L4",
            Self::Accessibility => "L5",
        }
    }

    /// Stable slug used in config keys and report paths.
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Content => "content",
            Self::PdfQuality => "pdf_quality",
            Self::VisualRegression => "visual_regression",
            Self::AiVision => "ai_vision",
            Self::Accessibility => "accessibility",
        }
    }

    /// The scale this layer's native score is expressed on.
    #[must_use]
    pub fn scale(self) -> ScoreScale {
        match self {
            Self::Content => ScoreScale::Rubric,
            _ => ScoreScale::Unit,
        }
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

// ---------------------------------------------------------------------------
// Per-layer spec
// ---------------------------------------------------------------------------

/// Per-job configuration of one validation layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LayerSpec {
    /// Whether the layer runs at all. A disabled layer is skipped and
    /// counts as passed with full weight.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum score, on the layer's native scale, for the layer to pass.
    #[serde(default)]
    pub min_score: f64,
    /// Weight of this layer in the overall aggregation. Weights across
    /// enabled layers should sum to ≈ 1.0.
    pub weight: f64,
}

fn default_true() -> bool {
    true
}

impl LayerSpec {
    /// A disabled layer spec carrying zero weight.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            min_score: 0.0,
            weight: 0.0,
        }
    }
}

/// Default layer table used when a job omits `layers` entirely.
#[must_use]
pub fn default_layers() -> BTreeMap<LayerId, LayerSpec> {
    let mut layers = BTreeMap::new();
    let spec = |min_score, weight| LayerSpec {
        enabled: true,
        min_score,
        weight,
    };
    layers.insert(LayerId::Structural, spec(0.7, 0.15));
    layers.insert(LayerId::Content, spec(105.0, 0.35));
    layers.insert(LayerId::PdfQuality, spec(1.0, 0.15));
    layers.insert(LayerId::VisualRegression, spec(0.95, 0.10));
    layers.insert(LayerId::AiVision, spec(0.8, 0.15));
    layers.insert(LayerId::Accessibility, spec(0.8, 0.10));
    layers
}

// ---------------------------------------------------------------------------
// Export / QA / experiment specs
// ---------------------------------------------------------------------------

/// Export parameters handed to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExportSpec {
    /// Print or screen output.
    #[serde(default)]
    pub intent: Intent,
    /// Named export profile the layout application must know.
    pub preset: String,
}

/// Quality-gate parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct QaSpec {
    /// Overall gate the scorecard must clear.
    pub threshold: Threshold,
    /// Re-run the worker once with color correction if the content layer
    /// fails on a color finding.
    #[serde(default)]
    pub auto_fix_colors: bool,
    /// Baseline id for visual regression; the layer is skipped when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_baseline: Option<String>,
    /// Treat AI-provider failures as fatal instead of warnings.
    #[serde(default)]
    pub fail_on_ai_error: bool,
    /// Stop at the first failing layer (default) or run every layer.
    #[serde(default = "default_true")]
    pub fail_fast: bool,
}

/// Relative weights for experiment winner selection.
///
/// Normalizations: total/150, brand sub-score/max, `1 − diff/100`,
/// pass/fail as 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExperimentWeights {
    /// Weight of the normalized total score.
    pub total: f64,
    /// Weight of the normalized brand-compliance sub-score.
    pub brand: f64,
    /// Weight of the inverted visual diff.
    pub visual: f64,
    /// Weight of the binary pass/fail term.
    pub passed: f64,
}

impl Default for ExperimentWeights {
    fn default() -> Self {
        Self {
            total: 0.50,
            brand: 0.30,
            visual: 0.15,
            passed: 0.05,
        }
    }
}

impl ExperimentWeights {
    /// Sum of all four weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.total + self.brand + self.visual + self.passed
    }
}

/// Experiment-mode parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExperimentSpec {
    /// How many variants to run.
    pub variant_count: usize,
    /// Explicit per-variant overrides, deep-merged over the base job.
    /// When empty, built-in default overrides are applied instead.
    #[serde(default)]
    pub variant_configs: Vec<serde_json::Value>,
    /// Winner-selection weights.
    #[serde(default)]
    pub weights: ExperimentWeights,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One complete, immutable job description.
///
/// # Examples
///
/// ```
/// use press_core::job::{Job, JobMode};
///
/// let job = Job::sample("brochure-2026");
/// assert_eq!(job.mode, JobMode::Normal);
/// assert!(job.layers.values().any(|l| l.enabled));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Stable, caller-supplied identifier; also the stem of every output
    /// filename this job produces.
    pub job_id: String,
    /// Execution mode.
    #[serde(default)]
    pub mode: JobMode,
    /// Routing key (e.g. `"partnership"`, `"report"`).
    pub job_type: String,
    /// Opaque content mapping passed through to the worker.
    #[serde(default)]
    pub content: BTreeMap<String, serde_json::Value>,
    /// Export parameters.
    pub export: ExportSpec,
    /// Quality-gate parameters.
    pub qa: QaSpec,
    /// Per-layer configuration, keyed by layer slug.
    #[serde(default = "default_layers")]
    pub layers: BTreeMap<LayerId, LayerSpec>,
    /// Experiment parameters; required when `mode == Experiment`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<ExperimentSpec>,
}

impl Job {
    /// Sum of the weights of all layers (enabled or not — a disabled layer
    /// still contributes its full weight to aggregation).
    #[must_use]
    pub fn weight_sum(&self) -> f64 {
        self.layers.values().map(|l| l.weight).sum()
    }

    /// The spec for `layer`, or a zero-weight disabled spec when absent.
    #[must_use]
    pub fn layer(&self, layer: LayerId) -> LayerSpec {
        self.layers
            .get(&layer)
            .copied()
            .unwrap_or_else(LayerSpec::disabled)
    }

    /// A minimal valid job, used by tests and doc examples.
    #[must_use]
    pub fn sample(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            mode: JobMode::Normal,
            job_type: "partnership".into(),
            content: BTreeMap::new(),
            export: ExportSpec {
                intent: Intent::Screen,
                preset: "standard-screen".into(),
            },
            qa: QaSpec {
                threshold: Threshold::rubric(105.0),
                auto_fix_colors: false,
                visual_baseline: None,
                fail_on_ai_error: false,
                fail_fast: true,
            },
            layers: default_layers(),
            experiment: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_conversion_is_proportional() {
        assert_eq!(ScoreScale::Grade.convert(95.0, ScoreScale::Rubric), 142.5);
        assert_eq!(ScoreScale::Rubric.convert(150.0, ScoreScale::Unit), 1.0);
        assert_eq!(ScoreScale::Unit.convert(0.5, ScoreScale::Grade), 50.0);
    }

    #[test]
    fn threshold_range_check_uses_its_own_scale() {
        assert!(Threshold::rubric(140.0).in_range());
        assert!(!Threshold {
            value: 140.0,
            scale: ScoreScale::Grade
        }
        .in_range());
    }

    #[test]
    fn default_layers_cover_all_six_and_sum_to_one() {
        let layers = default_layers();
        assert_eq!(layers.len(), LayerId::ALL.len());
        let sum: f64 = layers.values().map(|l| l.weight).sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn layer_lookup_falls_back_to_disabled() {
        let mut job = Job::sample("j");
        job.layers.remove(&LayerId::AiVision);
        let spec = job.layer(LayerId::AiVision);
        assert!(!spec.enabled);
        assert_eq!(spec.weight, 0.0);
    }

    #[test]
    fn job_round_trips_through_json() {
        let job = Job::sample("roundtrip");
        let text = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&text).unwrap();
        assert_eq!(job, back);
    }
}
