// SPDX-License-Identifier: MIT OR Apache-2.0
//! The job-file loader: deprecation rewrites, unknown-field policy,
//! threshold-scale resolution, and semantic validation.

use crate::{ConfigError, ConfigWarning};
use press_core::{Job, JobMode, ScoreScale, Threshold};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::warn;

/// Deprecated field names and the canonical dotted path each rewrites to.
const DEPRECATED_FIELDS: &[(&str, &[&str])] = &[
    ("jobId", &["job_id"]),
    ("jobType", &["job_type"]),
    ("qaThreshold", &["qa", "threshold"]),
    ("autoFixColors", &["qa", "auto_fix_colors"]),
    ("autoFixColours", &["qa", "auto_fix_colors"]),
    ("visualBaseline", &["qa", "visual_baseline"]),
    ("failOnAiError", &["qa", "fail_on_ai_error"]),
];

/// How the loader treats a job document.
#[derive(Debug, Clone, Copy)]
pub struct JobLoadOptions {
    /// Reject unknown fields instead of stripping them with a warning.
    pub strict: bool,
    /// The minimum rubric threshold a `world_class` job must declare.
    /// Comes from [`crate::Settings`]; never from the job itself.
    pub world_class_floor: f64,
}

impl Default for JobLoadOptions {
    fn default() -> Self {
        Self {
            strict: false,
            world_class_floor: 140.0,
        }
    }
}

/// Load and validate a job file.
///
/// # Errors
///
/// [`ConfigError`] on unreadable files, malformed JSON, unknown fields in
/// strict mode, ambiguous thresholds, and semantic violations.
pub fn load_job(
    path: &Path,
    options: JobLoadOptions,
) -> Result<(Job, Vec<ConfigWarning>), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.display().to_string(),
    })?;
    load_job_str(&content, options)
}

/// Load and validate a job document from a JSON string.
///
/// # Errors
///
/// See [`load_job`].
pub fn load_job_str(
    content: &str,
    options: JobLoadOptions,
) -> Result<(Job, Vec<ConfigWarning>), ConfigError> {
    let mut value: Value = serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })?;
    let mut warnings = Vec::new();

    rewrite_deprecated(&mut value, &mut warnings)?;
    resolve_threshold_scale(&mut value)?;
    apply_unknown_field_policy(&mut value, options.strict, &mut warnings)?;

    let job: Job = serde_json::from_value(value).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })?;
    validate_job(&job, &options)?;
    collect_advisories(&job, &mut warnings);

    for warning in &warnings {
        warn!(target: "press.config", %warning, "job config warning");
    }
    Ok((job, warnings))
}

// ---------------------------------------------------------------------------
// Deprecation rewrites
// ---------------------------------------------------------------------------

fn rewrite_deprecated(
    value: &mut Value,
    warnings: &mut Vec<ConfigWarning>,
) -> Result<(), ConfigError> {
    let Some(root) = value.as_object_mut() else {
        return Err(ConfigError::ParseError {
            reason: "job document must be a JSON object".into(),
        });
    };
    for (old, path) in DEPRECATED_FIELDS {
        if let Some(moved) = root.remove(*old) {
            set_path(root, path, moved);
            warnings.push(ConfigWarning::DeprecatedField {
                field: (*old).to_string(),
                replacement: path.join("."),
            });
        }
    }
    Ok(())
}

fn set_path(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    let mut current = root;
    for segment in &path[..path.len() - 1] {
        current = current
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .expect("intermediate path segments are objects");
    }
    current.insert(path[path.len() - 1].to_string(), value);
}

// ---------------------------------------------------------------------------
// Threshold scale resolution
// ---------------------------------------------------------------------------

/// Normalize `qa.threshold` to the `{value, scale}` form.
///
/// A bare number above 100 can only be on the rubric scale and is
/// rewritten accordingly; a bare number at or below 100 is ambiguous
/// (grade or rubric) and is rejected, per the explicit-scale rule.
fn resolve_threshold_scale(value: &mut Value) -> Result<(), ConfigError> {
    let Some(threshold) = value.pointer_mut("/qa/threshold") else {
        return Ok(());
    };
    match threshold {
        Value::Number(n) => {
            let number = n.as_f64().unwrap_or(f64::NAN);
            if number > 100.0 && number <= 150.0 {
                *threshold = serde_json::json!({"value": number, "scale": "rubric"});
                Ok(())
            } else {
                Err(ConfigError::AmbiguousThreshold {
                    reason: format!(
                        "bare threshold {number} could be grade or rubric; \
                         declare {{\"value\": {number}, \"scale\": \"grade\"|\"rubric\"}}"
                    ),
                })
            }
        }
        Value::Object(map) if !map.contains_key("scale") => {
            let number = map.get("value").and_then(Value::as_f64).unwrap_or(f64::NAN);
            if number > 100.0 && number <= 150.0 {
                map.insert("scale".into(), Value::String("rubric".into()));
                Ok(())
            } else {
                Err(ConfigError::AmbiguousThreshold {
                    reason: format!("threshold value {number} given without a scale"),
                })
            }
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Unknown-field policy
// ---------------------------------------------------------------------------

const TOP_KEYS: &[&str] = &[
    "job_id",
    "mode",
    "job_type",
    "content",
    "export",
    "qa",
    "layers",
    "experiment",
];
const EXPORT_KEYS: &[&str] = &["intent", "preset"];
const QA_KEYS: &[&str] = &[
    "threshold",
    "auto_fix_colors",
    "visual_baseline",
    "fail_on_ai_error",
    "fail_fast",
];
const THRESHOLD_KEYS: &[&str] = &["value", "scale"];
const LAYER_KEYS: &[&str] = &["enabled", "min_score", "weight"];
const EXPERIMENT_KEYS: &[&str] = &["variant_count", "variant_configs", "weights"];
const WEIGHT_KEYS: &[&str] = &["total", "brand", "visual", "passed"];

fn apply_unknown_field_policy(
    value: &mut Value,
    strict: bool,
    warnings: &mut Vec<ConfigWarning>,
) -> Result<(), ConfigError> {
    let mut unknown = Vec::new();
    collect_unknown(value, &mut unknown);

    if unknown.is_empty() {
        return Ok(());
    }
    if strict {
        return Err(ConfigError::ValidationError {
            reasons: unknown
                .into_iter()
                .map(|path| format!("unknown field '{path}'"))
                .collect(),
        });
    }
    for path in unknown {
        remove_path(value, &path);
        warnings.push(ConfigWarning::UnknownField { path });
    }
    Ok(())
}

fn collect_unknown(value: &Value, out: &mut Vec<String>) {
    let Some(root) = value.as_object() else {
        return;
    };
    scan_keys(root, "", TOP_KEYS, out);
    if let Some(Value::Object(export)) = root.get("export") {
        scan_keys(export, "export.", EXPORT_KEYS, out);
    }
    if let Some(Value::Object(qa)) = root.get("qa") {
        scan_keys(qa, "qa.", QA_KEYS, out);
        if let Some(Value::Object(threshold)) = qa.get("threshold") {
            scan_keys(threshold, "qa.threshold.", THRESHOLD_KEYS, out);
        }
    }
    if let Some(Value::Object(layers)) = root.get("layers") {
        for (name, spec) in layers {
            if let Value::Object(spec) = spec {
                scan_keys(spec, &format!("layers.{name}."), LAYER_KEYS, out);
            }
        }
    }
    if let Some(Value::Object(experiment)) = root.get("experiment") {
        scan_keys(experiment, "experiment.", EXPERIMENT_KEYS, out);
        if let Some(Value::Object(weights)) = experiment.get("weights") {
            scan_keys(weights, "experiment.weights.", WEIGHT_KEYS, out);
        }
    }
}

fn scan_keys(map: &Map<String, Value>, prefix: &str, known: &[&str], out: &mut Vec<String>) {
    for key in map.keys() {
        if !known.contains(&key.as_str()) {
            out.push(format!("{prefix}{key}"));
        }
    }
}

fn remove_path(value: &mut Value, dotted: &str) {
    let segments: Vec<&str> = dotted.split('.').collect();
    let mut current = value;
    for segment in &segments[..segments.len() - 1] {
        let Some(next) = current.get_mut(*segment) else {
            return;
        };
        current = next;
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(segments[segments.len() - 1]);
    }
}

// ---------------------------------------------------------------------------
// Semantic validation
// ---------------------------------------------------------------------------

/// Tolerance when checking that weights sum to 1.0.
const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

fn validate_job(job: &Job, options: &JobLoadOptions) -> Result<(), ConfigError> {
    let mut reasons = Vec::new();

    if job.job_id.trim().is_empty() {
        reasons.push("job_id must not be empty".into());
    }
    if job.job_type.trim().is_empty() {
        reasons.push("job_type must not be empty".into());
    }
    if !job.qa.threshold.in_range() {
        reasons.push(format!(
            "threshold {} is outside [0, {}] on the {} scale",
            job.qa.threshold.value,
            job.qa.threshold.scale.max(),
            job.qa.threshold.scale
        ));
    }

    let weight_sum = job.weight_sum();
    if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        reasons.push(format!("layer weights sum to {weight_sum:.3}, expected 1.0"));
    }
    for (id, spec) in &job.layers {
        let max = id.scale().max();
        if spec.min_score < 0.0 || spec.min_score > max {
            reasons.push(format!(
                "layer '{id}' min_score {} is outside [0, {max}] ({} scale)",
                spec.min_score,
                id.scale()
            ));
        }
        if spec.weight < 0.0 {
            reasons.push(format!("layer '{id}' has a negative weight"));
        }
    }

    if job.mode == JobMode::WorldClass {
        if job.export.intent != press_core::Intent::Print {
            reasons.push("world_class mode requires print intent".into());
        }
        let floor = Threshold {
            value: options.world_class_floor,
            scale: ScoreScale::Rubric,
        };
        if job.qa.threshold.as_rubric() < floor.as_rubric() {
            reasons.push(format!(
                "world_class mode requires a threshold of at least {} rubric, got {:.1}",
                options.world_class_floor,
                job.qa.threshold.as_rubric()
            ));
        }
    }

    match (&job.mode, &job.experiment) {
        (JobMode::Experiment, None) => {
            reasons.push("experiment mode requires an experiment block".into());
        }
        (JobMode::Experiment, Some(spec)) => {
            if spec.variant_count == 0 {
                reasons.push("experiment.variant_count must be at least 1".into());
            }
            let sum = spec.weights.sum();
            if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                reasons.push(format!(
                    "experiment weights sum to {sum:.3}, expected 1.0"
                ));
            }
        }
        _ => {}
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError { reasons })
    }
}

fn collect_advisories(job: &Job, warnings: &mut Vec<ConfigWarning>) {
    if job.experiment.is_some() && job.mode != JobMode::Experiment {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "mode".into(),
            hint: "experiment block present but mode is not 'experiment'; it will be ignored"
                .into(),
        });
    }
    if job.qa.visual_baseline.is_none()
        && job
            .layers
            .get(&press_core::LayerId::VisualRegression)
            .is_some_and(|l| l.enabled)
    {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "qa.visual_baseline".into(),
            hint: "visual regression is enabled but will skip without a baseline".into(),
        });
    }
}
