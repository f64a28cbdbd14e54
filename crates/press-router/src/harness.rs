// SPDX-License-Identifier: MIT OR Apache-2.0
//! The experiment harness: generate N variants, run them sequentially,
//! pick a winner.
//!
//! Variants deep-merge their overrides into the base job (children never
//! inherit the `experiment` block) and run strictly one after another —
//! parallel runs are forbidden by the layout worker's single-instance
//! contract. Failed variants are retained for the summary but excluded
//! from winner selection unless every variant failed.

use crate::winner::{select_winner, VariantMetrics};
use crate::{Router, RouterError};
use chrono::Utc;
use press_core::{ExperimentWeights, Job, ReportSink, Scorecard};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::{info, warn};

/// Built-in design-token variations applied when a job requests variants
/// without supplying `variant_configs`.
const DEFAULT_VARIANT_TOKENS: &[&str] = &["balanced", "vivid", "muted", "high-contrast"];

/// Everything recorded about one executed variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantOutcome {
    /// Zero-based variant index.
    pub index: usize,
    /// Derived id: `"{parent}-variant-{index}"`.
    pub job_id: String,
    /// The variant's full scorecard (failed variants get an error card).
    pub scorecard: Scorecard,
    /// Wall-clock duration of the variant's pipeline.
    pub duration_ms: u64,
    /// The overrides that produced this variant.
    pub overrides: Value,
}

/// The persisted experiment summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSummary {
    /// The parent job id.
    pub parent_job_id: String,
    /// Every variant, in index order.
    pub variants: Vec<VariantReport>,
    /// Index of the winning variant.
    pub winner_index: usize,
    /// Why the winner won, in prose.
    pub reasoning: String,
    /// When the experiment finished.
    pub produced_at: chrono::DateTime<Utc>,
}

/// Per-variant digest inside the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantReport {
    /// Zero-based variant index.
    pub index: usize,
    /// The variant job id.
    pub job_id: String,
    /// Weighted composite score.
    pub composite: f64,
    /// The normalized metrics behind the composite.
    pub metrics: VariantMetrics,
    /// Whether the variant passed its gates.
    pub passed: bool,
    /// Pipeline duration.
    pub duration_ms: u64,
    /// The overrides that produced this variant.
    pub overrides: Value,
}

/// Errors from experiment orchestration.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The job is not in experiment mode or lacks the experiment block.
    #[error("job '{0}' carries no experiment block")]
    NotAnExperiment(String),

    /// A variant's overrides produced an invalid job.
    #[error("variant {index} is invalid after merge: {reason}")]
    InvalidVariant {
        /// Index of the broken variant.
        index: usize,
        /// Merge or parse failure detail.
        reason: String,
    },

    /// The summary could not be persisted.
    #[error("failed to write experiment summary: {0}")]
    Summary(#[from] press_core::CoreError),
}

/// Runs an experiment job's variants through a router, sequentially.
pub struct ExperimentHarness<'a> {
    router: &'a Router,
    sink: &'a ReportSink,
}

impl<'a> ExperimentHarness<'a> {
    /// Harness over the given router and report sink.
    #[must_use]
    pub fn new(router: &'a Router, sink: &'a ReportSink) -> Self {
        Self { router, sink }
    }

    /// Run every variant and emit the summary. The returned summary names
    /// the winner; individual scorecards are persisted by the usual
    /// per-job sinks.
    ///
    /// # Errors
    ///
    /// [`HarnessError::NotAnExperiment`] when the job has no experiment
    /// block; [`HarnessError::InvalidVariant`] when overrides break the
    /// job schema.
    pub async fn run(&self, job: &Job) -> Result<ExperimentSummary, HarnessError> {
        let experiment = job
            .experiment
            .as_ref()
            .ok_or_else(|| HarnessError::NotAnExperiment(job.job_id.clone()))?;
        let weights = experiment.weights;
        let variants = generate_variants(job)?;
        info!(
            target: "press.router",
            job_id = %job.job_id,
            count = variants.len(),
            "experiment start"
        );

        let mut outcomes = Vec::with_capacity(variants.len());
        for (index, (variant, overrides)) in variants.into_iter().enumerate() {
            let started = Instant::now();
            let scorecard = match self.router.run_job(&variant).await {
                Ok(card) => card,
                Err(e) => {
                    warn!(
                        target: "press.router",
                        variant = index,
                        error = %e,
                        "variant pipeline failed"
                    );
                    variant_error_card(&variant, &e)
                }
            };
            outcomes.push(VariantOutcome {
                index,
                job_id: variant.job_id.clone(),
                scorecard,
                duration_ms: started.elapsed().as_millis() as u64,
                overrides,
            });
        }

        let winner_index =
            select_winner(&outcomes, &weights).expect("variant_count >= 1 guarantees outcomes");
        let summary = build_summary(job, outcomes, winner_index, &weights);

        let timestamp = summary.produced_at.format("%Y%m%dT%H%M%S").to_string();
        self.sink
            .write_experiment_summary(&job.job_id, &timestamp, &summary)?;
        info!(
            target: "press.router",
            job_id = %job.job_id,
            winner = winner_index,
            "experiment complete"
        );
        Ok(summary)
    }
}

fn variant_error_card(variant: &Job, error: &RouterError) -> Scorecard {
    Scorecard::from_error(&variant.job_id, error.category(), error.to_string())
}

/// Generate the variant jobs: explicit configs first, built-in token
/// variations otherwise.
pub fn generate_variants(job: &Job) -> Result<Vec<(Job, Value)>, HarnessError> {
    let experiment = job
        .experiment
        .as_ref()
        .ok_or_else(|| HarnessError::NotAnExperiment(job.job_id.clone()))?;
    if experiment.variant_count == 0 {
        return Err(HarnessError::InvalidVariant {
            index: 0,
            reason: "variant_count must be at least 1".into(),
        });
    }

    let mut variants = Vec::with_capacity(experiment.variant_count);
    for index in 0..experiment.variant_count {
        let overrides = experiment
            .variant_configs
            .get(index)
            .cloned()
            .unwrap_or_else(|| default_override(index));
        let variant = materialize_variant(job, index, &overrides)
            .map_err(|reason| HarnessError::InvalidVariant { index, reason })?;
        variants.push((variant, overrides));
    }
    Ok(variants)
}

fn default_override(index: usize) -> Value {
    let token = DEFAULT_VARIANT_TOKENS[index % DEFAULT_VARIANT_TOKENS.len()];
    serde_json::json!({ "content": { "design_variant": token } })
}

fn materialize_variant(job: &Job, index: usize, overrides: &Value) -> Result<Job, String> {
    let mut base = serde_json::to_value(job).map_err(|e| e.to_string())?;
    deep_merge(&mut base, overrides);
    let object = base.as_object_mut().ok_or("job did not serialize to an object")?;
    // Children never re-enter experiment mode.
    object.remove("experiment");
    object.insert("mode".into(), Value::String("normal".into()));
    object.insert(
        "job_id".into(),
        Value::String(format!("{}-variant-{index}", job.job_id)),
    );
    serde_json::from_value(base).map_err(|e| e.to_string())
}

/// Recursively merge `overrides` into `base`: objects merge key-wise,
/// everything else is replaced.
pub fn deep_merge(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            for (key, value) in override_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, other) => *base_slot = other.clone(),
    }
}

fn build_summary(
    job: &Job,
    outcomes: Vec<VariantOutcome>,
    winner_index: usize,
    weights: &ExperimentWeights,
) -> ExperimentSummary {
    let reports: Vec<VariantReport> = outcomes
        .iter()
        .map(|o| {
            let metrics = VariantMetrics::from_scorecard(&o.scorecard);
            VariantReport {
                index: o.index,
                job_id: o.job_id.clone(),
                composite: metrics.composite(weights),
                metrics,
                passed: o.scorecard.exit_code == 0,
                duration_ms: o.duration_ms,
                overrides: o.overrides.clone(),
            }
        })
        .collect();

    let reasoning = reasoning_text(&reports, winner_index);
    ExperimentSummary {
        parent_job_id: job.job_id.clone(),
        variants: reports,
        winner_index,
        reasoning,
        produced_at: Utc::now(),
    }
}

fn reasoning_text(reports: &[VariantReport], winner_index: usize) -> String {
    let winner = &reports[winner_index];
    let runner_up = reports
        .iter()
        .filter(|r| r.index != winner_index)
        .max_by(|a, b| a.composite.partial_cmp(&b.composite).unwrap_or(std::cmp::Ordering::Equal));
    match runner_up {
        Some(runner_up) => format!(
            "variant {} wins with composite {:.3} (total {:.2}, brand {:.2}, visual {:.2}), \
             a margin of {:.3} over variant {}",
            winner.index,
            winner.composite,
            winner.metrics.total,
            winner.metrics.brand,
            winner.metrics.visual,
            winner.composite - runner_up.composite,
            runner_up.index,
        ),
        None => format!(
            "variant {} wins with composite {:.3} as the only variant",
            winner.index, winner.composite
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use press_core::ExperimentSpec;
    use serde_json::json;

    fn experiment_job(count: usize, configs: Vec<Value>) -> Job {
        let mut job = Job::sample("exp");
        job.mode = press_core::JobMode::Experiment;
        job.experiment = Some(ExperimentSpec {
            variant_count: count,
            variant_configs: configs,
            weights: ExperimentWeights::default(),
        });
        job
    }

    #[test]
    fn deep_merge_merges_objects_and_replaces_leaves() {
        let mut base = json!({"a": {"b": 1, "c": 2}, "d": [1, 2]});
        deep_merge(&mut base, &json!({"a": {"c": 3}, "d": [9]}));
        assert_eq!(base, json!({"a": {"b": 1, "c": 3}, "d": [9]}));
    }

    #[test]
    fn variants_get_derived_ids_and_no_experiment_block() {
        let job = experiment_job(3, vec![]);
        let variants = generate_variants(&job).unwrap();
        assert_eq!(variants.len(), 3);
        for (index, (variant, overrides)) in variants.iter().enumerate() {
            assert_eq!(variant.job_id, format!("exp-variant-{index}"));
            assert!(variant.experiment.is_none());
            assert_eq!(variant.mode, press_core::JobMode::Normal);
            assert!(overrides["content"]["design_variant"].is_string());
        }
    }

    #[test]
    fn explicit_configs_override_the_base_job() {
        let job = experiment_job(
            2,
            vec![
                json!({"export": {"preset": "alt-preset"}}),
                json!({"qa": {"auto_fix_colors": true}}),
            ],
        );
        let variants = generate_variants(&job).unwrap();
        assert_eq!(variants[0].0.export.preset, "alt-preset");
        assert_eq!(variants[0].0.export.intent, job.export.intent);
        assert!(variants[1].0.qa.auto_fix_colors);
    }

    #[test]
    fn single_variant_experiments_are_permitted() {
        let job = experiment_job(1, vec![]);
        assert_eq!(generate_variants(&job).unwrap().len(), 1);
    }

    #[test]
    fn non_experiment_jobs_are_rejected() {
        let job = Job::sample("plain");
        assert!(matches!(
            generate_variants(&job),
            Err(HarnessError::NotAnExperiment(_))
        ));
    }
}
