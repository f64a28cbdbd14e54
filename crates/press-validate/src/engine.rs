// SPDX-License-Identifier: MIT OR Apache-2.0
//! The validation engine: ordered layer execution, gating, fail-fast,
//! auto-fix retry, and scorecard aggregation.

use crate::providers::{PageRasterizer, Previews};
use crate::{LayerContext, ValidationError, ValidationLayer};
use async_trait::async_trait;
use press_core::{
    Artifact, ErrorCategory, Finding, Job, LayerId, LayerResult, ReportSink, RunAudit, Scorecard,
    ScoreScale, VerdictBands, EXIT_PASS, EXIT_QUALITY,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Re-invokes the producing worker for the auto-fix retry. Implemented by
/// the router so the engine never depends on worker internals.
#[async_trait]
pub trait ArtifactReproducer: Send + Sync {
    /// Produce a fresh artifact with the color-correction override set.
    async fn reproduce_with_color_fix(&self) -> Result<Artifact, String>;
}

/// Engine-level settings, authoritative for banding and baselines.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Verdict band floors (grade scale).
    pub bands: VerdictBands,
    /// Root directory of named visual baselines.
    pub baseline_root: PathBuf,
    /// Directory page previews are rasterized into.
    pub preview_dir: PathBuf,
}

/// Composes the ordered layers into one weighted scorecard.
pub struct ValidationEngine {
    layers: BTreeMap<LayerId, Arc<dyn ValidationLayer>>,
    rasterizer: Arc<dyn PageRasterizer>,
    sink: ReportSink,
    config: EngineConfig,
}

impl ValidationEngine {
    /// Build an engine over the given layer set. Layers run in
    /// [`LayerId::ALL`] order regardless of insertion order.
    #[must_use]
    pub fn new(
        layers: Vec<Arc<dyn ValidationLayer>>,
        rasterizer: Arc<dyn PageRasterizer>,
        sink: ReportSink,
        config: EngineConfig,
    ) -> Self {
        let layers = layers.into_iter().map(|l| (l.id(), l)).collect();
        Self {
            layers,
            rasterizer,
            sink,
            config,
        }
    }

    /// Run every enabled layer against the artifact and aggregate the
    /// scorecard. `reproducer` enables the auto-fix retry; pass `None` for
    /// workers that cannot re-produce (the engine then skips remediation).
    ///
    /// # Errors
    ///
    /// [`ValidationError::Configuration`] when a layer is enabled but not
    /// installed; I/O and rasterizer errors are fatal for the run.
    pub async fn validate(
        &self,
        job: &Job,
        artifact: &Artifact,
        audit: &RunAudit,
        reproducer: Option<&dyn ArtifactReproducer>,
    ) -> Result<Scorecard, ValidationError> {
        let started = Instant::now();
        let mut current_artifact = artifact.clone();
        let mut previews = self.fresh_previews(&job.job_id, 0);
        let mut results: Vec<LayerResult> = Vec::new();
        let mut short_circuited = false;
        let mut auto_fix_used = false;

        for id in LayerId::ALL {
            let spec = job.layer(id);
            if !spec.enabled {
                debug!(target: "press.validate", layer = %id, "disabled, skipping");
                results.push(LayerResult::skipped_passing(id));
                continue;
            }
            let Some(layer) = self.layers.get(&id) else {
                return Err(ValidationError::Configuration(format!(
                    "layer '{id}' is enabled but not configured"
                )));
            };
            if short_circuited {
                results.push(LayerResult::skipped_after_failure(id));
                continue;
            }

            let mut result = {
                let ctx = LayerContext {
                    job,
                    artifact: &current_artifact,
                    previews: &previews,
                    baseline_root: &self.config.baseline_root,
                };
                let mut result = layer.run(&ctx).await?;
                finalize(&mut result, spec.min_score);
                result
            };

            // Auto-fix: one shot, content layer only, layout-produced runs.
            if id == LayerId::Content
                && !result.passed
                && job.qa.auto_fix_colors
                && !auto_fix_used
            {
                if let Some(reproducer) = reproducer {
                    auto_fix_used = true;
                    let first_attempt_score = result.score;
                    info!(
                        target: "press.validate",
                        job_id = %job.job_id,
                        first_attempt_score,
                        "content layer failed, attempting color auto-fix"
                    );
                    match reproducer.reproduce_with_color_fix().await {
                        Ok(fixed) => {
                            current_artifact = fixed;
                            previews = self.fresh_previews(&job.job_id, 1);
                            let ctx = LayerContext {
                                job,
                                artifact: &current_artifact,
                                previews: &previews,
                                baseline_root: &self.config.baseline_root,
                            };
                            let mut retried = layer.run(&ctx).await?;
                            finalize(&mut retried, spec.min_score);
                            retried.first_attempt_score = Some(first_attempt_score);
                            result = retried;
                        }
                        Err(reason) => {
                            warn!(target: "press.validate", %reason, "auto-fix reproduction failed");
                            result
                                .findings
                                .push(Finding::warning("remediation", reason));
                        }
                    }
                }
            }

            let report_path = self
                .sink
                .write_layer_report(&job.job_id, id, &result)
                .map_err(core_to_validation)?;
            result.artifacts.push(report_path);

            let gating_failure = counts_against_gate(job, &result);
            results.push(result);
            if gating_failure && job.qa.fail_fast {
                warn!(target: "press.validate", layer = %id, "layer failed, short-circuiting");
                short_circuited = true;
            }
        }

        Ok(self.aggregate(job, audit, results, started))
    }

    fn fresh_previews(&self, job_id: &str, generation: u32) -> Previews {
        Previews::new(
            Arc::clone(&self.rasterizer),
            self.config
                .preview_dir
                .join(format!("{job_id}-gen{generation}")),
        )
    }

    fn aggregate(
        &self,
        job: &Job,
        audit: &RunAudit,
        results: Vec<LayerResult>,
        started: Instant,
    ) -> Scorecard {
        let mut overall = 0.0;
        for result in &results {
            let weight = job.layer(result.layer).weight;
            overall += result.normalized() * weight * ScoreScale::Rubric.max();
        }

        let gates_ok = results.iter().all(|r| !counts_against_gate(job, r));
        let threshold = job.qa.threshold.as_rubric();
        let overall_passed = gates_ok && overall >= threshold;
        let verdict = self.config.bands.verdict(overall, ScoreScale::Rubric);

        info!(
            target: "press.validate",
            job_id = %job.job_id,
            overall,
            threshold,
            %verdict,
            passed = overall_passed,
            "validation complete"
        );

        Scorecard {
            job_id: job.job_id.clone(),
            overall,
            overall_scale: ScoreScale::Rubric,
            per_layer: results,
            overall_passed,
            verdict,
            duration_ms: started.elapsed().as_millis() as u64,
            exit_code: if overall_passed { EXIT_PASS } else { EXIT_QUALITY },
            produced_at: chrono::Utc::now(),
            error: if overall_passed {
                None
            } else {
                Some(press_core::RunError {
                    category: ErrorCategory::Validation,
                    message: "one or more quality gates failed".into(),
                })
            },
            metadata: audit.snapshot(),
        }
    }
}

/// Uniform pass gate: a non-skipped layer passes iff it reached its
/// minimum score and produced no critical finding.
fn finalize(result: &mut LayerResult, min_score: f64) {
    if !result.skipped {
        result.passed = result.score >= min_score && !result.has_critical();
    }
}

/// Whether a result fails the run's gate: it actually ran, failed, is not
/// a forgiven provider error, and carries weight. A zero-weight layer
/// contributes nothing to the overall score and never gates (nor does it
/// trigger fail-fast).
fn counts_against_gate(job: &Job, result: &LayerResult) -> bool {
    !result.skipped
        && !result.passed
        && job.layer(result.layer).weight != 0.0
        && !is_forgiven(job, result)
}

/// A failed layer is forgiven when the failure is a soft provider error
/// and the job did not opt into treating those as fatal.
fn is_forgiven(job: &Job, result: &LayerResult) -> bool {
    !job.qa.fail_on_ai_error
        && matches!(result.layer, LayerId::AiVision | LayerId::Accessibility)
        && result
            .findings
            .iter()
            .any(|f| f.category == crate::layers::PROVIDER_ERROR_CATEGORY)
}

fn core_to_validation(err: press_core::CoreError) -> ValidationError {
    match err {
        press_core::CoreError::Io(io) => ValidationError::Io(io),
        press_core::CoreError::Json(e) => {
            ValidationError::Configuration(format!("report serialization failed: {e}"))
        }
    }
}

// ---------------------------------------------------------------------------
// Engine-logic tests with scripted layers
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::StubRasterizer;
    use crate::LayerSet;
    use press_core::{Intent, ReportPaths, Threshold, Verdict};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// A layer that replays scripted scores, one per invocation.
    struct Scripted {
        id: LayerId,
        scores: Mutex<Vec<f64>>,
        findings: Vec<Finding>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(id: LayerId, score: f64) -> Arc<Self> {
            Self::sequence(id, vec![score])
        }

        fn sequence(id: LayerId, scores: Vec<f64>) -> Arc<Self> {
            Arc::new(Self {
                id,
                scores: Mutex::new(scores),
                findings: Vec::new(),
                calls: AtomicU32::new(0),
            })
        }

        fn with_findings(id: LayerId, score: f64, findings: Vec<Finding>) -> Arc<Self> {
            Arc::new(Self {
                id,
                scores: Mutex::new(vec![score]),
                findings,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ValidationLayer for Scripted {
        fn id(&self) -> LayerId {
            self.id
        }

        async fn run(&self, _ctx: &LayerContext<'_>) -> Result<LayerResult, ValidationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let score = {
                let mut scores = self.scores.lock().unwrap();
                if scores.len() > 1 {
                    scores.remove(0)
                } else {
                    scores[0]
                }
            };
            let max = self.id.scale().max();
            Ok(LayerResult {
                layer: self.id,
                score,
                max_score: max,
                passed: false,
                skipped: false,
                dry_run: false,
                first_attempt_score: None,
                findings: self.findings.clone(),
                duration_ms: 1,
                artifacts: Vec::new(),
            })
        }
    }

    struct FixedReproducer {
        artifact: Artifact,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ArtifactReproducer for FixedReproducer {
        async fn reproduce_with_color_fix(&self) -> Result<Artifact, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.artifact.clone())
        }
    }

    fn test_artifact(dir: &std::path::Path) -> Artifact {
        let path = dir.join("artifact.pdf");
        std::fs::write(&path, b"%PDF-1.7 test artifact").unwrap();
        Artifact::from_export(&path, 2, Intent::Print).unwrap()
    }

    fn engine_with(dir: &std::path::Path, layers: LayerSet) -> ValidationEngine {
        ValidationEngine::new(
            layers,
            Arc::new(StubRasterizer::new(2, [250, 250, 250])),
            ReportSink::new(ReportPaths::new(dir.join("out"), dir.join("reports"))),
            EngineConfig {
                bands: VerdictBands::default(),
                baseline_root: dir.join("baselines"),
                preview_dir: dir.join("previews"),
            },
        )
    }

    fn passing_layers() -> LayerSet {
        vec![
            Scripted::new(LayerId::Structural, 0.95),
            Scripted::new(LayerId::Content, 146.0),
            Scripted::new(LayerId::PdfQuality, 1.0),
            Scripted::new(LayerId::VisualRegression, 0.99),
            Scripted::new(LayerId::AiVision, 0.95),
            Scripted::new(LayerId::Accessibility, 0.9),
        ]
    }

    fn world_class_job() -> Job {
        let mut job = Job::sample("engine-test");
        job.qa.threshold = Threshold::rubric(140.0);
        job
    }

    #[tokio::test]
    async fn happy_path_passes_with_a_plus_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(dir.path(), passing_layers());
        let artifact = test_artifact(dir.path());

        let card = engine
            .validate(&world_class_job(), &artifact, &RunAudit::new(), None)
            .await
            .unwrap();
        assert!(card.overall_passed);
        assert_eq!(card.exit_code, EXIT_PASS);
        assert_eq!(card.verdict, Verdict::APlus);
        assert!(card.overall >= 140.0);
        assert_eq!(card.per_layer.len(), 6);
    }

    #[tokio::test]
    async fn fail_fast_skips_later_layers_but_keeps_failure_signal() {
        let dir = tempfile::tempdir().unwrap();
        let mut layers = passing_layers();
        // L2 fails on a critical font finding.
        layers[2] = Scripted::with_findings(
            LayerId::PdfQuality,
            0.0,
            vec![Finding::critical("font", "unembedded:SomeFont")],
        );
        let engine = engine_with(dir.path(), layers);
        let artifact = test_artifact(dir.path());

        let card = engine
            .validate(&world_class_job(), &artifact, &RunAudit::new(), None)
            .await
            .unwrap();
        assert!(!card.overall_passed);
        assert_eq!(card.exit_code, EXIT_QUALITY);

        let quality = card.layer(LayerId::PdfQuality).unwrap();
        assert!(!quality.passed && !quality.skipped);
        for id in [LayerId::VisualRegression, LayerId::AiVision, LayerId::Accessibility] {
            let r = card.layer(id).unwrap();
            assert!(r.skipped && !r.passed, "{id} should be skipped-after-failure");
            assert_eq!(r.score, 0.0);
        }
        // Overall = L0 + L1 contributions only (plus zeros).
        let expected = 0.95 * 0.15 * 150.0 + (146.0 / 150.0) * 0.35 * 150.0;
        assert!((card.overall - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn run_all_mode_runs_every_layer_despite_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut layers = passing_layers();
        layers[2] = Scripted::new(LayerId::PdfQuality, 0.0);
        let engine = engine_with(dir.path(), layers);
        let artifact = test_artifact(dir.path());

        let mut job = world_class_job();
        job.qa.fail_fast = false;
        let card = engine
            .validate(&job, &artifact, &RunAudit::new(), None)
            .await
            .unwrap();
        assert!(!card.overall_passed);
        assert!(card.per_layer.iter().all(|r| !r.skipped));
    }

    #[tokio::test]
    async fn disabled_layer_is_skipped_and_contributes_full_weight() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(dir.path(), passing_layers());
        let artifact = test_artifact(dir.path());

        let mut job = world_class_job();
        job.layers.get_mut(&LayerId::AiVision).unwrap().enabled = false;
        let card = engine
            .validate(&job, &artifact, &RunAudit::new(), None)
            .await
            .unwrap();
        let vision = card.layer(LayerId::AiVision).unwrap();
        assert!(vision.skipped && vision.passed);
        assert_eq!(vision.normalized(), 1.0);
        assert!(card.overall_passed);
    }

    #[tokio::test]
    async fn enabled_but_unconfigured_layer_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut layers = passing_layers();
        layers.remove(4); // drop the vision layer implementation
        let engine = engine_with(dir.path(), layers);
        let artifact = test_artifact(dir.path());

        let err = engine
            .validate(&world_class_job(), &artifact, &RunAudit::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::Configuration(_)));
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[tokio::test]
    async fn auto_fix_runs_once_and_preserves_both_scores() {
        let dir = tempfile::tempdir().unwrap();
        let mut layers = passing_layers();
        // First attempt 75 (fails the 105 floor), retry 120 (passes).
        layers[1] = Scripted::sequence(LayerId::Content, vec![75.0, 120.0]);
        let engine = engine_with(dir.path(), layers);
        let artifact = test_artifact(dir.path());

        let fixed_dir = dir.path().join("fixed");
        std::fs::create_dir_all(&fixed_dir).unwrap();
        let reproducer = FixedReproducer {
            artifact: test_artifact(&fixed_dir),
            calls: AtomicU32::new(0),
        };
        let mut job = world_class_job();
        job.qa.auto_fix_colors = true;
        job.qa.threshold = Threshold::rubric(100.0);

        let card = engine
            .validate(&job, &artifact, &RunAudit::new(), Some(&reproducer))
            .await
            .unwrap();
        assert_eq!(reproducer.calls.load(Ordering::SeqCst), 1);
        let content = card.layer(LayerId::Content).unwrap();
        assert_eq!(content.first_attempt_score, Some(75.0));
        assert_eq!(content.score, 120.0);
        assert!(content.passed);
    }

    #[tokio::test]
    async fn failed_auto_fix_reproduction_keeps_first_result() {
        struct FailingReproducer;
        #[async_trait]
        impl ArtifactReproducer for FailingReproducer {
            async fn reproduce_with_color_fix(&self) -> Result<Artifact, String> {
                Err("color fix script crashed".into())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut layers = passing_layers();
        layers[1] = Scripted::new(LayerId::Content, 75.0);
        let engine = engine_with(dir.path(), layers);
        let artifact = test_artifact(dir.path());

        let mut job = world_class_job();
        job.qa.auto_fix_colors = true;
        let card = engine
            .validate(&job, &artifact, &RunAudit::new(), Some(&FailingReproducer))
            .await
            .unwrap();
        let content = card.layer(LayerId::Content).unwrap();
        assert!(!content.passed);
        assert!(content
            .findings
            .iter()
            .any(|f| f.category == "remediation"));
        assert_eq!(card.exit_code, EXIT_QUALITY);
    }

    #[tokio::test]
    async fn provider_error_is_forgiven_unless_opted_in() {
        let dir = tempfile::tempdir().unwrap();
        let mut layers = passing_layers();
        layers[4] = Scripted::with_findings(
            LayerId::AiVision,
            0.0,
            vec![Finding::warning(
                crate::layers::PROVIDER_ERROR_CATEGORY,
                "model unavailable",
            )],
        );
        let engine = engine_with(dir.path(), layers);
        let artifact = test_artifact(dir.path());

        // Forgiven: gates pass, but the score contribution is zero, so the
        // exit code is still governed by the threshold.
        let mut job = world_class_job();
        job.qa.threshold = Threshold::rubric(100.0);
        let card = engine
            .validate(&job, &artifact, &RunAudit::new(), None)
            .await
            .unwrap();
        assert!(card.overall_passed, "provider error must not gate by default");

        // Opted in: the same failure gates the run.
        let dir2 = tempfile::tempdir().unwrap();
        let mut layers = passing_layers();
        layers[4] = Scripted::with_findings(
            LayerId::AiVision,
            0.0,
            vec![Finding::warning(
                crate::layers::PROVIDER_ERROR_CATEGORY,
                "model unavailable",
            )],
        );
        let engine = engine_with(dir2.path(), layers);
        let artifact = test_artifact(dir2.path());
        let mut job = world_class_job();
        job.qa.threshold = Threshold::rubric(100.0);
        job.qa.fail_on_ai_error = true;
        let card = engine
            .validate(&job, &artifact, &RunAudit::new(), None)
            .await
            .unwrap();
        assert!(!card.overall_passed);
    }

    #[tokio::test]
    async fn threshold_boundaries_behave() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(dir.path(), passing_layers());
        let artifact = test_artifact(dir.path());

        // Zero threshold: always passes on score; layer gates still apply.
        let mut job = world_class_job();
        job.qa.threshold = Threshold::rubric(0.0);
        let card = engine
            .validate(&job, &artifact, &RunAudit::new(), None)
            .await
            .unwrap();
        assert!(card.overall_passed);

        // Max threshold: only a perfect run passes.
        let mut job = world_class_job();
        job.qa.threshold = Threshold::rubric(150.0);
        let card = engine
            .validate(&job, &artifact, &RunAudit::new(), None)
            .await
            .unwrap();
        assert!(!card.overall_passed);
    }

    #[tokio::test]
    async fn zero_weight_layer_contributes_nothing_and_never_gates() {
        let dir = tempfile::tempdir().unwrap();
        let mut layers = passing_layers();
        layers[4] = Scripted::new(LayerId::AiVision, 0.0); // fails its 0.8 floor
        let engine = engine_with(dir.path(), layers);
        let artifact = test_artifact(dir.path());

        let mut job = world_class_job();
        job.qa.threshold = Threshold::rubric(100.0);
        job.layers.get_mut(&LayerId::AiVision).unwrap().weight = 0.0;
        let card = engine
            .validate(&job, &artifact, &RunAudit::new(), None)
            .await
            .unwrap();

        // The layer itself still ran and failed its floor.
        let vision = card.layer(LayerId::AiVision).unwrap();
        assert!(!vision.passed && !vision.skipped);

        // Weight 0: no score contribution, no gate, no short-circuit.
        assert!(card.overall_passed);
        let accessibility = card.layer(LayerId::Accessibility).unwrap();
        assert!(!accessibility.skipped && accessibility.passed);
        let expected = 0.95 * 0.15 * 150.0
            + (146.0 / 150.0) * 0.35 * 150.0
            + 0.15 * 150.0
            + 0.99 * 0.10 * 150.0
            + 0.9 * 0.10 * 150.0;
        assert!((card.overall - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn audit_metadata_lands_in_scorecard() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(dir.path(), passing_layers());
        let artifact = test_artifact(dir.path());
        let audit = RunAudit::new();
        audit.record("export_preset", serde_json::json!("brand-print"));

        let card = engine
            .validate(&world_class_job(), &artifact, &audit, None)
            .await
            .unwrap();
        assert_eq!(card.metadata["export_preset"], serde_json::json!("brand-print"));
    }

}
