// SPDX-License-Identifier: MIT OR Apache-2.0
//! Subcommand orchestration: settings + job loading, pipeline assembly,
//! scorecard persistence, and exit-code mapping.

use crate::providers::{HttpAccessibilityProvider, HttpVisionProvider};
use crate::workers::OnDemandLayoutWorker;
use press_config::{ConfigError, JobLoadOptions, Settings};
use press_core::{
    render_text_report, ErrorCategory, Job, JobMode, LayerId, ReportPaths, ReportSink, RunAudit,
    Scorecard, Threshold, EXIT_INFRA,
};
use press_router::{ExperimentHarness, RouteRule, Router};
use press_validate::layers::{
    AccessibilityLayer, ContentLayer, QualityLayer, StructuralLayer, VisionLayer,
    VisualRegressionLayer,
};
use press_validate::{
    CommandRasterizer, DryRunAccessibility, DryRunVision, EngineConfig, ValidationEngine,
};
use press_worker::{LayoutLock, ServiceWorker};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Global flags that shape settings resolution.
pub struct SettingsOverrides {
    /// Explicit settings file, when given.
    pub settings_path: Option<std::path::PathBuf>,
    /// `--out-dir` override.
    pub out_dir: Option<std::path::PathBuf>,
    /// `--report-dir` override.
    pub report_dir: Option<std::path::PathBuf>,
}

/// Per-invocation flags shared by the run-style subcommands.
pub struct RunOptions {
    /// `--threshold` override, rubric scale.
    pub threshold: Option<f64>,
    /// `--strict` job loading.
    pub strict: bool,
    /// `--ci` machine-readable output.
    pub ci: bool,
    /// `--dry-run` providers.
    pub dry_run: bool,
}

/// Execute one job end-to-end.
pub async fn run(job_path: &Path, options: RunOptions, overrides: SettingsOverrides) -> i32 {
    let (settings, job, sink) = match prepare(job_path, &options, overrides) {
        Ok(prepared) => prepared,
        Err(code) => return code,
    };

    // Experiment mode is implicit under `run`.
    if job.mode == JobMode::Experiment {
        return run_experiment(&settings, &job, &sink, &options).await;
    }

    let router = match build_router(&settings, &job, &options, &sink) {
        Ok(router) => router,
        Err(code) => return code,
    };
    let budget = Duration::from_secs(settings.wall_clock_budget_secs);
    let card = match tokio::time::timeout(budget, router.run_job(&job)).await {
        Err(_) => Scorecard::from_error(
            &job.job_id,
            ErrorCategory::Transport,
            format!("wall-clock budget of {}s exhausted", budget.as_secs()),
        ),
        Ok(Err(e)) => Scorecard::from_error(&job.job_id, e.category(), e.to_string()),
        Ok(Ok(card)) => card,
    };
    finish(&sink, &card, options.ci)
}

/// Grade an existing PDF without producing anything.
pub async fn validate_only(
    pdf: &Path,
    job_path: &Path,
    options: RunOptions,
    overrides: SettingsOverrides,
) -> i32 {
    let (settings, job, sink) = match prepare(job_path, &options, overrides) {
        Ok(prepared) => prepared,
        Err(code) => return code,
    };

    let artifact = match press_validate::pdf::inspect(pdf) {
        Ok(inspection) => {
            match press_core::Artifact::from_export(pdf, inspection.page_count, job.export.intent)
            {
                Ok(artifact) => artifact,
                Err(e) => {
                    let card =
                        Scorecard::from_error(&job.job_id, ErrorCategory::Io, e.to_string());
                    return finish(&sink, &card, options.ci);
                }
            }
        }
        Err(e) => {
            let card = Scorecard::from_error(&job.job_id, ErrorCategory::Validation, e.to_string());
            return finish(&sink, &card, options.ci);
        }
    };

    let engine = match build_engine(&settings, &job, &options, &sink) {
        Ok(engine) => engine,
        Err(code) => return code,
    };
    let card = match engine
        .validate(&job, &artifact, &RunAudit::new(), None)
        .await
    {
        Ok(card) => card,
        Err(e) => Scorecard::from_error(&job.job_id, e.category(), e.to_string()),
    };
    finish(&sink, &card, options.ci)
}

/// Run an experiment job explicitly.
pub async fn experiment(
    job_path: &Path,
    options: RunOptions,
    overrides: SettingsOverrides,
) -> i32 {
    let (settings, job, sink) = match prepare(job_path, &options, overrides) {
        Ok(prepared) => prepared,
        Err(code) => return code,
    };
    if job.mode != JobMode::Experiment {
        error!(target: "press.cli", job_id = %job.job_id, "job is not in experiment mode");
        let card = Scorecard::from_error(
            &job.job_id,
            ErrorCategory::Configuration,
            "the experiment subcommand requires mode = \"experiment\"",
        );
        return finish(&sink, &card, options.ci);
    }
    run_experiment(&settings, &job, &sink, &options).await
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

fn prepare(
    job_path: &Path,
    options: &RunOptions,
    overrides: SettingsOverrides,
) -> Result<(Settings, Job, ReportSink), i32> {
    let mut settings = match Settings::load(overrides.settings_path.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!(target: "press.cli", error = %e, "cannot load settings");
            return Err(EXIT_INFRA);
        }
    };
    if let Some(dir) = overrides.out_dir {
        settings.out_dir = dir;
    }
    if let Some(dir) = overrides.report_dir {
        settings.report_dir = dir;
    }
    if options.dry_run {
        settings.dry_run_vision = true;
        settings.dry_run_accessibility = true;
    }
    for warning in settings.warnings() {
        warn!(target: "press.cli", %warning, "settings warning");
    }

    let sink = ReportSink::new(ReportPaths::new(
        settings.out_dir.clone(),
        settings.report_dir.clone(),
    ));

    let load_options = JobLoadOptions {
        strict: options.strict,
        world_class_floor: settings.world_class_floor,
    };
    let mut job = match press_config::load_job(job_path, load_options) {
        Ok((job, _warnings)) => job,
        Err(e) => {
            error!(target: "press.cli", error = %e, "invalid job config");
            let job_id = job_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown-job");
            let card = Scorecard::from_error(job_id, error_category(&e), e.to_string());
            let _ = sink.write_scorecard(&card);
            return Err(EXIT_INFRA);
        }
    };
    if let Some(threshold) = options.threshold {
        job.qa.threshold = Threshold::rubric(threshold);
    }
    Ok((settings, job, sink))
}

fn error_category(err: &ConfigError) -> ErrorCategory {
    match err {
        ConfigError::FileNotFound { .. } => ErrorCategory::Io,
        _ => ErrorCategory::Configuration,
    }
}

fn build_engine(
    settings: &Settings,
    job: &Job,
    options: &RunOptions,
    sink: &ReportSink,
) -> Result<Arc<ValidationEngine>, i32> {
    let mut layers: press_validate::LayerSet = vec![
        Arc::new(StructuralLayer),
        Arc::new(ContentLayer),
        Arc::new(QualityLayer),
        Arc::new(VisualRegressionLayer),
    ];

    let vision_dry = settings.dry_run_vision || options.dry_run;
    if vision_dry {
        let floor = job.layer(LayerId::AiVision).min_score;
        layers.push(Arc::new(VisionLayer::new(Arc::new(DryRunVision::above(
            floor,
        )))));
    } else if let Some(provider) = HttpVisionProvider::from_env() {
        layers.push(Arc::new(VisionLayer::new(Arc::new(provider))));
    }
    // An enabled vision layer with neither dry-run nor an endpoint is left
    // uninstalled; the engine reports the configuration error.

    let access_dry = settings.dry_run_accessibility || options.dry_run;
    if access_dry {
        let floor = job.layer(LayerId::Accessibility).min_score;
        layers.push(Arc::new(AccessibilityLayer::new(Arc::new(
            DryRunAccessibility::above(floor),
        ))));
    } else if let Some(provider) = HttpAccessibilityProvider::from_env() {
        layers.push(Arc::new(AccessibilityLayer::new(Arc::new(provider))));
    }

    Ok(Arc::new(ValidationEngine::new(
        layers,
        Arc::new(CommandRasterizer::new(
            settings.rasterizer_command.clone(),
            settings.raster_dpi,
        )),
        sink.clone(),
        EngineConfig {
            bands: settings.bands,
            baseline_root: settings.baseline_dir.clone(),
            preview_dir: settings.preview_dir.clone(),
        },
    )))
}

fn build_router(
    settings: &Settings,
    job: &Job,
    options: &RunOptions,
    sink: &ReportSink,
) -> Result<Router, i32> {
    let engine = build_engine(settings, job, options, sink)?;
    let rules = settings
        .service_job_types
        .iter()
        .map(|job_type| RouteRule::for_job_type(job_type, ServiceWorker::NAME))
        .collect();
    let mut router = Router::new(
        rules,
        press_worker::LayoutWorker::NAME,
        LayoutLock::new(),
        engine,
        sink.paths().clone(),
    );
    router.register_worker(Arc::new(OnDemandLayoutWorker::new(settings)));
    if let Some(endpoint) = &settings.render_endpoint {
        router.register_worker(Arc::new(ServiceWorker::new(endpoint.clone())));
    }
    Ok(router)
}

async fn run_experiment(
    settings: &Settings,
    job: &Job,
    sink: &ReportSink,
    options: &RunOptions,
) -> i32 {
    let router = match build_router(settings, job, options, sink) {
        Ok(router) => router,
        Err(code) => return code,
    };
    let harness = ExperimentHarness::new(&router, sink);
    match harness.run(job).await {
        Ok(summary) => {
            if options.ci {
                match serde_json::to_string(&summary) {
                    Ok(text) => println!("{text}"),
                    Err(e) => {
                        eprintln!("failed to render summary: {e}");
                        return EXIT_INFRA;
                    }
                }
            } else {
                eprintln!("{}", summary.reasoning);
            }
            let winner_passed = summary
                .variants
                .iter()
                .find(|v| v.index == summary.winner_index)
                .is_some_and(|v| v.passed);
            i32::from(!winner_passed)
        }
        Err(e) => {
            error!(target: "press.cli", error = %e, "experiment failed");
            EXIT_INFRA
        }
    }
}

fn finish(sink: &ReportSink, card: &Scorecard, ci: bool) -> i32 {
    if let Err(e) = sink.write_scorecard(card) {
        eprintln!("failed to persist scorecard: {e}");
        return EXIT_INFRA;
    }
    if ci {
        match serde_json::to_string(card) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("failed to render scorecard: {e}");
                return EXIT_INFRA;
            }
        }
    } else {
        eprintln!("{}", render_text_report(card));
    }
    card.exit_code
}
