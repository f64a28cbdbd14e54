// SPDX-License-Identifier: MIT OR Apache-2.0
//! Worker routing and pipeline shepherding.
//!
//! The [`Router`] owns the worker registry, an ordered rule list, and the
//! process-global layout lock. [`Router::run_job`] shepherds one job
//! end-to-end: pick a worker by rule, serialize layout-worker access,
//! produce the artifact, then hand it to the validation engine (wiring up
//! the auto-fix reproducer when the producing worker can re-run).
//!
//! Experiment mode lives in [`harness`]: N sequential variants, one
//! composite-scored winner.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod harness;
pub mod winner;

pub use harness::{ExperimentHarness, ExperimentSummary, VariantOutcome};

use async_trait::async_trait;
use press_core::{Artifact, ErrorCategory, Job, ReportPaths, Scorecard};
use press_validate::{ArtifactReproducer, ValidationEngine, ValidationError};
use press_worker::{LayoutLock, LayoutWorker, WorkContext, Worker, WorkerError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Errors from shepherding one job through production and validation.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// No worker is registered under the routed name.
    #[error("no worker registered under '{0}'")]
    UnknownWorker(String),

    /// The worker failed to produce an artifact.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// The validation engine failed outright (not a quality failure).
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl RouterError {
    /// Map onto the scorecard error taxonomy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownWorker(_) => ErrorCategory::Configuration,
            Self::Worker(e) => e.category(),
            Self::Validation(e) => e.category(),
        }
    }
}

/// One routing rule: first match wins.
pub struct RouteRule {
    /// Why this rule routed the job (logged and audited).
    pub reason: String,
    /// Worker name to route to.
    pub worker: String,
    predicate: Box<dyn Fn(&Job) -> bool + Send + Sync>,
}

impl RouteRule {
    /// Build a rule from a predicate over the job.
    pub fn new(
        reason: impl Into<String>,
        worker: impl Into<String>,
        predicate: impl Fn(&Job) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            reason: reason.into(),
            worker: worker.into(),
            predicate: Box::new(predicate),
        }
    }

    /// Route jobs whose `job_type` equals `job_type`.
    pub fn for_job_type(job_type: &str, worker: impl Into<String>) -> Self {
        let wanted = job_type.to_string();
        Self::new(
            format!("job_type == {wanted}"),
            worker,
            move |job: &Job| job.job_type == wanted,
        )
    }
}

/// Routes jobs to workers and shepherds single runs end-to-end.
pub struct Router {
    workers: BTreeMap<String, Arc<dyn Worker>>,
    rules: Vec<RouteRule>,
    default_worker: String,
    layout_lock: LayoutLock,
    engine: Arc<ValidationEngine>,
    paths: ReportPaths,
}

impl Router {
    /// Assemble a router. The layout lock must be the process's single
    /// instance; every clone shares it.
    #[must_use]
    pub fn new(
        rules: Vec<RouteRule>,
        default_worker: impl Into<String>,
        layout_lock: LayoutLock,
        engine: Arc<ValidationEngine>,
        paths: ReportPaths,
    ) -> Self {
        Self {
            workers: BTreeMap::new(),
            rules,
            default_worker: default_worker.into(),
            layout_lock,
            engine,
            paths,
        }
    }

    /// Register a worker under its own name.
    pub fn register_worker(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.name().to_string(), worker);
    }

    /// Evaluate the rule list for `job`: first match wins, else the
    /// default worker.
    #[must_use]
    pub fn route(&self, job: &Job) -> (String, String) {
        for rule in &self.rules {
            if (rule.predicate)(job) {
                return (rule.worker.clone(), rule.reason.clone());
            }
        }
        (self.default_worker.clone(), "default worker".into())
    }

    /// Run one job end-to-end: route, produce (serialized for the layout
    /// worker), validate, aggregate.
    ///
    /// Quality failures come back as `Ok` scorecards with a non-zero exit
    /// code; `Err` means the pipeline could not complete at all.
    ///
    /// # Errors
    ///
    /// [`RouterError::Worker`] when production fails,
    /// [`RouterError::Validation`] on engine-level faults.
    pub async fn run_job(&self, job: &Job) -> Result<Scorecard, RouterError> {
        let (worker_name, reason) = self.route(job);
        let worker = self
            .workers
            .get(&worker_name)
            .ok_or_else(|| RouterError::UnknownWorker(worker_name.clone()))?;
        info!(
            target: "press.router",
            job_id = %job.job_id,
            worker = %worker_name,
            %reason,
            "routed"
        );

        let output_path = self.paths.artifact_pdf(&job.job_id, job.export.intent);
        let ctx = WorkContext::new(output_path);
        ctx.audit
            .record("routed_worker", serde_json::json!(worker_name));
        ctx.audit.record("route_reason", serde_json::json!(reason));

        let is_layout = worker_name == LayoutWorker::NAME;
        let artifact = self.produce(worker, job, &ctx, is_layout).await?;

        // Only the layout worker can honour a color-fix re-run.
        let reproducer = is_layout.then(|| ColorFixReproducer {
            worker: Arc::clone(worker),
            job: job.clone(),
            ctx: WorkContext {
                color_fix: true,
                ..ctx.clone()
            },
            lock: self.layout_lock.clone(),
        });

        let scorecard = self
            .engine
            .validate(
                job,
                &artifact,
                &ctx.audit,
                reproducer.as_ref().map(|r| r as &dyn ArtifactReproducer),
            )
            .await?;
        Ok(scorecard)
    }

    /// Execute the worker, holding the layout lock across the whole
    /// production when required. The guard releases on every exit path.
    async fn produce(
        &self,
        worker: &Arc<dyn Worker>,
        job: &Job,
        ctx: &WorkContext,
        serialize: bool,
    ) -> Result<Artifact, RouterError> {
        if serialize {
            debug!(target: "press.router", job_id = %job.job_id, "acquiring layout lock");
            let _guard = self.layout_lock.acquire().await;
            Ok(worker.execute(job, ctx).await?)
        } else {
            Ok(worker.execute(job, ctx).await?)
        }
    }
}

/// Adapter giving the validation engine a one-shot color-fix re-run
/// without leaking worker types into the engine.
struct ColorFixReproducer {
    worker: Arc<dyn Worker>,
    job: Job,
    ctx: WorkContext,
    lock: LayoutLock,
}

#[async_trait]
impl ArtifactReproducer for ColorFixReproducer {
    async fn reproduce_with_color_fix(&self) -> Result<Artifact, String> {
        let _guard = self.lock.acquire().await;
        self.worker
            .execute(&self.job, &self.ctx)
            .await
            .map_err(|e| e.to_string())
    }
}
