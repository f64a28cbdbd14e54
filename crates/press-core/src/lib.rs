// SPDX-License-Identifier: MIT OR Apache-2.0
//! Contract types for the ProofPress orchestrator.
//!
//! This crate defines the data model shared by every other crate in the
//! workspace: the immutable [`Job`] description, the [`Artifact`] a worker
//! produces, the per-layer [`LayerResult`] and aggregated [`Scorecard`]
//! the validation engine emits, and the error-category → exit-code mapping
//! that makes the process a well-behaved CI citizen.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod artifact;
pub mod job;
pub mod report;
pub mod scorecard;

pub use artifact::Artifact;
pub use job::{
    ExperimentSpec, ExperimentWeights, ExportSpec, Intent, Job, JobMode, LayerId, LayerSpec,
    QaSpec, ScoreScale, Threshold,
};
pub use report::{render_text_report, ReportPaths, ReportSink};
pub use scorecard::{
    ErrorCategory, Finding, LayerResult, RunAudit, RunError, Scorecard, Severity, Verdict,
    VerdictBands, EXIT_INFRA, EXIT_PASS, EXIT_QUALITY,
};

/// Errors raised by core persistence helpers (report sinks, digests).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
