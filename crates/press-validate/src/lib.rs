// SPDX-License-Identifier: MIT OR Apache-2.0
//! Multi-layer PDF validation engine.
//!
//! The engine composes six ordered layers into one weighted [`Scorecard`]:
//!
//! | id | layer               | native scale |
//! |----|---------------------|--------------|
//! | L0 | structural          | 0–1          |
//! | L1 | content & rubric    | 0–150        |
//! | L2 | pdf quality         | 0–1 (binary) |
//! | L3 | visual regression   | 0–1          |
//! | L4 | ai vision review    | 0–1          |
//! | L5 | accessibility       | 0–1          |
//!
//! Layers run strictly in order. A disabled layer is skipped and counts as
//! passed with full weight; a zero-weight layer still runs but contributes
//! nothing and never gates. By default the first gating failure
//! short-circuits the rest (`skipped = true`, `passed = false`); a job can
//! opt out and run everything. When the content layer fails and the job
//! enables `qa.auto_fix_colors`, the engine re-invokes the producing worker
//! once with a color-correction override and re-runs only that layer,
//! preserving both scores.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod layers;
pub mod pdf;
pub mod providers;

pub use engine::{ArtifactReproducer, EngineConfig, ValidationEngine};
pub use providers::{
    AccessibilityProvider, AccessibilityReport, CommandRasterizer, DryRunAccessibility,
    DryRunVision, PageRasterizer, Previews, ProviderError, StubRasterizer, VisionProvider,
    VisionReview,
};

use press_core::{Artifact, ErrorCategory, Job};
use std::path::PathBuf;
use std::sync::Arc;

/// Hard failures that abort validation outright (as opposed to findings,
/// which merely fail layers).
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// A layer is enabled but the engine lacks what it needs to run it.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The artifact could not be parsed as a PDF.
    #[error("pdf error: {0}")]
    Pdf(#[from] pdf::PdfError),

    /// Page rasterization failed.
    #[error("rasterizer error: {0}")]
    Raster(String),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ValidationError {
    /// Map onto the scorecard error taxonomy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Pdf(_) => ErrorCategory::Validation,
            Self::Raster(_) | Self::Io(_) => ErrorCategory::Io,
        }
    }
}

/// Everything a layer may look at while running. Layers never mutate the
/// job or the artifact; they only read, rasterize, and report.
pub struct LayerContext<'a> {
    /// The job under validation.
    pub job: &'a Job,
    /// The artifact under validation.
    pub artifact: &'a Artifact,
    /// Shared, lazily materialized page rasters.
    pub previews: &'a Previews,
    /// Root directory holding named visual-regression baselines.
    pub baseline_root: &'a PathBuf,
}

/// One stage of validation.
#[async_trait::async_trait]
pub trait ValidationLayer: Send + Sync {
    /// Which layer this is.
    fn id(&self) -> press_core::LayerId;

    /// Inspect the artifact and produce an un-gated result: score, scale
    /// maximum, findings, and the skip/dry-run markers. The engine applies
    /// the pass gate uniformly afterwards.
    async fn run(
        &self,
        ctx: &LayerContext<'_>,
    ) -> Result<press_core::LayerResult, ValidationError>;
}

/// Shared handle type for the layer list.
pub type LayerSet = Vec<Arc<dyn ValidationLayer>>;
