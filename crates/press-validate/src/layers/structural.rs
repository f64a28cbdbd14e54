// SPDX-License-Identifier: MIT OR Apache-2.0
//! L0 — structural analysis.
//!
//! Classifies text elements by their set font sizes, then scores document
//! hierarchy (one dominant title size per page), spatial discipline (no
//! positioning outside the page box), and semantic roles (pages carry both
//! headline and body text). Page previews are materialized here so later
//! layers reuse them.

use crate::pdf;
use crate::{LayerContext, ValidationError, ValidationLayer};
use async_trait::async_trait;
use press_core::{Finding, LayerId, LayerResult};
use std::time::Instant;

/// Ratio over the median size above which a run of text counts as a title.
const TITLE_RATIO: f64 = 1.3;

/// Semantic document analysis over the page set.
pub struct StructuralLayer;

#[async_trait]
impl ValidationLayer for StructuralLayer {
    fn id(&self) -> LayerId {
        LayerId::Structural
    }

    async fn run(&self, ctx: &LayerContext<'_>) -> Result<LayerResult, ValidationError> {
        let started = Instant::now();
        let previews = ctx.previews.get(&ctx.artifact.path).await?;
        let inspection = pdf::inspect(&ctx.artifact.path)?;

        let mut findings = Vec::new();
        let mut hierarchy_hits = 0usize;
        let mut spatial_hits = 0usize;
        let mut semantic_hits = 0usize;

        for page in &inspection.pages {
            let median = median(&page.font_sizes);
            let title_sizes = page
                .font_sizes
                .iter()
                .filter(|&&s| median > 0.0 && s >= median * TITLE_RATIO)
                .count();
            let body_sizes = page.font_sizes.len() - title_sizes;

            if title_sizes >= 1 {
                hierarchy_hits += 1;
            } else {
                findings.push(
                    Finding::info("hierarchy", "no dominant title element")
                        .on_page(page.number),
                );
            }
            if page.offpage_positions.is_empty() {
                spatial_hits += 1;
            } else {
                findings.push(
                    Finding::warning(
                        "spatial",
                        format!("{} text runs outside the page box", page.offpage_positions.len()),
                    )
                    .on_page(page.number),
                );
            }
            if !page.text.trim().is_empty() && body_sizes >= 1 {
                semantic_hits += 1;
            } else {
                findings.push(
                    Finding::info("semantic", "page lacks classified body text")
                        .on_page(page.number),
                );
            }
        }

        let total = inspection.pages.len().max(1) as f64;
        let hierarchy = hierarchy_hits as f64 / total;
        let spatial = spatial_hits as f64 / total;
        let semantic = semantic_hits as f64 / total;
        let score = (hierarchy + spatial + semantic) / 3.0;
        findings.push(Finding::info(
            "classification",
            format!(
                "hierarchy {hierarchy:.2}, spatial {spatial:.2}, semantic {semantic:.2} over {} pages",
                inspection.pages.len()
            ),
        ));

        Ok(LayerResult {
            layer: LayerId::Structural,
            score,
            max_score: 1.0,
            passed: false,
            skipped: false,
            dry_run: false,
            first_attempt_score: None,
            findings,
            duration_ms: started.elapsed().as_millis() as u64,
            artifacts: previews.to_vec(),
        })
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted[sorted.len() / 2]
}
