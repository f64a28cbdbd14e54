// SPDX-License-Identifier: MIT OR Apache-2.0
//! L2 — PDF quality.
//!
//! Binary pass/fail over structural soundness: page geometry, text inside
//! the page box, resolvable images, embedded and whitelisted fonts, no
//! substituted fonts. Any critical finding zeroes the layer.

use crate::pdf::{self, PdfInspection};
use crate::{LayerContext, ValidationError, ValidationLayer};
use async_trait::async_trait;
use press_core::{Finding, Job, LayerId, LayerResult};
use serde_json::Value;
use std::time::Instant;

/// Tolerance when comparing page dimensions, in points.
const DIMENSION_TOLERANCE_PT: f64 = 1.0;

/// The PDF base-14 fonts every conforming reader must supply; these are
/// exempt from the embedding requirement.
const BASE_FONTS: &[&str] = &[
    "Helvetica",
    "Helvetica-Bold",
    "Helvetica-Oblique",
    "Helvetica-BoldOblique",
    "Times-Roman",
    "Times-Bold",
    "Times-Italic",
    "Times-BoldItalic",
    "Courier",
    "Courier-Bold",
    "Courier-Oblique",
    "Courier-BoldOblique",
    "Symbol",
    "ZapfDingbats",
];

/// Structural soundness checks.
pub struct QualityLayer;

#[async_trait]
impl ValidationLayer for QualityLayer {
    fn id(&self) -> LayerId {
        LayerId::PdfQuality
    }

    async fn run(&self, ctx: &LayerContext<'_>) -> Result<LayerResult, ValidationError> {
        let started = Instant::now();
        let inspection = pdf::inspect(&ctx.artifact.path)?;
        let mut findings = Vec::new();

        check_dimensions(ctx.job, &inspection, &mut findings);
        check_overflow(&inspection, &mut findings);
        check_images(&inspection, &mut findings);
        check_fonts(ctx.job, &inspection, &mut findings);

        let has_critical = findings
            .iter()
            .any(|f| f.severity == press_core::Severity::Critical);
        Ok(LayerResult {
            layer: LayerId::PdfQuality,
            score: if has_critical { 0.0 } else { 1.0 },
            max_score: 1.0,
            passed: false,
            skipped: false,
            dry_run: false,
            first_attempt_score: None,
            findings,
            duration_ms: started.elapsed().as_millis() as u64,
            artifacts: Vec::new(),
        })
    }
}

/// Expected page size from the job, or `None` to require uniform pages.
fn expected_size(job: &Job) -> Option<(f64, f64)> {
    match job.content.get("page_size") {
        Some(Value::String(name)) => match name.as_str() {
            "A4" => Some((595.0, 842.0)),
            "Letter" => Some((612.0, 792.0)),
            "A3" => Some((842.0, 1191.0)),
            _ => None,
        },
        Some(Value::Object(dims)) => {
            let w = dims.get("width_pt").and_then(Value::as_f64)?;
            let h = dims.get("height_pt").and_then(Value::as_f64)?;
            Some((w, h))
        }
        _ => None,
    }
}

fn check_dimensions(job: &Job, inspection: &PdfInspection, findings: &mut Vec<Finding>) {
    match expected_size(job) {
        Some((w, h)) => {
            for page in &inspection.pages {
                if (page.width_pt - w).abs() > DIMENSION_TOLERANCE_PT
                    || (page.height_pt - h).abs() > DIMENSION_TOLERANCE_PT
                {
                    findings.push(
                        Finding::critical(
                            "dimensions",
                            format!(
                                "page is {:.0}x{:.0}pt, expected {w:.0}x{h:.0}pt",
                                page.width_pt, page.height_pt
                            ),
                        )
                        .on_page(page.number),
                    );
                }
            }
        }
        None => {
            // No declared size: every page must at least agree with the first.
            if let Some(first) = inspection.pages.first() {
                for page in &inspection.pages[1..] {
                    if (page.width_pt - first.width_pt).abs() > DIMENSION_TOLERANCE_PT
                        || (page.height_pt - first.height_pt).abs() > DIMENSION_TOLERANCE_PT
                    {
                        findings.push(
                            Finding::critical("dimensions", "page size differs from page 1")
                                .on_page(page.number),
                        );
                    }
                }
            }
        }
    }
}

fn check_overflow(inspection: &PdfInspection, findings: &mut Vec<Finding>) {
    for page in &inspection.pages {
        for &(x, y) in &page.offpage_positions {
            findings.push(
                Finding::critical("overflow", format!("text positioned at ({x:.0}, {y:.0})"))
                    .on_page(page.number)
                    .at(format!("({x:.0},{y:.0})")),
            );
        }
    }
}

fn check_images(inspection: &PdfInspection, findings: &mut Vec<Finding>) {
    for unresolved in &inspection.unresolved_images {
        findings.push(Finding::critical(
            "image",
            format!("unresolved image reference: {unresolved}"),
        ));
    }
}

fn check_fonts(job: &Job, inspection: &PdfInspection, findings: &mut Vec<Finding>) {
    let whitelist: Vec<String> = match job.content.get("font_whitelist") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    for font in &inspection.fonts {
        let base_exempt = BASE_FONTS.contains(&font.base_name.as_str());
        if !font.embedded && !base_exempt {
            findings.push(Finding::critical(
                "font",
                format!("unembedded:{}", font.base_name),
            ));
        }
        if !whitelist.is_empty()
            && !whitelist.contains(&font.base_name)
            && !base_exempt
        {
            findings.push(Finding::critical(
                "font",
                format!("font outside embed whitelist: {}", font.base_name),
            ));
        }
        if font.base_name.contains("Subst") {
            findings.push(Finding::critical(
                "substitution",
                format!("substituted font: {}", font.base_name),
            ));
        }
    }
}
