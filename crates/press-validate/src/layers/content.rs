// SPDX-License-Identifier: MIT OR Apache-2.0
//! L1 — content and brand rubric.
//!
//! Parses the PDF text layer and grades it on the 0–150 rubric:
//!
//! | check                          | points |
//! |--------------------------------|--------|
//! | required tokens present        | 40     |
//! | required sections present      | 20     |
//! | page count as declared         | 10     |
//! | fonts within whitelist         | 25     |
//! | required / forbidden colors    | 30     |
//! | image resolution for intent    | 25     |
//!
//! Every check reads its expectations from the job's `content` mapping; a
//! check with nothing declared earns full points.

use crate::pdf::{self, PdfInspection};
use crate::{LayerContext, ValidationError, ValidationLayer};
use async_trait::async_trait;
use press_core::{Finding, Intent, Job, LayerId, LayerResult};
use serde_json::Value;
use std::time::Instant;

const TOKEN_POINTS: f64 = 40.0;
const SECTION_POINTS: f64 = 20.0;
const PAGE_POINTS: f64 = 10.0;
const FONT_POINTS: f64 = 25.0;
const COLOR_POINTS: f64 = 30.0;
const IMAGE_POINTS: f64 = 25.0;

/// Minimum effective DPI accepted per intent.
fn min_dpi(intent: Intent) -> f64 {
    match intent {
        Intent::Print => 300.0,
        Intent::Screen => 144.0,
    }
}

/// Text-layer rubric grading.
pub struct ContentLayer;

#[async_trait]
impl ValidationLayer for ContentLayer {
    fn id(&self) -> LayerId {
        LayerId::Content
    }

    async fn run(&self, ctx: &LayerContext<'_>) -> Result<LayerResult, ValidationError> {
        let started = Instant::now();
        let inspection = pdf::inspect(&ctx.artifact.path)?;
        let mut findings = Vec::new();

        let score = score_tokens(ctx.job, &inspection, &mut findings)
            + score_sections(ctx.job, &inspection, &mut findings)
            + score_page_count(ctx.job, &inspection, &mut findings)
            + score_fonts(ctx.job, &inspection, &mut findings)
            + score_colors(ctx.job, &inspection, &mut findings)
            + score_images(ctx.job, &inspection, &mut findings);

        Ok(LayerResult {
            layer: LayerId::Content,
            score,
            max_score: 150.0,
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

/// Tokens the document must literally contain: the organization name, the
/// partner name, and every metric value from the job content.
fn expected_tokens(job: &Job) -> Vec<String> {
    let mut tokens = Vec::new();
    for key in ["organization", "partner"] {
        if let Some(Value::String(s)) = job.content.get(key) {
            tokens.push(s.clone());
        }
    }
    if let Some(Value::Object(metrics)) = job.content.get("metrics") {
        for value in metrics.values() {
            match value {
                Value::String(s) => tokens.push(s.clone()),
                Value::Number(n) => tokens.push(n.to_string()),
                _ => {}
            }
        }
    }
    tokens
}

fn score_tokens(job: &Job, inspection: &PdfInspection, findings: &mut Vec<Finding>) -> f64 {
    let tokens = expected_tokens(job);
    if tokens.is_empty() {
        return TOKEN_POINTS;
    }
    let text = inspection.full_text();
    let mut hits = 0usize;
    for token in &tokens {
        if text.contains(token.as_str()) {
            hits += 1;
        } else {
            findings.push(Finding::warning("token", format!("missing token: {token}")));
        }
    }
    TOKEN_POINTS * hits as f64 / tokens.len() as f64
}

fn score_sections(job: &Job, inspection: &PdfInspection, findings: &mut Vec<Finding>) -> f64 {
    let Some(Value::Array(sections)) = job.content.get("required_sections") else {
        return SECTION_POINTS;
    };
    let wanted: Vec<&str> = sections.iter().filter_map(Value::as_str).collect();
    if wanted.is_empty() {
        return SECTION_POINTS;
    }
    let text = inspection.full_text();
    let mut hits = 0usize;
    for section in &wanted {
        if text.contains(section) {
            hits += 1;
        } else {
            findings.push(Finding::warning(
                "section",
                format!("missing section: {section}"),
            ));
        }
    }
    SECTION_POINTS * hits as f64 / wanted.len() as f64
}

fn score_page_count(job: &Job, inspection: &PdfInspection, findings: &mut Vec<Finding>) -> f64 {
    let Some(expected) = job.content.get("expected_pages").and_then(Value::as_u64) else {
        return PAGE_POINTS;
    };
    if u64::from(inspection.page_count) == expected {
        PAGE_POINTS
    } else {
        findings.push(Finding::warning(
            "page_count",
            format!("expected {expected} pages, found {}", inspection.page_count),
        ));
        0.0
    }
}

fn score_fonts(job: &Job, inspection: &PdfInspection, findings: &mut Vec<Finding>) -> f64 {
    let Some(Value::Array(whitelist)) = job.content.get("font_whitelist") else {
        return FONT_POINTS;
    };
    let allowed: Vec<&str> = whitelist.iter().filter_map(Value::as_str).collect();
    if allowed.is_empty() {
        return FONT_POINTS;
    }
    let mut clean = true;
    for font in inspection.font_names() {
        if !allowed.contains(&font.as_str()) {
            clean = false;
            findings.push(Finding::warning(
                "font",
                format!("font outside whitelist: {font}"),
            ));
        }
    }
    if clean {
        FONT_POINTS
    } else {
        0.0
    }
}

fn score_colors(job: &Job, inspection: &PdfInspection, findings: &mut Vec<Finding>) -> f64 {
    let required: Vec<String> = string_list(job, "required_colors");
    let forbidden: Vec<String> = string_list(job, "forbidden_colors");
    if required.is_empty() && forbidden.is_empty() {
        return COLOR_POINTS;
    }

    let half = COLOR_POINTS / 2.0;
    let mut earned = 0.0;

    if required.is_empty() {
        earned += half;
    } else {
        let mut all_present = true;
        for color in &required {
            if !inspection.rgb_colors.contains(color) && !inspection.cmyk_colors.contains(color) {
                all_present = false;
                findings.push(
                    Finding::warning("color", format!("required color absent: {color}"))
                        .at(color.clone()),
                );
            }
        }
        if all_present {
            earned += half;
        }
    }

    if forbidden.is_empty() {
        earned += half;
    } else {
        let mut none_present = true;
        for color in &forbidden {
            if inspection.rgb_colors.contains(color) || inspection.cmyk_colors.contains(color) {
                none_present = false;
                findings.push(
                    Finding::warning("color", format!("forbidden color present: {color}"))
                        .at(color.clone()),
                );
            }
        }
        if none_present {
            earned += half;
        }
    }
    earned
}

fn score_images(job: &Job, inspection: &PdfInspection, findings: &mut Vec<Finding>) -> f64 {
    let floor = min_dpi(job.export.intent);
    let mut adequate = true;
    for page in &inspection.pages {
        for &dpi in &page.image_dpis {
            if dpi < floor {
                adequate = false;
                findings.push(
                    Finding::warning(
                        "image",
                        format!("image at ~{dpi:.0} dpi below the {floor:.0} dpi floor"),
                    )
                    .on_page(page.number),
                );
            }
        }
    }
    if adequate {
        IMAGE_POINTS
    } else {
        0.0
    }
}

fn string_list(job: &Job, key: &str) -> Vec<String> {
    match job.content.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
