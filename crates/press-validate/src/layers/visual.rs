// SPDX-License-Identifier: MIT OR Apache-2.0
//! L3 — visual regression.
//!
//! Rasterizes every page and compares it pixel-wise against a named
//! baseline, computing a per-page percent difference. The layer passes when
//! the worst page stays at or below the allowance implied by its
//! `min_score` (score = 1 − max_diff/100). Skipped — not failed — when the
//! job names no baseline or the named baseline does not exist on disk.

use crate::{LayerContext, ValidationError, ValidationLayer};
use async_trait::async_trait;
use press_core::{Finding, LayerId, LayerResult};
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Pixel-diff comparison against a stored baseline.
pub struct VisualRegressionLayer;

#[async_trait]
impl ValidationLayer for VisualRegressionLayer {
    fn id(&self) -> LayerId {
        LayerId::VisualRegression
    }

    async fn run(&self, ctx: &LayerContext<'_>) -> Result<LayerResult, ValidationError> {
        let started = Instant::now();

        let Some(baseline_id) = &ctx.job.qa.visual_baseline else {
            let mut result = LayerResult::skipped_passing(LayerId::VisualRegression);
            result
                .findings
                .push(Finding::info("baseline", "no baseline configured, layer skipped"));
            return Ok(result);
        };
        let baseline_dir = ctx.baseline_root.join(baseline_id);
        if !baseline_dir.is_dir() {
            let mut result = LayerResult::skipped_passing(LayerId::VisualRegression);
            result.findings.push(Finding::warning(
                "baseline",
                format!("baseline '{baseline_id}' not found, layer skipped"),
            ));
            return Ok(result);
        }

        let current = ctx.previews.get(&ctx.artifact.path).await?;
        let mut baseline_pages: Vec<_> = std::fs::read_dir(&baseline_dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("ppm"))
            .collect();
        baseline_pages.sort();

        let mut findings = Vec::new();
        if baseline_pages.len() != current.len() {
            findings.push(Finding::critical(
                "pages",
                format!(
                    "page count changed: baseline {} vs current {}",
                    baseline_pages.len(),
                    current.len()
                ),
            ));
            return Ok(LayerResult {
                layer: LayerId::VisualRegression,
                score: 0.0,
                max_score: 1.0,
                passed: false,
                skipped: false,
                dry_run: false,
                first_attempt_score: None,
                findings,
                duration_ms: started.elapsed().as_millis() as u64,
                artifacts: Vec::new(),
            });
        }

        let mut max_diff = 0.0f64;
        for (index, (ours, theirs)) in current.iter().zip(&baseline_pages).enumerate() {
            let page = index as u32 + 1;
            let diff = match diff_percent(ours, theirs) {
                Ok(diff) => diff,
                Err(reason) => {
                    findings.push(
                        Finding::warning("diff", format!("comparison failed: {reason}"))
                            .on_page(page),
                    );
                    100.0
                }
            };
            debug!(target: "press.validate", page, diff, "visual diff");
            if diff > 0.0 {
                findings.push(
                    Finding::info("diff", format!("{diff:.2}% pixels differ"))
                        .on_page(page),
                );
            }
            max_diff = max_diff.max(diff);
        }

        Ok(LayerResult {
            layer: LayerId::VisualRegression,
            score: 1.0 - max_diff / 100.0,
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

// ---------------------------------------------------------------------------
// PPM parsing and pixel diff
// ---------------------------------------------------------------------------

struct Pixmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

/// Parse a binary (`P6`) portable pixmap.
fn read_ppm(path: &Path) -> Result<Pixmap, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let mut fields = Vec::new();
    let mut cursor = 0usize;

    // Header fields: magic, width, height, maxval. Whitespace separated,
    // with optional `#` comments.
    while fields.len() < 4 && cursor < bytes.len() {
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor < bytes.len() && bytes[cursor] == b'#' {
            while cursor < bytes.len() && bytes[cursor] != b'\n' {
                cursor += 1;
            }
            continue;
        }
        let start = cursor;
        while cursor < bytes.len() && !bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        fields.push(
            std::str::from_utf8(&bytes[start..cursor])
                .map_err(|e| e.to_string())?
                .to_string(),
        );
    }
    if fields.len() < 4 || fields[0] != "P6" {
        return Err(format!("{} is not a binary ppm", path.display()));
    }
    let width: u32 = fields[1].parse().map_err(|_| "bad width".to_string())?;
    let height: u32 = fields[2].parse().map_err(|_| "bad height".to_string())?;
    cursor += 1; // single whitespace after maxval
    let expected = (width * height * 3) as usize;
    let data = bytes
        .get(cursor..cursor + expected)
        .ok_or_else(|| "truncated pixel data".to_string())?
        .to_vec();
    Ok(Pixmap {
        width,
        height,
        data,
    })
}

/// Percentage of pixels that differ between two pages. Dimension mismatch
/// counts as a full-page difference.
fn diff_percent(ours: &Path, theirs: &Path) -> Result<f64, String> {
    let a = read_ppm(ours)?;
    let b = read_ppm(theirs)?;
    if a.width != b.width || a.height != b.height {
        return Ok(100.0);
    }
    let total = (a.width * a.height) as usize;
    if total == 0 {
        return Ok(0.0);
    }
    let differing = a
        .data
        .chunks_exact(3)
        .zip(b.data.chunks_exact(3))
        .filter(|(x, y)| x != y)
        .count();
    Ok(differing as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::write_solid_ppm;

    #[test]
    fn identical_pages_diff_zero() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.ppm");
        let b = dir.path().join("b.ppm");
        write_solid_ppm(&a, 8, 8, [10, 20, 30]).unwrap();
        write_solid_ppm(&b, 8, 8, [10, 20, 30]).unwrap();
        assert_eq!(diff_percent(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn fully_different_pages_diff_hundred() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.ppm");
        let b = dir.path().join("b.ppm");
        write_solid_ppm(&a, 8, 8, [0, 0, 0]).unwrap();
        write_solid_ppm(&b, 8, 8, [255, 255, 255]).unwrap();
        assert_eq!(diff_percent(&a, &b).unwrap(), 100.0);
    }

    #[test]
    fn dimension_mismatch_is_full_difference() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.ppm");
        let b = dir.path().join("b.ppm");
        write_solid_ppm(&a, 8, 8, [0, 0, 0]).unwrap();
        write_solid_ppm(&b, 4, 4, [0, 0, 0]).unwrap();
        assert_eq!(diff_percent(&a, &b).unwrap(), 100.0);
    }
}
