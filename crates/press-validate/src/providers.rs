// SPDX-License-Identifier: MIT OR Apache-2.0
//! Provider adapters: vision review, accessibility remediation, and page
//! rasterization.
//!
//! Concrete AI/vision vendors live outside the core; the engine only knows
//! these traits and the shape of the JSON they return. Every provider has a
//! dry-run implementation returning a synthetic, deterministic result with
//! no external call — toggled per provider via `DRY_RUN_VISION` /
//! `DRY_RUN_ACCESSIBILITY` or settings.

use crate::ValidationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Failures from external providers. Soft by default: layers convert these
/// into findings instead of aborting the run.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider could not be reached or refused the request.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider responded with something unusable.
    #[error("provider returned malformed output: {0}")]
    Malformed(String),

    /// Local I/O toward the provider failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Vision
// ---------------------------------------------------------------------------

/// Parsed review returned by a vision provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionReview {
    /// Quality score in `[0, 1]`.
    pub score: f64,
    /// Free-form findings.
    #[serde(default)]
    pub findings: Vec<String>,
    /// Per-page notes.
    #[serde(default)]
    pub page_notes: Vec<PageNote>,
}

/// One per-page note from the vision provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageNote {
    /// 1-based page number.
    pub page: u32,
    /// The note.
    pub note: String,
}

/// Submits rasterized pages to an external multimodal model.
///
/// The provider returns its *raw* textual output; the vision layer parses
/// it into a [`VisionReview`] and owns the malformed-JSON retry protocol.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Critique the given page images against a rubric prompt.
    async fn critique(&self, images: &[PathBuf], prompt: &str) -> Result<String, ProviderError>;

    /// `true` when this provider fabricates results without external calls.
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Dry-run vision provider: returns a deterministic score just above the
/// given floor, without any network call.
pub struct DryRunVision {
    floor: f64,
}

impl DryRunVision {
    /// Synthetic score margin above the floor.
    pub const EPSILON: f64 = 0.01;

    /// A provider whose synthetic score clears `floor`.
    #[must_use]
    pub fn above(floor: f64) -> Self {
        Self { floor }
    }
}

#[async_trait]
impl VisionProvider for DryRunVision {
    async fn critique(&self, images: &[PathBuf], _prompt: &str) -> Result<String, ProviderError> {
        let score = (self.floor + Self::EPSILON).min(1.0);
        debug!(target: "press.validate", pages = images.len(), score, "dry-run vision critique");
        let review = VisionReview {
            score,
            findings: vec!["dry-run: no external review performed".into()],
            page_notes: Vec::new(),
        };
        serde_json::to_string(&review).map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Accessibility
// ---------------------------------------------------------------------------

/// Result of an accessibility remediation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessibilityReport {
    /// Compliance score in `[0, 1]` against the requested standard.
    pub score: f64,
    /// Standard the score was measured against (e.g. `"PDF/UA-1"`).
    pub standard: String,
    /// Remediated PDF written next to the input, when produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediated_path: Option<PathBuf>,
}

/// Scores (and optionally remediates) a PDF against an accessibility
/// standard.
#[async_trait]
pub trait AccessibilityProvider: Send + Sync {
    /// Analyse `pdf` against `standard`, optionally writing a remediated
    /// copy at a sibling path.
    async fn remediate(&self, pdf: &Path, standard: &str)
        -> Result<AccessibilityReport, ProviderError>;

    /// `true` when this provider fabricates results without external calls.
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Dry-run accessibility provider: deterministic score, no remediated file.
pub struct DryRunAccessibility {
    floor: f64,
}

impl DryRunAccessibility {
    /// A provider whose synthetic score clears `floor`.
    #[must_use]
    pub fn above(floor: f64) -> Self {
        Self { floor }
    }
}

#[async_trait]
impl AccessibilityProvider for DryRunAccessibility {
    async fn remediate(
        &self,
        _pdf: &Path,
        standard: &str,
    ) -> Result<AccessibilityReport, ProviderError> {
        Ok(AccessibilityReport {
            score: (self.floor + DryRunVision::EPSILON).min(1.0),
            standard: standard.to_string(),
            remediated_path: None,
        })
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Rasterization
// ---------------------------------------------------------------------------

/// Rasterizes PDF pages into portable pixmap (`.ppm`) files, one per page,
/// in page order.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Rasterize every page of `pdf` into `out_dir`, returning the page
    /// image paths in order.
    async fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ProviderError>;
}

/// Rasterizer shelling out to a `pdftoppm`-compatible tool.
pub struct CommandRasterizer {
    command: String,
    dpi: u32,
}

impl CommandRasterizer {
    /// Use `command` (e.g. `"pdftoppm"`) at the given DPI.
    #[must_use]
    pub fn new(command: impl Into<String>, dpi: u32) -> Self {
        Self {
            command: command.into(),
            dpi,
        }
    }
}

#[async_trait]
impl PageRasterizer for CommandRasterizer {
    async fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ProviderError> {
        tokio::fs::create_dir_all(out_dir).await?;
        let prefix = out_dir.join("page");
        let status = tokio::process::Command::new(&self.command)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(pdf)
            .arg(&prefix)
            .status()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("{}: {e}", self.command)))?;
        if !status.success() {
            return Err(ProviderError::Unavailable(format!(
                "{} exited with {status}",
                self.command
            )));
        }

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("ppm") {
                pages.push(path);
            }
        }
        pages.sort();
        if pages.is_empty() {
            return Err(ProviderError::Malformed("no pages produced".into()));
        }
        Ok(pages)
    }
}

/// Test/dry-run rasterizer producing small solid-color PPM pages without
/// reading the PDF at all.
pub struct StubRasterizer {
    /// Number of pages to fabricate.
    pub pages: u32,
    /// Fill color for every pixel.
    pub rgb: [u8; 3],
}

impl StubRasterizer {
    /// Fabricate `pages` pages of the given solid color.
    #[must_use]
    pub fn new(pages: u32, rgb: [u8; 3]) -> Self {
        Self { pages, rgb }
    }
}

/// Write a solid-color binary PPM (P6) file.
pub fn write_solid_ppm(
    path: &Path,
    width: u32,
    height: u32,
    rgb: [u8; 3],
) -> std::io::Result<()> {
    let mut body = format!("P6\n{width} {height}\n255\n").into_bytes();
    for _ in 0..(width * height) {
        body.extend_from_slice(&rgb);
    }
    std::fs::write(path, body)
}

#[async_trait]
impl PageRasterizer for StubRasterizer {
    async fn rasterize(&self, _pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ProviderError> {
        tokio::fs::create_dir_all(out_dir).await?;
        let mut pages = Vec::new();
        for index in 1..=self.pages {
            let path = out_dir.join(format!("page-{index:02}.ppm"));
            write_solid_ppm(&path, 8, 8, self.rgb)?;
            pages.push(path);
        }
        Ok(pages)
    }
}

// ---------------------------------------------------------------------------
// Shared preview cache
// ---------------------------------------------------------------------------

/// Lazily materialized page rasters, shared by every layer that needs them
/// (structural, visual regression, vision). The first caller pays for the
/// rasterization; the rest reuse it.
pub struct Previews {
    rasterizer: Arc<dyn PageRasterizer>,
    out_dir: PathBuf,
    cell: OnceCell<Vec<PathBuf>>,
}

impl Previews {
    /// A cache rasterizing into `out_dir` with the given rasterizer.
    #[must_use]
    pub fn new(rasterizer: Arc<dyn PageRasterizer>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            rasterizer,
            out_dir: out_dir.into(),
            cell: OnceCell::new(),
        }
    }

    /// The page images for `pdf`, rasterizing on first use.
    ///
    /// # Errors
    ///
    /// [`ValidationError::Raster`] when the rasterizer fails.
    pub async fn get(&self, pdf: &Path) -> Result<&[PathBuf], ValidationError> {
        let pages = self
            .cell
            .get_or_try_init(|| async {
                self.rasterizer
                    .rasterize(pdf, &self.out_dir)
                    .await
                    .map_err(|e| ValidationError::Raster(e.to_string()))
            })
            .await?;
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_vision_returns_parseable_json_above_floor() {
        let provider = DryRunVision::above(0.92);
        let raw = provider.critique(&[], "rubric").await.unwrap();
        let review: VisionReview = serde_json::from_str(&raw).unwrap();
        assert!(review.score >= 0.92);
        assert!(provider.is_dry_run());
    }

    #[tokio::test]
    async fn stub_rasterizer_produces_ordered_ppm_pages() {
        let dir = tempfile::tempdir().unwrap();
        let stub = StubRasterizer::new(3, [255, 0, 0]);
        let pages = stub
            .rasterize(Path::new("unused.pdf"), dir.path())
            .await
            .unwrap();
        assert_eq!(pages.len(), 3);
        assert!(pages[0].file_name().unwrap().to_str().unwrap() < pages[2].file_name().unwrap().to_str().unwrap());
    }

    #[tokio::test]
    async fn previews_rasterize_once_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let previews = Previews::new(
            Arc::new(StubRasterizer::new(2, [0, 0, 0])),
            dir.path().join("previews"),
        );
        let first = previews.get(Path::new("x.pdf")).await.unwrap().to_vec();
        let second = previews.get(Path::new("x.pdf")).await.unwrap().to_vec();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }
}
