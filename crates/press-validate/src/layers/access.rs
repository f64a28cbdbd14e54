// SPDX-License-Identifier: MIT OR Apache-2.0
//! L5 — accessibility remediation.
//!
//! Delegates to an [`AccessibilityProvider`] that scores the PDF against a
//! named standard and may write a remediated copy at a sibling path. A
//! provider failure is recorded as a soft `provider_error` finding, the
//! same forgiveness contract the vision layer uses.

use crate::layers::PROVIDER_ERROR_CATEGORY;
use crate::providers::AccessibilityProvider;
use crate::{LayerContext, ValidationError, ValidationLayer};
use async_trait::async_trait;
use press_core::{Finding, LayerId, LayerResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Default compliance standard when the job names none.
const DEFAULT_STANDARD: &str = "PDF/UA-1";

/// Accessibility compliance scoring and remediation.
pub struct AccessibilityLayer {
    provider: Arc<dyn AccessibilityProvider>,
}

impl AccessibilityLayer {
    /// Remediate through the given provider.
    #[must_use]
    pub fn new(provider: Arc<dyn AccessibilityProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ValidationLayer for AccessibilityLayer {
    fn id(&self) -> LayerId {
        LayerId::Accessibility
    }

    async fn run(&self, ctx: &LayerContext<'_>) -> Result<LayerResult, ValidationError> {
        let started = Instant::now();
        let standard = ctx
            .job
            .content
            .get("accessibility_standard")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_STANDARD);

        let mut findings = Vec::new();
        let mut artifacts = Vec::new();
        let score = match self.provider.remediate(&ctx.artifact.path, standard).await {
            Ok(report) => {
                findings.push(Finding::info(
                    "accessibility",
                    format!("scored {:.2} against {}", report.score, report.standard),
                ));
                if let Some(remediated) = report.remediated_path {
                    findings.push(Finding::info(
                        "accessibility",
                        format!("remediated copy at {}", remediated.display()),
                    ));
                    artifacts.push(remediated);
                }
                report.score.clamp(0.0, 1.0)
            }
            Err(e) => {
                findings.push(Finding::warning(
                    PROVIDER_ERROR_CATEGORY,
                    format!("accessibility provider failed: {e}"),
                ));
                0.0
            }
        };

        Ok(LayerResult {
            layer: LayerId::Accessibility,
            score,
            max_score: 1.0,
            passed: false,
            skipped: false,
            dry_run: self.provider.is_dry_run(),
            first_attempt_score: None,
            findings,
            duration_ms: started.elapsed().as_millis() as u64,
            artifacts,
        })
    }
}
