// SPDX-License-Identifier: MIT OR Apache-2.0
//! L4 — AI vision review.
//!
//! Submits the page rasters to a [`VisionProvider`] with a brand rubric
//! prompt and applies the provider's `[0, 1]` score. The provider returns
//! raw text; when it is not parseable JSON the layer retries exactly once
//! with a stricter prompt, then records a soft `provider_error` finding.
//! The engine forgives that failure unless the job set
//! `qa.fail_on_ai_error`.

use crate::layers::PROVIDER_ERROR_CATEGORY;
use crate::providers::{VisionProvider, VisionReview};
use crate::{LayerContext, ValidationError, ValidationLayer};
use async_trait::async_trait;
use press_core::{Finding, LayerId, LayerResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

const STRICT_SUFFIX: &str = "\nRespond with JSON only: no prose, no code fences.";

/// External multimodal review of the rendered pages.
pub struct VisionLayer {
    provider: Arc<dyn VisionProvider>,
}

impl VisionLayer {
    /// Review through the given provider.
    #[must_use]
    pub fn new(provider: Arc<dyn VisionProvider>) -> Self {
        Self { provider }
    }

    fn rubric_prompt(job: &press_core::Job) -> String {
        let organization = job
            .content
            .get("organization")
            .and_then(Value::as_str)
            .unwrap_or("the organization");
        format!(
            "Review these document pages as a brand-compliance critic for {organization}. \
             Judge layout balance, typography, color discipline, and overall polish. \
             Reply as JSON: {{\"score\": <0..1>, \"findings\": [..], \
             \"page_notes\": [{{\"page\": n, \"note\": \"..\"}}]}}"
        )
    }

    /// Call the provider and parse its output, retrying once with the
    /// strict prompt on malformed JSON.
    async fn critique(
        &self,
        images: &[std::path::PathBuf],
        prompt: &str,
    ) -> Result<VisionReview, String> {
        let first = self
            .provider
            .critique(images, prompt)
            .await
            .map_err(|e| e.to_string())?;
        match serde_json::from_str::<VisionReview>(&first) {
            Ok(review) => Ok(review),
            Err(parse_err) => {
                warn!(
                    target: "press.validate",
                    error = %parse_err,
                    "vision reply was not JSON, retrying with strict prompt"
                );
                let strict = format!("{prompt}{STRICT_SUFFIX}");
                let second = self
                    .provider
                    .critique(images, &strict)
                    .await
                    .map_err(|e| e.to_string())?;
                serde_json::from_str::<VisionReview>(&second)
                    .map_err(|e| format!("second reply still malformed: {e}"))
            }
        }
    }
}

#[async_trait]
impl ValidationLayer for VisionLayer {
    fn id(&self) -> LayerId {
        LayerId::AiVision
    }

    async fn run(&self, ctx: &LayerContext<'_>) -> Result<LayerResult, ValidationError> {
        let started = Instant::now();
        let previews = ctx.previews.get(&ctx.artifact.path).await?;
        let prompt = Self::rubric_prompt(ctx.job);

        let mut findings = Vec::new();
        let score = match self.critique(previews, &prompt).await {
            Ok(review) => {
                for note in &review.findings {
                    findings.push(Finding::info("vision", note.clone()));
                }
                for page_note in &review.page_notes {
                    findings
                        .push(Finding::info("vision", page_note.note.clone()).on_page(page_note.page));
                }
                review.score.clamp(0.0, 1.0)
            }
            Err(reason) => {
                findings.push(Finding::warning(
                    PROVIDER_ERROR_CATEGORY,
                    format!("vision provider failed: {reason}"),
                ));
                0.0
            }
        };

        if self.provider.is_dry_run() {
            findings.push(Finding::info("vision", "dry-run: synthetic score"));
        }

        Ok(LayerResult {
            layer: LayerId::AiVision,
            score,
            max_score: 1.0,
            passed: false,
            skipped: false,
            dry_run: self.provider.is_dry_run(),
            first_attempt_score: None,
            findings,
            duration_ms: started.elapsed().as_millis() as u64,
            artifacts: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider returning prose on the first call, JSON on the second.
    struct FlakyJson {
        calls: AtomicU32,
    }

    #[async_trait]
    impl VisionProvider for FlakyJson {
        async fn critique(
            &self,
            _images: &[PathBuf],
            prompt: &str,
        ) -> Result<String, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok("Sure! Here's my review: looks great.".into())
            } else {
                assert!(prompt.contains("JSON only"));
                Ok(r#"{"score": 0.88, "findings": ["solid layout"]}"#.into())
            }
        }
    }

    /// Provider that never returns JSON.
    struct NeverJson;

    #[async_trait]
    impl VisionProvider for NeverJson {
        async fn critique(
            &self,
            _images: &[PathBuf],
            _prompt: &str,
        ) -> Result<String, ProviderError> {
            Ok("I am not JSON".into())
        }
    }

    #[tokio::test]
    async fn malformed_reply_retries_once_with_strict_prompt() {
        let layer = VisionLayer::new(Arc::new(FlakyJson {
            calls: AtomicU32::new(0),
        }));
        let review = layer.critique(&[], "rubric").await.unwrap();
        assert_eq!(review.score, 0.88);
    }

    #[tokio::test]
    async fn twice_malformed_becomes_provider_error() {
        let layer = VisionLayer::new(Arc::new(NeverJson));
        let err = layer.critique(&[], "rubric").await.unwrap_err();
        assert!(err.contains("malformed"));
    }
}
