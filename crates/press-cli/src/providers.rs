// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generic HTTP provider adapters.
//!
//! Concrete AI vendors live behind plain HTTP endpoints configured via the
//! environment; these adapters only know the request/response shapes the
//! validation engine consumes. Credentials travel in environment variables,
//! never in job files.

use async_trait::async_trait;
use press_validate::{AccessibilityProvider, AccessibilityReport, ProviderError, VisionProvider};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Environment variable naming the vision endpoint.
pub const VISION_URL_VAR: &str = "PRESS_VISION_URL";
/// Environment variable carrying the vision bearer token.
pub const VISION_TOKEN_VAR: &str = "PRESS_VISION_TOKEN";
/// Environment variable naming the accessibility endpoint.
pub const ACCESS_URL_VAR: &str = "PRESS_ACCESSIBILITY_URL";
/// Environment variable carrying the accessibility bearer token.
pub const ACCESS_TOKEN_VAR: &str = "PRESS_ACCESSIBILITY_TOKEN";

/// Vision provider POSTing page images to a configured endpoint and
/// returning the raw response body for the layer to parse.
pub struct HttpVisionProvider {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpVisionProvider {
    /// Build from the environment; `None` when no endpoint is configured.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var(VISION_URL_VAR).ok()?;
        Some(Self {
            endpoint,
            token: std::env::var(VISION_TOKEN_VAR).ok(),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl VisionProvider for HttpVisionProvider {
    async fn critique(&self, images: &[PathBuf], prompt: &str) -> Result<String, ProviderError> {
        let pages: Vec<String> = images.iter().map(|p| p.display().to_string()).collect();
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "prompt": prompt, "pages": pages }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::Unavailable(format!(
                "vision endpoint returned {}",
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

/// Accessibility provider POSTing the artifact path and standard to a
/// configured endpoint.
pub struct HttpAccessibilityProvider {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpAccessibilityProvider {
    /// Build from the environment; `None` when no endpoint is configured.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var(ACCESS_URL_VAR).ok()?;
        Some(Self {
            endpoint,
            token: std::env::var(ACCESS_TOKEN_VAR).ok(),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl AccessibilityProvider for HttpAccessibilityProvider {
    async fn remediate(
        &self,
        pdf: &Path,
        standard: &str,
    ) -> Result<AccessibilityReport, ProviderError> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "pdf": pdf.display().to_string(),
            "standard": standard,
        }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::Unavailable(format!(
                "accessibility endpoint returned {}",
                response.status()
            )));
        }
        response
            .json::<AccessibilityReport>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}
