// SPDX-License-Identifier: MIT OR Apache-2.0
//! The service worker: renders through the serverless template endpoint.

use crate::{WorkContext, Worker, WorkerError};
use async_trait::async_trait;
use futures::StreamExt;
use press_core::{Artifact, Job};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Smallest byte size a plausible PDF response can have; anything below is
/// treated as a failed render.
const DEFAULT_MIN_BYTES: u64 = 1024;

/// Renders a job by POSTing it to a remote template-rendering endpoint and
/// streaming the PDF to disk. Needs no serialization.
pub struct ServiceWorker {
    endpoint: String,
    client: reqwest::Client,
    min_bytes: u64,
}

impl ServiceWorker {
    /// Routing name of this worker.
    pub const NAME: &'static str = "service";

    /// Create a worker targeting `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            min_bytes: DEFAULT_MIN_BYTES,
        }
    }

    /// Override the minimum acceptable response size.
    #[must_use]
    pub fn with_min_bytes(mut self, min_bytes: u64) -> Self {
        self.min_bytes = min_bytes;
        self
    }
}

#[async_trait]
impl Worker for ServiceWorker {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, job: &Job, ctx: &WorkContext) -> Result<Artifact, WorkerError> {
        let payload = json!({
            "jobId": job.job_id,
            "jobType": job.job_type,
            "content": job.content,
            "export": job.export,
        });
        debug!(
            target: "press.worker",
            job_id = %job.job_id,
            endpoint = %self.endpoint,
            "requesting remote render"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WorkerError::Remote(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(WorkerError::Remote(format!(
                "render endpoint returned {}",
                response.status()
            )));
        }

        // The render service reports the page count alongside the body.
        let page_count = response
            .headers()
            .get("x-page-count")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1);

        if let Some(parent) = ctx.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&ctx.output_path).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| WorkerError::Remote(format!("stream failed: {e}")))?;
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if written < self.min_bytes {
            return Err(WorkerError::Remote(format!(
                "response too small: {written} bytes (min {})",
                self.min_bytes
            )));
        }

        ctx.audit.record("render_endpoint", json!(self.endpoint));
        let artifact = Artifact::from_export(&ctx.output_path, page_count, job.export.intent)
            .map_err(|e| match e {
                press_core::CoreError::Io(io) => WorkerError::Io(io),
                press_core::CoreError::Json(e) => WorkerError::Remote(e.to_string()),
            })?;
        info!(
            target: "press.worker",
            job_id = %job.job_id,
            bytes = written,
            "remote render complete"
        );
        Ok(artifact)
    }
}
