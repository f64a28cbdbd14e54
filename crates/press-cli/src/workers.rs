// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connect-on-demand layout worker.
//!
//! The transport session is only opened when a job actually routes to the
//! layout worker, so service-only runs never touch the proxy.

use async_trait::async_trait;
use press_core::{Artifact, Job};
use press_mcp::{McpClient, McpConfig, McpError, RetryPolicy};
use press_transport::{Session, TransportConfig};
use press_worker::{LayoutWorker, WorkContext, Worker, WorkerError};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Wraps [`LayoutWorker`] behind a lazily established session.
pub struct OnDemandLayoutWorker {
    transport: TransportConfig,
    retry: RetryPolicy,
    doc_id: String,
    ready_url: String,
    inner: OnceCell<LayoutWorker>,
}

impl OnDemandLayoutWorker {
    /// Prepare (but do not connect) a layout worker.
    pub fn new(settings: &press_config::Settings) -> Self {
        let transport = TransportConfig::for_proxy(&settings.proxy_base, &settings.application);
        let retry = RetryPolicy {
            max_attempts: settings.retry.max_retries + 1,
            base_delay_ms: settings.retry.base_delay_ms,
            max_delay_ms: settings.retry.max_delay_ms,
            budget_ms: settings.retry.overall_timeout_ms,
        };
        Self {
            transport,
            retry,
            doc_id: settings.doc_id.clone(),
            ready_url: format!("http://{}/ready", settings.proxy_base),
            inner: OnceCell::new(),
        }
    }

    async fn connect(&self) -> Result<LayoutWorker, WorkerError> {
        let session = Session::connect(self.transport.clone()).await.map_err(|e| {
            WorkerError::Transport(McpError::TransportUnavailable {
                reason: e.to_string(),
            })
        })?;
        let client = McpClient::new(
            Arc::new(session),
            McpConfig {
                retry: self.retry.clone(),
                ready_url: Some(self.ready_url.clone()),
                ..McpConfig::default()
            },
        );
        Ok(LayoutWorker::new(Arc::new(client), self.doc_id.clone()))
    }
}

#[async_trait]
impl Worker for OnDemandLayoutWorker {
    fn name(&self) -> &str {
        LayoutWorker::NAME
    }

    async fn execute(&self, job: &Job, ctx: &WorkContext) -> Result<Artifact, WorkerError> {
        let worker = self
            .inner
            .get_or_try_init(|| self.connect())
            .await?;
        worker.execute(job, ctx).await
    }
}
