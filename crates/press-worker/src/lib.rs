// SPDX-License-Identifier: MIT OR Apache-2.0
//! Artifact-producing workers.
//!
//! A [`Worker`] turns a [`Job`] into an [`Artifact`] and nothing else —
//! validation is someone else's problem. Two implementations exist:
//!
//! - [`LayoutWorker`] drives the external layout application through the
//!   MCP client. It must never run concurrently with itself; the router
//!   serializes it behind the process-global [`LayoutLock`].
//! - [`ServiceWorker`] POSTs the job to the application's serverless
//!   equivalent and streams the PDF to disk. No lock.
//!
//! Both are idempotent with respect to the caller-supplied output path and
//! never mutate the input job.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod layout;
mod service;

pub use layout::LayoutWorker;
pub use service::ServiceWorker;

use async_trait::async_trait;
use press_core::{Artifact, ErrorCategory, Job, RunAudit};
use press_mcp::McpError;
use std::path::PathBuf;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Worker failures, bucketed the way the router reports them.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The command channel failed under the worker.
    #[error("transport failure: {0}")]
    Transport(#[source] McpError),

    /// The layout application rejected or failed a script.
    #[error("script failure: {0}")]
    Script(#[source] McpError),

    /// The export step failed (unknown preset, export error).
    #[error("export failure: {0}")]
    Export(#[source] McpError),

    /// The remote render service misbehaved.
    #[error("remote render failure: {0}")]
    Remote(String),

    /// Local filesystem failure while materializing the artifact.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// The scorecard error category this failure maps to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Script(_) => ErrorCategory::Script,
            Self::Export(_) | Self::Remote(_) => ErrorCategory::Export,
            Self::Io(_) => ErrorCategory::Io,
        }
    }

    /// Bucket an MCP failure into the worker taxonomy.
    #[must_use]
    pub fn from_mcp(err: McpError) -> Self {
        match &err {
            McpError::Timeout { .. }
            | McpError::Disconnected
            | McpError::TransportUnavailable { .. } => Self::Transport(err),
            McpError::PresetUnknown { .. } | McpError::ExportFailed { .. } => Self::Export(err),
            _ => Self::Script(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Per-run inputs that are not part of the immutable job.
#[derive(Debug, Clone)]
pub struct WorkContext {
    /// Where the worker must write the PDF. The worker overwrites; two runs
    /// with the same path are idempotent.
    pub output_path: PathBuf,
    /// Audit trail the worker records provenance into (export preset,
    /// hook outcomes).
    pub audit: RunAudit,
    /// Ask the layout application to run color correction before export.
    /// Set by the validation engine's auto-fix retry.
    pub color_fix: bool,
}

impl WorkContext {
    /// A context writing to `output_path` with a fresh audit trail.
    #[must_use]
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            audit: RunAudit::new(),
            color_fix: false,
        }
    }
}

/// Executes a job to produce an artifact, independent of validation.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Worker name used in routing decisions and logs.
    fn name(&self) -> &str;

    /// Produce the artifact. Must not mutate `job`; must overwrite
    /// `ctx.output_path` rather than fail when it exists.
    async fn execute(&self, job: &Job, ctx: &WorkContext) -> Result<Artifact, WorkerError>;
}

// ---------------------------------------------------------------------------
// Layout lock
// ---------------------------------------------------------------------------

/// Process-global, fair-FIFO, non-reentrant lock serializing every use of
/// the layout worker. The single external application instance cannot
/// survive interleaved script execution; this lock is the only mechanism
/// preventing it. Constructor-injected — never an ambient global.
#[derive(Debug, Clone, Default)]
pub struct LayoutLock {
    inner: Arc<tokio::sync::Mutex<()>>,
}

impl LayoutLock {
    /// Create a lock. One instance per process; clones share it.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire exclusive use of the layout application. Waiters queue in
    /// FIFO order; the guard releases on every exit path.
    pub async fn acquire(&self) -> tokio::sync::OwnedMutexGuard<()> {
        Arc::clone(&self.inner).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn mcp_errors_bucket_into_router_categories() {
        let transport = WorkerError::from_mcp(McpError::Disconnected);
        assert_eq!(transport.category(), ErrorCategory::Transport);

        let export = WorkerError::from_mcp(McpError::PresetUnknown {
            preset: "p".into(),
        });
        assert_eq!(export.category(), ErrorCategory::Export);

        let script = WorkerError::from_mcp(McpError::Script {
            line: None,
            message: "x".into(),
        });
        assert_eq!(script.category(), ErrorCategory::Script);
    }

    #[tokio::test]
    async fn layout_lock_serializes_holders() {
        let lock = LayoutLock::new();
        let guard = lock.acquire().await;

        let contender = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let _guard = lock.acquire().await;
            })
        };
        // The contender cannot finish while the guard is held.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender should acquire after release")
            .unwrap();
    }
}
