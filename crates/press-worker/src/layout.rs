// SPDX-License-Identifier: MIT OR Apache-2.0
//! The layout worker: drives the external layout application over MCP.

use crate::{WorkContext, Worker, WorkerError};
use async_trait::async_trait;
use press_core::{Artifact, Job};
use press_mcp::McpClient;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Probe whether the named export preset exists in the application.
const PRESET_PROBE_SCRIPT: &str =
    "var p = app.pdfExportPresets.itemByName(args.preset); ({ exists: p.isValid });";

/// Embed job provenance into the document's XMP metadata.
const EMBED_METADATA_SCRIPT: &str =
    "var d = app.documents.itemByID(args.docId); d.metadataPreferences.description = args.jobId; ({ ok: true });";

/// Switch the document's transparency blending space to match the intent.
const INTENT_COLOR_SCRIPT: &str =
    "var d = app.documents.itemByID(args.docId); d.transparencyPreference.blendingSpace = args.space; ({ ok: true });";

/// Re-map swatches that fall outside the brand palette.
const COLOR_FIX_SCRIPT: &str =
    "var d = app.documents.itemByID(args.docId); ({ remapped: remapOffBrandSwatches(d, args.palette) });";

/// Drives one open document in the layout application.
///
/// Requires external serialization: the router wraps every `execute` in the
/// process-global [`crate::LayoutLock`].
pub struct LayoutWorker {
    client: Arc<McpClient>,
    doc_id: String,
}

impl LayoutWorker {
    /// Routing name of this worker.
    pub const NAME: &'static str = "layout";

    /// Create a worker driving the document `doc_id` through `client`.
    #[must_use]
    pub fn new(client: Arc<McpClient>, doc_id: impl Into<String>) -> Self {
        Self {
            client,
            doc_id: doc_id.into(),
        }
    }

    async fn run_script(
        &self,
        source: &str,
        args: BTreeMap<String, Value>,
    ) -> Result<Value, WorkerError> {
        self.client
            .execute_script(source, &args)
            .await
            .map_err(WorkerError::from_mcp)
    }
}

#[async_trait]
impl Worker for LayoutWorker {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, job: &Job, ctx: &WorkContext) -> Result<Artifact, WorkerError> {
        let info = self
            .client
            .read_document_info(&self.doc_id)
            .await
            .map_err(WorkerError::from_mcp)?;
        debug!(
            target: "press.worker",
            job_id = %job.job_id,
            pages = info.page_count,
            "document open"
        );

        // The export would fail on an unknown preset anyway, but probing
        // first gives a clean Export error before any document mutation.
        let probe = self
            .run_script(
                PRESET_PROBE_SCRIPT,
                args(&[("preset", json!(job.export.preset))]),
            )
            .await?;
        if probe.get("exists").and_then(Value::as_bool) != Some(true) {
            return Err(WorkerError::Export(press_mcp::McpError::PresetUnknown {
                preset: job.export.preset.clone(),
            }));
        }

        // Pre-export hooks: provenance metadata, intent color space, and
        // the optional color-fix pass requested by auto-remediation.
        self.run_script(
            EMBED_METADATA_SCRIPT,
            args(&[
                ("docId", json!(self.doc_id)),
                ("jobId", json!(job.job_id)),
            ]),
        )
        .await?;
        let space = match job.export.intent {
            press_core::Intent::Print => "CMYK",
            press_core::Intent::Screen => "RGB",
        };
        self.run_script(
            INTENT_COLOR_SCRIPT,
            args(&[("docId", json!(self.doc_id)), ("space", json!(space))]),
        )
        .await?;
        if ctx.color_fix {
            let fixed = self
                .run_script(
                    COLOR_FIX_SCRIPT,
                    args(&[
                        ("docId", json!(self.doc_id)),
                        ("palette", json!(job.content.get("palette"))),
                    ]),
                )
                .await?;
            ctx.audit.record("color_fix_remapped", fixed["remapped"].clone());
        }
        if let Some(logo) = job.content.get("partner_logo").and_then(Value::as_str) {
            let frame = job
                .content
                .get("logo_frame")
                .and_then(Value::as_str)
                .unwrap_or("partner-logo");
            self.client
                .place_image(&self.doc_id, frame, std::path::Path::new(logo))
                .await
                .map_err(WorkerError::from_mcp)?;
            ctx.audit.record("partner_logo", json!(logo));
        }

        // The preset must be in the audit trail before the export happens.
        ctx.audit
            .record("export_preset", json!(job.export.preset));
        ctx.audit.record("export_intent", json!(job.export.intent));

        let receipt = self
            .client
            .export_pdf(
                &self.doc_id,
                &ctx.output_path,
                &job.export.preset,
                &job.export.intent.to_string(),
            )
            .await
            .map_err(WorkerError::from_mcp)?;

        // Any retries the channel needed belong in the run audit.
        for (key, value) in self.client.retry_metadata() {
            ctx.audit.record(&key, value);
        }

        let page_count = receipt.page_count.unwrap_or(info.page_count);
        let artifact = Artifact::from_export(&ctx.output_path, page_count, job.export.intent)
            .map_err(|e| match e {
                press_core::CoreError::Io(io) => WorkerError::Io(io),
                press_core::CoreError::Json(e) => WorkerError::Remote(e.to_string()),
            })?;
        info!(
            target: "press.worker",
            job_id = %job.job_id,
            path = %artifact.path.display(),
            pages = artifact.page_count,
            "export complete"
        );
        Ok(artifact)
    }
}

fn args(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}
