// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed command surface over the layout-application transport.
//!
//! [`McpClient`] wraps a registered [`Session`] and exposes the operations
//! the workers need: `execute_script`, `export_pdf`, `read_document_info`,
//! `place_image`, and `health`. Each operation builds a command envelope,
//! interprets the reply into a typed result, and maps the reply's
//! `errorKind` into a typed [`McpError`]. Transient transport faults are
//! retried with exponential backoff; script and application errors are not.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod retry;

pub use retry::{RetryPolicy, RetryTrace};

use press_protocol::CommandEnvelope;
use press_transport::{Session, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// No reply within the operation deadline (or the retry budget).
    #[error("operation timed out (budget {budget:?})")]
    Timeout {
        /// The deadline or retry budget that elapsed.
        budget: Duration,
    },

    /// The session died or was closed.
    #[error("session disconnected")]
    Disconnected,

    /// The proxy is unreachable.
    #[error("transport unavailable: {reason}")]
    TransportUnavailable {
        /// Probe or channel failure detail.
        reason: String,
    },

    /// The remote script threw.
    #[error("script error{}: {message}", line.map(|l| format!(" at line {l}")).unwrap_or_default())]
    Script {
        /// Line number when the plugin reports one.
        line: Option<u32>,
        /// The script's error message.
        message: String,
    },

    /// No document is open under the given handle.
    #[error("no document: {doc_id}")]
    NoDocument {
        /// The handle that was requested.
        doc_id: String,
    },

    /// The named export preset does not exist in the application.
    #[error("unknown export preset: {preset}")]
    PresetUnknown {
        /// The preset that was requested.
        preset: String,
    },

    /// The export operation itself failed.
    #[error("export failed: {message}")]
    ExportFailed {
        /// Failure detail from the application.
        message: String,
    },

    /// The target frame does not exist in the document.
    #[error("frame not found: {frame_id}")]
    FrameNotFound {
        /// The frame that was requested.
        frame_id: String,
    },

    /// The image file to place is absent.
    #[error("file missing: {path}")]
    FileMissing {
        /// The path that was requested.
        path: String,
    },

    /// An application error with no dedicated variant.
    #[error("application error [{kind}]: {message}")]
    Application {
        /// Machine-stable discriminator.
        kind: String,
        /// Human-readable message.
        message: String,
    },

    /// A reply payload did not have the expected shape.
    #[error("malformed reply: {0}")]
    MalformedReply(String),
}

impl McpError {
    /// Transient faults worth retrying: connection loss and timeouts.
    /// Script and application errors are deterministic and never retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Disconnected | Self::TransportUnavailable { .. }
        )
    }
}

/// Map a transport failure into the MCP taxonomy. `context` carries the
/// operation inputs that give application errors their typed shape.
fn map_transport_error(err: TransportError, context: &OpContext) -> McpError {
    match err {
        TransportError::Timeout(budget) => McpError::Timeout { budget },
        TransportError::Disconnected => McpError::Disconnected,
        TransportError::TransportUnavailable { reason }
        | TransportError::RegistrationRejected { reason } => {
            McpError::TransportUnavailable { reason }
        }
        TransportError::Application { kind, message } => match kind.as_str() {
            "ScriptError" => McpError::Script {
                line: parse_script_line(&message),
                message,
            },
            "NoDocument" => McpError::NoDocument {
                doc_id: context.doc_id.clone().unwrap_or(message),
            },
            "PresetUnknown" => McpError::PresetUnknown {
                preset: context.preset.clone().unwrap_or(message),
            },
            "ExportFailed" => McpError::ExportFailed { message },
            "FrameNotFound" => McpError::FrameNotFound {
                frame_id: context.frame_id.clone().unwrap_or(message),
            },
            "FileMissing" => McpError::FileMissing {
                path: context.file_path.clone().unwrap_or(message),
            },
            _ => McpError::Application { kind, message },
        },
        TransportError::Protocol(e) => McpError::MalformedReply(e.to_string()),
    }
}

/// Parse a leading `line N:` marker out of a plugin script error message.
fn parse_script_line(message: &str) -> Option<u32> {
    let rest = message.strip_prefix("line ")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

#[derive(Default)]
struct OpContext {
    doc_id: Option<String>,
    preset: Option<String>,
    frame_id: Option<String>,
    file_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Typed results
// ---------------------------------------------------------------------------

/// Document metadata reported by `readDocumentInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    /// Number of pages in the open document.
    pub page_count: u32,
    /// Page width in points.
    pub width_pt: f64,
    /// Page height in points.
    pub height_pt: f64,
    /// Fonts referenced by the document.
    #[serde(default)]
    pub fonts: Vec<String>,
    /// Paragraph/character styles defined in the document.
    #[serde(default)]
    pub styles: Vec<String>,
}

/// Receipt for a completed export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReceipt {
    /// Where the PDF was written.
    pub path: PathBuf,
    /// Page count the application reported, when it did.
    #[serde(default)]
    pub page_count: Option<u32>,
}

/// Combined transport + plugin + executor liveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// The command channel answered.
    pub transport_ok: bool,
    /// The plugin reported itself alive.
    pub plugin_ok: bool,
    /// The proxy's `/ready` endpoint, when configured.
    pub ready: Option<bool>,
    /// Executor count from `/ready`, when configured.
    pub executors: Option<u32>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Tunables for the typed client.
#[derive(Debug, Clone)]
pub struct McpConfig {
    /// Deadline for ordinary commands.
    pub command_timeout: Duration,
    /// Deadline for exports, which routinely run for tens of seconds.
    pub export_timeout: Duration,
    /// Retry policy for transient transport faults.
    pub retry: RetryPolicy,
    /// Optional `/ready` endpoint consulted by [`McpClient::health`].
    pub ready_url: Option<String>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            export_timeout: Duration::from_secs(180),
            retry: RetryPolicy::default(),
            ready_url: None,
        }
    }
}

/// Typed, retry-aware client over one registered session.
pub struct McpClient {
    session: Arc<Session>,
    config: McpConfig,
    retry_log: Mutex<Vec<RetryTrace>>,
}

impl McpClient {
    /// Wrap a registered session.
    #[must_use]
    pub fn new(session: Arc<Session>, config: McpConfig) -> Self {
        Self {
            session,
            config,
            retry_log: Mutex::new(Vec::new()),
        }
    }

    /// The session this client drives. Workers hold the client, not the
    /// session; the session stays owned here.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Retry history across every operation this client ran, in
    /// scorecard-embeddable form. Empty when nothing was retried.
    #[must_use]
    pub fn retry_metadata(&self) -> BTreeMap<String, Value> {
        let traces = self
            .retry_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default();
        let mut map = BTreeMap::new();
        if traces.is_empty() {
            return map;
        }
        map.insert(
            "mcp_retry_attempts".into(),
            json!(traces.iter().map(|t| t.attempts - 1).sum::<u32>()),
        );
        map.insert(
            "mcp_retry_waited_ms".into(),
            json!(traces.iter().map(|t| t.waited_ms).sum::<u64>()),
        );
        map.insert("mcp_retries".into(), json!(traces));
        map
    }

    /// Run a script in the application and return its JSON result.
    ///
    /// # Errors
    ///
    /// [`McpError::Script`] when the script throws; transport variants on
    /// channel faults.
    pub async fn execute_script(
        &self,
        source: &str,
        args: &BTreeMap<String, Value>,
    ) -> Result<Value, McpError> {
        let reply = self
            .send_with_retry(
                "executeScript",
                press_protocol::params(&[
                    ("script", json!(source)),
                    ("args", json!(args)),
                ]),
                self.config.command_timeout,
                OpContext::default(),
            )
            .await?;
        Ok(reply.unwrap_or(Value::Null))
    }

    /// Export the document to `path` with the named preset and intent.
    /// On success the file exists at `path` with the preset and intent
    /// applied.
    ///
    /// # Errors
    ///
    /// [`McpError::NoDocument`], [`McpError::PresetUnknown`],
    /// [`McpError::ExportFailed`], or transport variants.
    pub async fn export_pdf(
        &self,
        doc_id: &str,
        path: &std::path::Path,
        preset: &str,
        intent: &str,
    ) -> Result<ExportReceipt, McpError> {
        let result = self
            .send_with_retry(
                "exportPDF",
                press_protocol::params(&[
                    ("docId", json!(doc_id)),
                    ("path", json!(path)),
                    ("preset", json!(preset)),
                    ("intent", json!(intent)),
                ]),
                self.config.export_timeout,
                OpContext {
                    doc_id: Some(doc_id.into()),
                    preset: Some(preset.into()),
                    ..OpContext::default()
                },
            )
            .await?;
        match result {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| McpError::MalformedReply(format!("exportPDF result: {e}"))),
            None => Ok(ExportReceipt {
                path: path.to_path_buf(),
                page_count: None,
            }),
        }
    }

    /// Read page count, dimensions, fonts, and styles for a document.
    ///
    /// # Errors
    ///
    /// [`McpError::NoDocument`] or transport variants.
    pub async fn read_document_info(&self, doc_id: &str) -> Result<DocumentInfo, McpError> {
        let result = self
            .send_with_retry(
                "readDocumentInfo",
                press_protocol::params(&[("docId", json!(doc_id))]),
                self.config.command_timeout,
                OpContext {
                    doc_id: Some(doc_id.into()),
                    ..OpContext::default()
                },
            )
            .await?
            .ok_or_else(|| McpError::MalformedReply("readDocumentInfo returned no result".into()))?;
        serde_json::from_value(result)
            .map_err(|e| McpError::MalformedReply(format!("readDocumentInfo result: {e}")))
    }

    /// Place and fit an image into a frame.
    ///
    /// # Errors
    ///
    /// [`McpError::FrameNotFound`], [`McpError::FileMissing`],
    /// [`McpError::NoDocument`], or transport variants.
    pub async fn place_image(
        &self,
        doc_id: &str,
        frame_id: &str,
        image_path: &std::path::Path,
    ) -> Result<(), McpError> {
        self.send_with_retry(
            "placeImage",
            press_protocol::params(&[
                ("docId", json!(doc_id)),
                ("frameId", json!(frame_id)),
                ("imagePath", json!(image_path)),
            ]),
            self.config.command_timeout,
            OpContext {
                doc_id: Some(doc_id.into()),
                frame_id: Some(frame_id.into()),
                file_path: Some(image_path.display().to_string()),
                ..OpContext::default()
            },
        )
        .await?;
        Ok(())
    }

    /// Quick transport + plugin liveness check, plus the proxy's `/ready`
    /// endpoint when configured.
    ///
    /// # Errors
    ///
    /// [`McpError::TransportUnavailable`] when the channel is down.
    pub async fn health(&self) -> Result<HealthSnapshot, McpError> {
        let plugin_ok = match self
            .send_once(
                "health",
                press_protocol::params(&[]),
                Duration::from_secs(5),
                1,
                &OpContext::default(),
            )
            .await
        {
            Ok(result) => result
                .and_then(|v| v.get("plugin").and_then(Value::as_bool))
                .unwrap_or(true),
            Err(e) if e.is_transient() => return Err(e),
            Err(_) => false,
        };

        let (ready, executors) = match &self.config.ready_url {
            Some(url) => match fetch_ready(url).await {
                Some((r, e)) => (Some(r), e),
                None => (Some(false), None),
            },
            None => (None, None),
        };

        Ok(HealthSnapshot {
            transport_ok: true,
            plugin_ok,
            ready,
            executors,
        })
    }

    async fn send_with_retry(
        &self,
        command: &str,
        params: BTreeMap<String, Value>,
        deadline: Duration,
        context: OpContext,
    ) -> Result<Option<Value>, McpError> {
        // Per-operation jitter seed: concurrent commands spread out
        // instead of hammering the plugin in lockstep.
        let seed = Uuid::new_v4().as_u64_pair().0;
        let (result, trace) = self
            .config
            .retry
            .run(command, seed, |attempt| {
                self.send_once(command, params.clone(), deadline, attempt, &context)
            })
            .await;
        if trace.retried() {
            if let Ok(mut log) = self.retry_log.lock() {
                log.push(trace);
            }
        }
        result
    }

    async fn send_once(
        &self,
        command: &str,
        params: BTreeMap<String, Value>,
        deadline: Duration,
        attempt: u32,
        context: &OpContext,
    ) -> Result<Option<Value>, McpError> {
        let envelope = CommandEnvelope::new(self.session.application(), command, params)
            .with_deadline_ms(deadline.as_millis() as u64);
        debug!(
            target: "press.mcp",
            command,
            attempt,
            correlation_id = %envelope.correlation_id,
            "sending command"
        );
        let reply = self
            .session
            .send(envelope, deadline)
            .await
            .map_err(|e| map_transport_error(e, context))?;
        Ok(reply.result)
    }
}

async fn fetch_ready(url: &str) -> Option<(bool, Option<u32>)> {
    let body: Value = reqwest::get(url).await.ok()?.json().await.ok()?;
    let ready = body.get("ready").and_then(Value::as_bool)?;
    let executors = body
        .get("executors")
        .and_then(Value::as_u64)
        .map(|n| n as u32);
    Some((ready, executors))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_line_marker_is_parsed() {
        assert_eq!(parse_script_line("line 42: undefined variable"), Some(42));
        assert_eq!(parse_script_line("no marker here"), None);
    }

    #[test]
    fn error_kinds_map_to_typed_variants() {
        let context = OpContext {
            doc_id: Some("doc-1".into()),
            preset: Some("brand-print".into()),
            ..OpContext::default()
        };
        let err = map_transport_error(
            TransportError::Application {
                kind: "PresetUnknown".into(),
                message: "nope".into(),
            },
            &context,
        );
        assert!(matches!(err, McpError::PresetUnknown { preset } if preset == "brand-print"));

        let err = map_transport_error(
            TransportError::Application {
                kind: "SomethingNew".into(),
                message: "m".into(),
            },
            &OpContext::default(),
        );
        assert!(matches!(err, McpError::Application { .. }));
    }

    #[test]
    fn transient_classification_excludes_script_errors() {
        assert!(McpError::Disconnected.is_transient());
        assert!(McpError::Timeout {
            budget: Duration::from_secs(1)
        }
        .is_transient());
        assert!(!McpError::Script {
            line: None,
            message: "x".into()
        }
        .is_transient());
        assert!(!McpError::PresetUnknown {
            preset: "p".into()
        }
        .is_transient());
    }

    #[test]
    fn document_info_parses_camel_case_payload() {
        let info: DocumentInfo = serde_json::from_value(json!({
            "pageCount": 8,
            "widthPt": 595.0,
            "heightPt": 842.0,
            "fonts": ["Maison Neue"],
            "styles": ["Heading 1"]
        }))
        .unwrap();
        assert_eq!(info.page_count, 8);
        assert_eq!(info.fonts, vec!["Maison Neue".to_string()]);
    }
}
