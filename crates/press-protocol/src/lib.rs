// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire contract for the layout-application command channel.
//!
//! The orchestrator talks to a proxy over a bidirectional channel carrying
//! one JSON document per frame. The protocol is intentionally small:
//!
//! - the client announces itself via `register` and waits for `register_ack`
//! - commands carry a `correlationId` and a per-command deadline
//! - replies echo the `correlationId` with `status: ok | error`
//! - `ping`/`pong` heartbeats keep the session observably alive
//!
//! An older plugin generation names the command fields `action`/`options`
//! instead of `command`/`params`, and nests reply payloads under `data`
//! instead of `result`. The codec accepts both spellings on ingest and
//! mirrors both on egress until the plugin contract is unified.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod version;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Contract version the orchestrator speaks.
pub const CONTRACT_VERSION: &str = "press/v1.0";

/// Heartbeat cadence agreed with the proxy.
pub const PING_INTERVAL_SECS: u64 = 25;

/// Hard cap on a single frame; anything larger is a protocol violation.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors arising from frame encoding/decoding or protocol violations.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON serialization or deserialization failure.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame exceeds [`MAX_FRAME_BYTES`].
    #[error("frame too large: {size} bytes (cap {cap})")]
    FrameTooLarge {
        /// Observed size.
        size: usize,
        /// The configured cap.
        cap: usize,
    },

    /// A structurally valid JSON document that matches no known frame shape.
    #[error("unrecognized frame: {0}")]
    Unrecognized(String),

    /// A required envelope field is missing.
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}

// ---------------------------------------------------------------------------
// Control frames
// ---------------------------------------------------------------------------

/// Registration and heartbeat frames, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Client → proxy: declare which application's commands this session
    /// will carry.
    Register {
        /// Target application name, e.g. `"indesign"`.
        application: String,
    },
    /// Proxy → client: registration outcome.
    RegisterAck {
        /// `"ok"` or `"error"`.
        status: AckStatus,
        /// Refusal reason when `status == Error`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Liveness probe.
    Ping,
    /// Liveness response.
    Pong,
}

/// Acknowledgement status carried by [`ControlFrame::RegisterAck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// The proxy accepted the registration.
    Ok,
    /// The proxy refused the registration.
    Error,
}

// ---------------------------------------------------------------------------
// Command envelope
// ---------------------------------------------------------------------------

/// A command sent to the layout application through the proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    /// Unique id correlating this command with its reply.
    pub correlation_id: Uuid,
    /// Target application.
    pub application: String,
    /// Operation name, e.g. `"exportPDF"`.
    pub command: String,
    /// Operation parameters.
    pub params: BTreeMap<String, Value>,
    /// Deadline the remote side should honour, in milliseconds.
    pub deadline_ms: u64,
}

impl CommandEnvelope {
    /// Build a command envelope with a fresh correlation id.
    #[must_use]
    pub fn new(application: &str, command: &str, params: BTreeMap<String, Value>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            application: application.to_string(),
            command: command.to_string(),
            params,
            deadline_ms: 30_000,
        }
    }

    /// Override the deadline.
    #[must_use]
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }
}

// Egress mirrors both field spellings so either plugin generation can read
// the frame. Ingest accepts either and prefers the canonical names.
impl Serialize for CommandEnvelope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(7))?;
        map.serialize_entry("correlationId", &self.correlation_id)?;
        map.serialize_entry("application", &self.application)?;
        map.serialize_entry("command", &self.command)?;
        map.serialize_entry("action", &self.command)?;
        map.serialize_entry("params", &self.params)?;
        map.serialize_entry("options", &self.params)?;
        map.serialize_entry("deadlineMs", &self.deadline_ms)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for CommandEnvelope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(rename = "correlationId")]
            correlation_id: Uuid,
            application: String,
            command: Option<String>,
            action: Option<String>,
            params: Option<BTreeMap<String, Value>>,
            options: Option<BTreeMap<String, Value>>,
            #[serde(rename = "deadlineMs", default = "default_deadline")]
            deadline_ms: u64,
        }
        let wire = Wire::deserialize(deserializer)?;
        let command = wire
            .command
            .or(wire.action)
            .ok_or_else(|| serde::de::Error::custom("missing field `command` (or `action`)"))?;
        let params = wire.params.or(wire.options).unwrap_or_default();
        Ok(Self {
            correlation_id: wire.correlation_id,
            application: wire.application,
            command,
            params,
            deadline_ms: wire.deadline_ms,
        })
    }
}

fn default_deadline() -> u64 {
    30_000
}

// ---------------------------------------------------------------------------
// Reply envelope
// ---------------------------------------------------------------------------

/// Terminal reply to one command.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyEnvelope {
    /// Correlation id echoed from the command.
    pub correlation_id: Uuid,
    /// Whether the remote operation succeeded.
    pub status: ReplyStatus,
    /// Success payload; absent on error.
    pub result: Option<Value>,
    /// Machine-stable error discriminator, e.g. `"PresetUnknown"`.
    pub error_kind: Option<String>,
    /// Human-readable error message.
    pub message: Option<String>,
}

/// Reply status discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    /// The remote operation completed.
    Ok,
    /// The remote operation failed; the session itself is unaffected.
    Error,
}

impl ReplyEnvelope {
    /// A successful reply carrying `result`.
    #[must_use]
    pub fn ok(correlation_id: Uuid, result: Value) -> Self {
        Self {
            correlation_id,
            status: ReplyStatus::Ok,
            result: Some(result),
            error_kind: None,
            message: None,
        }
    }

    /// An application-level error reply.
    #[must_use]
    pub fn error(correlation_id: Uuid, kind: &str, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            status: ReplyStatus::Error,
            result: None,
            error_kind: Some(kind.to_string()),
            message: Some(message.into()),
        }
    }
}

impl Serialize for ReplyEnvelope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("correlationId", &self.correlation_id)?;
        map.serialize_entry("status", &self.status)?;
        if let Some(result) = &self.result {
            map.serialize_entry("result", result)?;
        }
        if let Some(kind) = &self.error_kind {
            map.serialize_entry("errorKind", kind)?;
        }
        if let Some(message) = &self.message {
            map.serialize_entry("message", message)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ReplyEnvelope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(rename = "correlationId")]
            correlation_id: Uuid,
            status: ReplyStatus,
            result: Option<Value>,
            // Legacy plugins nest the success payload under `data`.
            data: Option<Value>,
            #[serde(rename = "errorKind")]
            error_kind: Option<String>,
            message: Option<String>,
        }
        let wire = Wire::deserialize(deserializer)?;
        Ok(Self {
            correlation_id: wire.correlation_id,
            status: wire.status,
            result: wire.result.or(wire.data),
            error_kind: wire.error_kind,
            message: wire.message,
        })
    }
}

// ---------------------------------------------------------------------------
// Frames and codec
// ---------------------------------------------------------------------------

/// Any frame that can appear on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Registration or heartbeat.
    Control(ControlFrame),
    /// Outbound command.
    Command(CommandEnvelope),
    /// Inbound reply.
    Reply(ReplyEnvelope),
    /// Structurally valid JSON the codec does not recognize. The transport
    /// drops these with a warning rather than failing the session.
    Unknown(Value),
}

/// Stateless codec for channel frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Serialize a frame to its JSON text form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] when the encoded frame
    /// exceeds [`MAX_FRAME_BYTES`], or [`ProtocolError::Json`] on
    /// serialization failure.
    pub fn encode(frame: &Frame) -> Result<String, ProtocolError> {
        let text = match frame {
            Frame::Control(c) => serde_json::to_string(c)?,
            Frame::Command(c) => serde_json::to_string(c)?,
            Frame::Reply(r) => serde_json::to_string(r)?,
            Frame::Unknown(v) => serde_json::to_string(v)?,
        };
        if text.len() > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                size: text.len(),
                cap: MAX_FRAME_BYTES,
            });
        }
        Ok(text)
    }

    /// Parse one JSON text frame.
    ///
    /// Control frames are recognized by their `type` tag; command and reply
    /// frames by the presence of `correlationId`. Anything else decodes to
    /// [`Frame::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] for oversized input and
    /// [`ProtocolError::Json`] when the text is not valid JSON at all.
    pub fn decode(text: &str) -> Result<Frame, ProtocolError> {
        if text.len() > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                size: text.len(),
                cap: MAX_FRAME_BYTES,
            });
        }
        let value: Value = serde_json::from_str(text)?;
        let Some(obj) = value.as_object() else {
            return Ok(Frame::Unknown(value));
        };
        if obj.contains_key("type") {
            return match serde_json::from_value::<ControlFrame>(value.clone()) {
                Ok(control) => Ok(Frame::Control(control)),
                Err(_) => Ok(Frame::Unknown(value)),
            };
        }
        if obj.contains_key("correlationId") {
            if obj.contains_key("status") {
                return Ok(Frame::Reply(serde_json::from_value(value)?));
            }
            return Ok(Frame::Command(serde_json::from_value(value)?));
        }
        Ok(Frame::Unknown(value))
    }
}

/// Convenience constructor for a parameter map.
#[must_use]
pub fn params(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// Convert a `serde_json` object into the envelope parameter map.
#[must_use]
pub fn params_from_object(object: Map<String, Value>) -> BTreeMap<String, Value> {
    object.into_iter().collect()
}
