// SPDX-License-Identifier: MIT OR Apache-2.0
//! WebSocket session to the layout-application proxy.
//!
//! The transport maintains one multiplexed bidirectional channel to a proxy
//! that forwards commands to long-running application plugins, and exposes
//! a request/reply abstraction over it:
//!
//! - [`Session::connect`] probes the proxy's HTTP health endpoint, upgrades
//!   to a WebSocket, and registers the target application.
//! - [`Session::send`] correlates each command with its reply by id,
//!   enforces the caller's deadline, and applies queue-depth backpressure.
//! - A dedicated reader task dispatches incoming frames; replies with an
//!   unknown correlation id are logged and dropped.
//! - Heartbeat pings keep liveness observable; a missing pong for two
//!   intervals fails every in-flight waiter.
//!
//! Transport-level faults (connection reset, parse failure) are fatal for
//! the session. Application-level errors (the remote script threw) come
//! back as ordinary replies with `status: error` and leave the session
//! usable.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod session;

pub use session::{Session, SessionState};

use std::time::Duration;

/// Errors surfaced by the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The proxy's health probe failed; no channel was opened.
    #[error("transport unavailable: {reason}")]
    TransportUnavailable {
        /// Probe failure detail.
        reason: String,
    },

    /// The proxy refused the registration message.
    #[error("registration rejected: {reason}")]
    RegistrationRejected {
        /// Refusal detail from the proxy.
        reason: String,
    },

    /// The command did not receive its reply within the caller's deadline.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// The session is not (or no longer) in the registered state.
    #[error("session disconnected")]
    Disconnected,

    /// The remote replied with `status: error`. The session is unaffected.
    #[error("application error [{kind}]: {message}")]
    Application {
        /// Machine-stable discriminator from the reply's `errorKind`.
        kind: String,
        /// Human-readable message.
        message: String,
    },

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] press_protocol::ProtocolError),
}

impl TransportError {
    /// `true` for faults worth a bounded retry at the client layer
    /// (connection loss and single timeouts); application errors and
    /// registration refusals are not transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Disconnected | Self::TransportUnavailable { .. }
        )
    }
}

/// Connection parameters for one session.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// HTTP health endpoint probed before the upgrade, e.g.
    /// `http://127.0.0.1:8701/health`.
    pub health_url: String,
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8701/ws`.
    pub ws_url: String,
    /// Application name declared at registration.
    pub application: String,
    /// Budget for the health probe + upgrade + registration handshake.
    pub handshake_timeout: Duration,
    /// Bound on concurrently in-flight commands; `send` blocks (up to its
    /// deadline) when the queue is full.
    pub max_in_flight: usize,
    /// Heartbeat cadence. A pong missing for two intervals fails the
    /// session.
    pub ping_interval: Duration,
}

impl TransportConfig {
    /// Conventional config for a proxy at `base` (e.g.
    /// `127.0.0.1:8701`) carrying `application` commands.
    #[must_use]
    pub fn for_proxy(base: &str, application: &str) -> Self {
        Self {
            health_url: format!("http://{base}/health"),
            ws_url: format!("ws://{base}/ws"),
            application: application.to_string(),
            handshake_timeout: Duration::from_secs(10),
            max_in_flight: 32,
            ping_interval: Duration::from_secs(press_protocol::PING_INTERVAL_SECS),
        }
    }
}
