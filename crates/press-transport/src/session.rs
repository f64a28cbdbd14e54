// SPDX-License-Identifier: MIT OR Apache-2.0
//! The session object: connect handshake, correlation, reader and
//! heartbeat tasks.

use crate::{TransportConfig, TransportError};
use futures::{SinkExt, StreamExt};
use press_protocol::{
    AckStatus, CommandEnvelope, ControlFrame, Frame, FrameCodec, ReplyEnvelope, ReplyStatus,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

/// Session lifecycle states.
///
/// Commands may be sent only in [`SessionState::Registered`]; every
/// transition out of it drains the in-flight waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No channel open.
    Disconnected,
    /// Health probe passed, upgrade or registration in progress.
    Connecting,
    /// Registration acknowledged; commands may flow.
    Registered,
    /// Gracefully shut down; terminal.
    Closed,
}

type Waiter = oneshot::Sender<Result<ReplyEnvelope, TransportError>>;

/// State shared between the session handle and its background tasks.
#[derive(Debug)]
struct Shared {
    state: Mutex<SessionState>,
    waiters: Mutex<HashMap<Uuid, Waiter>>,
    last_pong: Mutex<Instant>,
}

impl Shared {
    /// Drain every in-flight waiter with `Disconnected` and leave the
    /// session in `state` (unless it is already `Closed`).
    fn fail_all(&self, next: SessionState) {
        {
            let mut state = self.state.lock().expect("state lock");
            if *state != SessionState::Closed {
                *state = next;
            }
        }
        let drained: Vec<Waiter> = {
            let mut waiters = self.waiters.lock().expect("waiters lock");
            waiters.drain().map(|(_, w)| w).collect()
        };
        for waiter in drained {
            let _ = waiter.send(Err(TransportError::Disconnected));
        }
    }
}

/// A live, registered session to the proxy.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`.
#[derive(Debug)]
pub struct Session {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Message>,
    permits: Arc<Semaphore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    application: String,
}

impl Session {
    /// Open a session: health probe, WebSocket upgrade, registration.
    ///
    /// # Errors
    ///
    /// - [`TransportError::TransportUnavailable`] when the health probe or
    ///   the upgrade fails, or no registration ack arrives in time.
    /// - [`TransportError::RegistrationRejected`] when the proxy answers
    ///   the registration with an error ack.
    pub async fn connect(config: TransportConfig) -> Result<Self, TransportError> {
        probe_health(&config).await?;

        let (mut ws, _resp) = tokio::time::timeout(
            config.handshake_timeout,
            tokio_tungstenite::connect_async(&config.ws_url),
        )
        .await
        .map_err(|_| TransportError::TransportUnavailable {
            reason: format!("upgrade to {} timed out", config.ws_url),
        })?
        .map_err(|e| TransportError::TransportUnavailable {
            reason: format!("upgrade failed: {e}"),
        })?;

        // Registration: declare the application, then wait for the ack.
        let register = FrameCodec::encode(&Frame::Control(ControlFrame::Register {
            application: config.application.clone(),
        }))?;
        ws.send(Message::text(register))
            .await
            .map_err(|e| TransportError::TransportUnavailable {
                reason: format!("registration send failed: {e}"),
            })?;
        await_register_ack(&mut ws, config.handshake_timeout).await?;

        debug!(
            target: "press.transport",
            application = %config.application,
            url = %config.ws_url,
            "session registered"
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState::Registered),
            waiters: Mutex::new(HashMap::new()),
            last_pong: Mutex::new(Instant::now()),
        });
        let (outbound_tx, outbound_rx) = mpsc::channel::<Message>(64);
        let (sink, stream) = ws.split();

        let writer = tokio::spawn(run_writer(outbound_rx, sink, Arc::clone(&shared)));
        let reader = tokio::spawn(run_reader(stream, Arc::clone(&shared), outbound_tx.clone()));
        let pinger = tokio::spawn(run_pinger(
            Arc::clone(&shared),
            outbound_tx.clone(),
            config.ping_interval,
        ));

        Ok(Self {
            shared,
            outbound: outbound_tx,
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            tasks: Mutex::new(vec![writer, reader, pinger]),
            application: config.application,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.lock().expect("state lock")
    }

    /// The application name this session registered for.
    #[must_use]
    pub fn application(&self) -> &str {
        &self.application
    }

    /// Number of commands currently awaiting replies.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.waiters.lock().expect("waiters lock").len()
    }

    /// Send one command and await its correlated reply.
    ///
    /// The deadline covers queue admission, the wire round-trip, and reply
    /// dispatch. When the in-flight queue is full, admission blocks — up to
    /// the deadline — rather than failing immediately.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Disconnected`] when the session is not
    ///   registered (or dies mid-flight).
    /// - [`TransportError::Timeout`] when no reply arrives in time; the
    ///   correlation slot is reclaimed and a late reply is dropped.
    /// - [`TransportError::Application`] when the remote replies with
    ///   `status: error`; the session itself stays usable.
    pub async fn send(
        &self,
        command: CommandEnvelope,
        deadline: Duration,
    ) -> Result<ReplyEnvelope, TransportError> {
        if self.state() != SessionState::Registered {
            return Err(TransportError::Disconnected);
        }
        let started = Instant::now();

        // Queue-depth backpressure: block for a permit up to the deadline.
        let permit = tokio::time::timeout(deadline, Arc::clone(&self.permits).acquire_owned())
            .await
            .map_err(|_| TransportError::Timeout(deadline))?
            .map_err(|_| TransportError::Disconnected)?;

        let correlation_id = command.correlation_id;
        let (tx, rx) = oneshot::channel();
        self.shared
            .waiters
            .lock()
            .expect("waiters lock")
            .insert(correlation_id, tx);

        let text = match FrameCodec::encode(&Frame::Command(command)) {
            Ok(text) => text,
            Err(e) => {
                self.remove_waiter(correlation_id);
                return Err(e.into());
            }
        };
        if self.outbound.send(Message::text(text)).await.is_err() {
            self.remove_waiter(correlation_id);
            return Err(TransportError::Disconnected);
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        let reply = match tokio::time::timeout(remaining, rx).await {
            Err(_) => {
                // Reclaim the slot so a late reply is dropped, not delivered.
                self.remove_waiter(correlation_id);
                return Err(TransportError::Timeout(deadline));
            }
            Ok(Err(_)) => return Err(TransportError::Disconnected),
            Ok(Ok(result)) => result?,
        };
        drop(permit);

        match reply.status {
            ReplyStatus::Ok => Ok(reply),
            ReplyStatus::Error => Err(TransportError::Application {
                kind: reply
                    .error_kind
                    .unwrap_or_else(|| "Unknown".to_string()),
                message: reply.message.unwrap_or_default(),
            }),
        }
    }

    /// Graceful shutdown: rejects all in-flight waiters with
    /// `Disconnected`, sends a close frame, and stops the background tasks.
    pub async fn close(&self) {
        self.shared.fail_all(SessionState::Closed);
        let _ = self.outbound.send(Message::Close(None)).await;
        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().expect("tasks lock");
            tasks.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }
        debug!(target: "press.transport", application = %self.application, "session closed");
    }

    fn remove_waiter(&self, correlation_id: Uuid) {
        self.shared
            .waiters
            .lock()
            .expect("waiters lock")
            .remove(&correlation_id);
    }
}

// ---------------------------------------------------------------------------
// Handshake helpers
// ---------------------------------------------------------------------------

async fn probe_health(config: &TransportConfig) -> Result<(), TransportError> {
    let client = reqwest::Client::new();
    let response = tokio::time::timeout(
        config.handshake_timeout,
        client.get(&config.health_url).send(),
    )
    .await
    .map_err(|_| TransportError::TransportUnavailable {
        reason: format!("health probe to {} timed out", config.health_url),
    })?
    .map_err(|e| TransportError::TransportUnavailable {
        reason: format!("health probe failed: {e}"),
    })?;

    if !response.status().is_success() {
        return Err(TransportError::TransportUnavailable {
            reason: format!("health probe returned {}", response.status()),
        });
    }
    let body: serde_json::Value =
        response
            .json()
            .await
            .map_err(|e| TransportError::TransportUnavailable {
                reason: format!("health probe body unreadable: {e}"),
            })?;
    if body.get("status").and_then(|s| s.as_str()) != Some("ok") {
        return Err(TransportError::TransportUnavailable {
            reason: format!("proxy reports unhealthy: {body}"),
        });
    }
    Ok(())
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn await_register_ack(ws: &mut WsStream, budget: Duration) -> Result<(), TransportError> {
    let deadline = Instant::now() + budget;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let message = tokio::time::timeout(remaining, ws.next())
            .await
            .map_err(|_| TransportError::TransportUnavailable {
                reason: "no registration ack before handshake timeout".into(),
            })?
            .ok_or_else(|| TransportError::TransportUnavailable {
                reason: "channel closed before registration ack".into(),
            })?
            .map_err(|e| TransportError::TransportUnavailable {
                reason: format!("channel error before registration ack: {e}"),
            })?;

        let Message::Text(text) = message else {
            continue;
        };
        match FrameCodec::decode(text.as_str())? {
            Frame::Control(ControlFrame::RegisterAck { status, message }) => {
                return match status {
                    AckStatus::Ok => Ok(()),
                    AckStatus::Error => Err(TransportError::RegistrationRejected {
                        reason: message.unwrap_or_else(|| "unspecified".into()),
                    }),
                };
            }
            other => {
                debug!(target: "press.transport", ?other, "frame before register ack, ignoring");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn run_writer(
    mut outbound: mpsc::Receiver<Message>,
    mut sink: futures::stream::SplitSink<WsStream, Message>,
    shared: Arc<Shared>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() {
            shared.fail_all(SessionState::Disconnected);
            return;
        }
        if closing {
            return;
        }
    }
}

async fn run_reader(
    mut stream: futures::stream::SplitStream<WsStream>,
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Message>,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match FrameCodec::decode(text.as_str()) {
                Ok(frame) => dispatch_frame(frame, &shared, &outbound).await,
                Err(e) => {
                    // Parse failure on the wire is fatal for the session.
                    warn!(target: "press.transport", error = %e, "undecodable frame, failing session");
                    break;
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound.send(Message::Pong(payload)).await;
            }
            Ok(Message::Pong(_)) => touch_pong(&shared),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(target: "press.transport", error = %e, "channel error, failing session");
                break;
            }
        }
    }
    shared.fail_all(SessionState::Disconnected);
}

async fn dispatch_frame(frame: Frame, shared: &Arc<Shared>, outbound: &mpsc::Sender<Message>) {
    match frame {
        Frame::Reply(reply) => {
            let waiter = shared
                .waiters
                .lock()
                .expect("waiters lock")
                .remove(&reply.correlation_id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(Ok(reply));
                }
                None => {
                    warn!(
                        target: "press.transport",
                        correlation_id = %reply.correlation_id,
                        "late or unknown reply dropped"
                    );
                }
            }
        }
        Frame::Control(ControlFrame::Ping) => {
            if let Ok(pong) = FrameCodec::encode(&Frame::Control(ControlFrame::Pong)) {
                let _ = outbound.send(Message::text(pong)).await;
            }
        }
        Frame::Control(ControlFrame::Pong) => touch_pong(shared),
        Frame::Control(other) => {
            debug!(target: "press.transport", ?other, "unexpected control frame");
        }
        Frame::Command(command) => {
            warn!(
                target: "press.transport",
                correlation_id = %command.correlation_id,
                "inbound command frame on a client session, dropped"
            );
        }
        Frame::Unknown(value) => {
            warn!(target: "press.transport", frame = %value, "unknown frame dropped");
        }
    }
}

fn touch_pong(shared: &Arc<Shared>) {
    *shared.last_pong.lock().expect("last_pong lock") = Instant::now();
}

async fn run_pinger(shared: Arc<Shared>, outbound: mpsc::Sender<Message>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if *shared.state.lock().expect("state lock") != SessionState::Registered {
            return;
        }
        let silence = shared.last_pong.lock().expect("last_pong lock").elapsed();
        if silence > interval * 2 {
            warn!(
                target: "press.transport",
                silence_ms = silence.as_millis() as u64,
                "no pong within liveness budget, failing session"
            );
            shared.fail_all(SessionState::Disconnected);
            return;
        }
        if let Ok(ping) = FrameCodec::encode(&Frame::Control(ControlFrame::Ping)) {
            let _ = outbound.send(Message::text(ping)).await;
        }
    }
}
