// SPDX-License-Identifier: MIT OR Apache-2.0
//! Session tests against an in-process mock proxy.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use press_protocol::{
    params, AckStatus, CommandEnvelope, ControlFrame, Frame, FrameCodec, ReplyEnvelope,
};
use press_transport::{Session, SessionState, TransportConfig, TransportError};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Mock proxy
//
// Behaviour is keyed off the command name:
//   echo  — reply ok with the params
//   fail  — reply with status error
//   drop  — never reply
//   slow  — reply ok after 300 ms
// Registration for the application "unwelcome" is refused.
// ---------------------------------------------------------------------------

async fn serve_proxy(healthy: bool) -> SocketAddr {
    serve_proxy_with(healthy, true).await
}

async fn serve_proxy_with(healthy: bool, answer_pings: bool) -> SocketAddr {
    let app = Router::new()
        .route(
            "/health",
            get(move || async move {
                if healthy {
                    axum::Json(json!({"status": "ok", "app": "mcp-proxy", "uptime": 1}))
                } else {
                    axum::Json(json!({"status": "draining"}))
                }
            }),
        )
        .route(
            "/ws",
            get(move |ws: WebSocketUpgrade| async move {
                let resp: Response =
                    ws.on_upgrade(move |socket| handle_plugin_session(socket, answer_pings));
                resp
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn handle_plugin_session(mut socket: WebSocket, answer_pings: bool) {
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let frame = FrameCodec::decode(text.as_str()).unwrap();
        match frame {
            Frame::Control(ControlFrame::Register { application }) => {
                let ack = if application == "unwelcome" {
                    ControlFrame::RegisterAck {
                        status: AckStatus::Error,
                        message: Some("application not allowed".into()),
                    }
                } else {
                    ControlFrame::RegisterAck {
                        status: AckStatus::Ok,
                        message: None,
                    }
                };
                send_frame(&mut socket, &Frame::Control(ack)).await;
            }
            Frame::Control(ControlFrame::Ping) => {
                if answer_pings {
                    send_frame(&mut socket, &Frame::Control(ControlFrame::Pong)).await;
                }
            }
            Frame::Command(command) => handle_command(&mut socket, command).await,
            _ => {}
        }
    }
}

async fn handle_command(socket: &mut WebSocket, command: CommandEnvelope) {
    let cid = command.correlation_id;
    match command.command.as_str() {
        "echo" => {
            let reply = ReplyEnvelope::ok(cid, json!({"echoed": command.params}));
            send_frame(socket, &Frame::Reply(reply)).await;
        }
        "fail" => {
            let reply = ReplyEnvelope::error(cid, "ScriptError", "the script threw");
            send_frame(socket, &Frame::Reply(reply)).await;
        }
        "slow" => {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let reply = ReplyEnvelope::ok(cid, json!({"late": true}));
            send_frame(socket, &Frame::Reply(reply)).await;
        }
        "drop" => {}
        other => {
            let reply = ReplyEnvelope::error(cid, "UnknownCommand", other.to_string());
            send_frame(socket, &Frame::Reply(reply)).await;
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) {
    let text = FrameCodec::encode(frame).unwrap();
    let _ = socket.send(WsMessage::Text(text.into())).await;
}

fn config_for(addr: SocketAddr) -> TransportConfig {
    let mut config = TransportConfig::for_proxy(&addr.to_string(), "indesign");
    config.handshake_timeout = Duration::from_secs(2);
    config
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_and_round_trip_a_command() {
    let addr = serve_proxy(true).await;
    let session = Session::connect(config_for(addr)).await.unwrap();
    assert_eq!(session.state(), SessionState::Registered);

    let cmd = CommandEnvelope::new("indesign", "echo", params(&[("x", json!(41))]));
    let reply = session.send(cmd, Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply.result.unwrap()["echoed"]["x"], json!(41));
    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn application_error_reply_leaves_session_usable() {
    let addr = serve_proxy(true).await;
    let session = Session::connect(config_for(addr)).await.unwrap();

    let err = session
        .send(
            CommandEnvelope::new("indesign", "fail", params(&[])),
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();
    match err {
        TransportError::Application { kind, .. } => assert_eq!(kind, "ScriptError"),
        other => panic!("expected Application error, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Registered);

    // The session survives application errors.
    let ok = session
        .send(
            CommandEnvelope::new("indesign", "echo", params(&[])),
            Duration::from_secs(2),
        )
        .await;
    assert!(ok.is_ok());
    session.close().await;
}

#[tokio::test]
async fn timeout_reclaims_slot_and_drops_late_reply() {
    let addr = serve_proxy(true).await;
    let session = Session::connect(config_for(addr)).await.unwrap();

    let err = session
        .send(
            CommandEnvelope::new("indesign", "slow", params(&[])),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout(_)));
    assert_eq!(session.in_flight(), 0);

    // Let the late reply arrive; it must be dropped, not misdelivered.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let reply = session
        .send(
            CommandEnvelope::new("indesign", "echo", params(&[("k", json!("v"))])),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert_eq!(reply.result.unwrap()["echoed"]["k"], json!("v"));
    session.close().await;
}

#[tokio::test]
async fn unhealthy_proxy_is_transport_unavailable() {
    let addr = serve_proxy(false).await;
    let err = Session::connect(config_for(addr)).await.unwrap_err();
    assert!(matches!(err, TransportError::TransportUnavailable { .. }));
}

#[tokio::test]
async fn refused_registration_is_registration_rejected() {
    let addr = serve_proxy(true).await;
    let mut config = config_for(addr);
    config.application = "unwelcome".into();
    let err = Session::connect(config).await.unwrap_err();
    match err {
        TransportError::RegistrationRejected { reason } => {
            assert!(reason.contains("not allowed"));
        }
        other => panic!("expected RegistrationRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn close_rejects_in_flight_waiters() {
    let addr = serve_proxy(true).await;
    let session = std::sync::Arc::new(Session::connect(config_for(addr)).await.unwrap());

    let in_flight = {
        let session = std::sync::Arc::clone(&session);
        tokio::spawn(async move {
            session
                .send(
                    CommandEnvelope::new("indesign", "drop", params(&[])),
                    Duration::from_secs(10),
                )
                .await
        })
    };
    // Give the command time to get onto the wire.
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.close().await;

    let result = in_flight.await.unwrap();
    assert!(matches!(result, Err(TransportError::Disconnected)));
    assert_eq!(session.in_flight(), 0);
}

#[tokio::test]
async fn silent_proxy_fails_the_session_and_its_waiters() {
    let addr = serve_proxy_with(true, false).await;
    let mut config = config_for(addr);
    config.ping_interval = Duration::from_millis(100);
    let session = Session::connect(config).await.unwrap();

    // The command never gets a reply; the missing pongs must fail the
    // session (and the waiter) well before the command deadline.
    let err = session
        .send(
            CommandEnvelope::new("indesign", "drop", params(&[])),
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Disconnected));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn send_after_close_is_disconnected() {
    let addr = serve_proxy(true).await;
    let session = Session::connect(config_for(addr)).await.unwrap();
    session.close().await;
    let err = session
        .send(
            CommandEnvelope::new("indesign", "echo", params(&[])),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Disconnected));
}
