// SPDX-License-Identifier: MIT OR Apache-2.0
//! Worker tests: the service worker against a wiremock endpoint, and the
//! layout worker against an in-process mock proxy.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use press_core::Job;
use press_mcp::{McpClient, McpConfig};
use press_protocol::{AckStatus, CommandEnvelope, ControlFrame, Frame, FrameCodec, ReplyEnvelope};
use press_transport::{Session, TransportConfig};
use press_worker::{LayoutWorker, ServiceWorker, WorkContext, Worker, WorkerError};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Service worker
// ---------------------------------------------------------------------------

fn fake_pdf_body() -> Vec<u8> {
    let mut body = b"%PDF-1.7\n".to_vec();
    body.resize(4096, b'x');
    body
}

#[tokio::test]
async fn service_worker_streams_pdf_and_builds_artifact() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/render"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-page-count", "3")
                .set_body_bytes(fake_pdf_body()),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let ctx = WorkContext::new(dir.path().join("svc.pdf"));
    let worker = ServiceWorker::new(format!("{}/render", server.uri()));
    let job = Job::sample("svc-job");

    let artifact = worker.execute(&job, &ctx).await.unwrap();
    assert_eq!(artifact.page_count, 3);
    assert_eq!(artifact.intent, job.export.intent);
    assert!(artifact.path.exists());
    assert!(artifact.digest.is_some());
    assert_eq!(
        ctx.audit.snapshot()["render_endpoint"],
        json!(format!("{}/render", server.uri()))
    );
}

#[tokio::test]
async fn service_worker_rejects_undersized_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/render"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let ctx = WorkContext::new(dir.path().join("tiny.pdf"));
    let worker = ServiceWorker::new(format!("{}/render", server.uri()));

    let err = worker.execute(&Job::sample("tiny"), &ctx).await.unwrap_err();
    assert!(matches!(err, WorkerError::Remote(_)));
}

#[tokio::test]
async fn service_worker_surfaces_remote_status_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/render"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let ctx = WorkContext::new(dir.path().join("down.pdf"));
    let worker = ServiceWorker::new(format!("{}/render", server.uri()));

    let err = worker.execute(&Job::sample("down"), &ctx).await.unwrap_err();
    match err {
        WorkerError::Remote(message) => assert!(message.contains("503")),
        other => panic!("expected Remote, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Layout worker, against a mock proxy speaking the plugin contract
// ---------------------------------------------------------------------------

async fn serve_plugin_proxy(known_preset: &'static str) -> SocketAddr {
    let app = Router::new()
        .route(
            "/health",
            get(|| async { axum::Json(json!({"status": "ok"})) }),
        )
        .route(
            "/ws",
            get(move |ws: WebSocketUpgrade| async move {
                let resp: Response =
                    ws.on_upgrade(move |socket| plugin_session(socket, known_preset));
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

async fn plugin_session(mut socket: WebSocket, known_preset: &'static str) {
    while let Some(Ok(WsMessage::Text(text))) = socket.recv().await {
        match FrameCodec::decode(text.as_str()).unwrap() {
            Frame::Control(ControlFrame::Register { .. }) => {
                let ack = Frame::Control(ControlFrame::RegisterAck {
                    status: AckStatus::Ok,
                    message: None,
                });
                send(&mut socket, &ack).await;
            }
            Frame::Control(ControlFrame::Ping) => {
                send(&mut socket, &Frame::Control(ControlFrame::Pong)).await;
            }
            Frame::Command(command) => {
                let reply = plugin_reply(&command, known_preset);
                send(&mut socket, &Frame::Reply(reply)).await;
            }
            _ => {}
        }
    }
}

fn plugin_reply(command: &CommandEnvelope, known_preset: &str) -> ReplyEnvelope {
    let cid = command.correlation_id;
    match command.command.as_str() {
        "readDocumentInfo" => ReplyEnvelope::ok(
            cid,
            json!({"pageCount": 2, "widthPt": 595.0, "heightPt": 842.0, "fonts": [], "styles": []}),
        ),
        "executeScript" => {
            let script = command.params["script"].as_str().unwrap_or_default();
            if script.contains("pdfExportPresets") {
                let probed = command.params["args"]["preset"].as_str().unwrap_or_default();
                ReplyEnvelope::ok(cid, json!({"exists": probed == known_preset}))
            } else {
                ReplyEnvelope::ok(cid, json!({"ok": true}))
            }
        }
        "exportPDF" => {
            let path = command.params["path"].as_str().unwrap();
            std::fs::write(path, b"%PDF-1.7 exported by mock plugin").unwrap();
            ReplyEnvelope::ok(cid, json!({"path": path, "pageCount": 2}))
        }
        "placeImage" => {
            if command.params["frameId"].as_str() == Some("missing-frame") {
                ReplyEnvelope::error(cid, "FrameNotFound", "no such frame")
            } else {
                ReplyEnvelope::ok(cid, json!({"placed": true}))
            }
        }
        other => ReplyEnvelope::error(cid, "UnknownCommand", other.to_string()),
    }
}

async fn send(socket: &mut WebSocket, frame: &Frame) {
    let text = FrameCodec::encode(frame).unwrap();
    let _ = socket.send(WsMessage::Text(text.into())).await;
}

async fn layout_worker_for(addr: SocketAddr) -> LayoutWorker {
    let mut config = TransportConfig::for_proxy(&addr.to_string(), "indesign");
    config.handshake_timeout = Duration::from_secs(2);
    let session = Arc::new(Session::connect(config).await.unwrap());
    let client = Arc::new(McpClient::new(session, McpConfig::default()));
    LayoutWorker::new(client, "doc-1")
}

#[tokio::test]
async fn layout_worker_exports_and_audits_preset_first() {
    let addr = serve_plugin_proxy("standard-screen").await;
    let worker = layout_worker_for(addr).await;

    let dir = tempfile::tempdir().unwrap();
    let ctx = WorkContext::new(dir.path().join("layout.pdf"));
    let job = Job::sample("layout-job");

    let artifact = worker.execute(&job, &ctx).await.unwrap();
    assert_eq!(artifact.page_count, 2);
    assert!(artifact.path.exists());

    let audit = ctx.audit.snapshot();
    assert_eq!(audit["export_preset"], json!("standard-screen"));
    assert_eq!(audit["export_intent"], json!("screen"));
}

#[tokio::test]
async fn layout_worker_places_a_declared_partner_logo() {
    let addr = serve_plugin_proxy("standard-screen").await;
    let worker = layout_worker_for(addr).await;

    let dir = tempfile::tempdir().unwrap();
    let ctx = WorkContext::new(dir.path().join("logo.pdf"));
    let mut job = Job::sample("logo-job");
    job.content
        .insert("partner_logo".into(), json!("/assets/globex.png"));

    worker.execute(&job, &ctx).await.unwrap();
    assert_eq!(ctx.audit.snapshot()["partner_logo"], json!("/assets/globex.png"));
}

#[tokio::test]
async fn layout_worker_surfaces_missing_logo_frames_as_script_failures() {
    let addr = serve_plugin_proxy("standard-screen").await;
    let worker = layout_worker_for(addr).await;

    let dir = tempfile::tempdir().unwrap();
    let ctx = WorkContext::new(dir.path().join("noframe.pdf"));
    let mut job = Job::sample("frame-miss");
    job.content
        .insert("partner_logo".into(), json!("/assets/globex.png"));
    job.content.insert("logo_frame".into(), json!("missing-frame"));

    let err = worker.execute(&job, &ctx).await.unwrap_err();
    assert!(matches!(err, WorkerError::Script(_)));
}

#[tokio::test]
async fn layout_worker_fails_cleanly_on_unknown_preset() {
    let addr = serve_plugin_proxy("only-this-preset").await;
    let worker = layout_worker_for(addr).await;

    let dir = tempfile::tempdir().unwrap();
    let ctx = WorkContext::new(dir.path().join("never.pdf"));
    let job = Job::sample("preset-miss");

    let err = worker.execute(&job, &ctx).await.unwrap_err();
    assert!(matches!(err, WorkerError::Export(_)));
    assert!(!ctx.output_path.exists());
}
