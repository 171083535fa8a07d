//! End-to-end hub scenarios: real listeners on ephemeral ports, a real
//! WebSocket client, and the HTTP Request API.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use concord_shared::types::AgentId;
use concord_shared::Frame;
use concord_store::agents::new_profile;
use concord_store::Database;

use concord_server::api::api_router;
use concord_server::config::ServerConfig;
use concord_server::hub::stream_router;
use concord_server::liveness;
use concord_server::state::AppState;

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestHub {
    stream_addr: SocketAddr,
    api_addr: SocketAddr,
    state: AppState,
    http: reqwest::Client,
}

impl TestHub {
    /// Boot a hub with registered agents 10 and 11 on ephemeral ports.
    async fn start(config: ServerConfig) -> Self {
        let db = Database::open_in_memory().unwrap();
        db.create_agent(&new_profile(10, "analyst", "ana", "apollo"))
            .unwrap();
        db.create_agent(&new_profile(11, "builder", "bob", "apollo"))
            .unwrap();

        let state = AppState::new(db, config);

        let stream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let api_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream_addr = stream_listener.local_addr().unwrap();
        let api_addr = api_listener.local_addr().unwrap();

        let stream_app = stream_router(state.clone())
            .into_make_service_with_connect_info::<SocketAddr>();
        let api_app =
            api_router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();

        tokio::spawn(async move {
            axum::serve(stream_listener, stream_app).await.unwrap();
        });
        tokio::spawn(async move {
            axum::serve(api_listener, api_app).await.unwrap();
        });

        Self {
            stream_addr,
            api_addr,
            state,
            http: reqwest::Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.api_addr)
    }

    async fn login(&self, ai_id: i64, name: &str) -> (String, String) {
        let body: Value = self
            .http
            .post(self.api_url("/api/auth/login"))
            .json(&json!({ "ai_id": ai_id, "ai_name": name, "ai_nickname": name }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        (
            body["access_token"].as_str().unwrap().to_string(),
            body["refresh_token"].as_str().unwrap().to_string(),
        )
    }

    /// Open a stream and consume the welcome frame.
    async fn connect(&self, token: &str) -> (Ws, String) {
        let url = format!("ws://{}/ws?token={token}", self.stream_addr);
        let (mut ws, _) = connect_async(&url).await.unwrap();

        match next_frame(&mut ws).await {
            Frame::Welcome {
                session_identifier, ..
            } => (ws, session_identifier),
            other => panic!("expected welcome, got {other:?}"),
        }
    }
}

async fn next_frame(ws: &mut Ws) -> Frame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("transport error");
        match msg {
            Message::Text(text) => return Frame::from_json(&text).unwrap(),
            Message::Close(_) => panic!("stream closed while waiting for a frame"),
            _ => continue,
        }
    }
}

async fn send(ws: &mut Ws, frame: &Frame) {
    ws.send(Message::Text(frame.to_json().unwrap())).await.unwrap();
}

/// Expect no frame for a short window (e.g. no echo to the sender).
async fn expect_silence(ws: &mut Ws, window: Duration) {
    let outcome = tokio::time::timeout(window, ws.next()).await;
    assert!(outcome.is_err(), "expected silence, got {outcome:?}");
}

fn short_liveness_config(stale_secs: u64, grace_secs: u64) -> ServerConfig {
    ServerConfig {
        stale_timeout: Duration::from_secs(stale_secs),
        grace: Duration::from_secs(grace_secs),
        max_sleep: Duration::from_secs(3600),
        ..ServerConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Scenario: happy login → send → broadcast
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_login_send_broadcast() {
    let hub = TestHub::start(ServerConfig::default()).await;

    let (token_a, _) = hub.login(10, "analyst").await;
    let (token_b, _) = hub.login(11, "builder").await;

    let (mut ws_a, _) = hub.connect(&token_a).await;
    let (mut ws_b, _) = hub.connect(&token_b).await;

    send(
        &mut ws_a,
        &Frame::Message {
            ai_id: AgentId(10),
            message_type: concord_shared::types::MessageType::Insight,
            content: json!("hello"),
            metadata: Some(json!({"tag": "t1"})),
            conversation_id: None,
        },
    )
    .await;

    // B observes the broadcast with the stored row's content.
    match next_frame(&mut ws_b).await {
        Frame::NewMessage {
            id,
            sender_id,
            content,
            metadata,
            message_type,
            ..
        } => {
            assert!(id > 0);
            assert_eq!(sender_id, AgentId(10));
            assert_eq!(content, "hello");
            assert_eq!(metadata, json!({"tag": "t1"}));
            assert_eq!(message_type, concord_shared::types::MessageType::Insight);
        }
        other => panic!("expected new_message, got {other:?}"),
    }

    // A gets no echo of its own message.
    expect_silence(&mut ws_a, Duration::from_millis(300)).await;

    // The row landed in the store.
    let stored = hub
        .state
        .db
        .lock()
        .list_messages(&concord_store::MessageFilter::new())
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "hello");
}

// ---------------------------------------------------------------------------
// Scenario: auth failures on connect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_with_garbage_token_is_rejected() {
    let hub = TestHub::start(ServerConfig::default()).await;

    let url = format!("ws://{}/ws?token=garbage", hub.stream_addr);
    let (mut ws, _) = connect_async(&url).await.unwrap();

    match next_frame(&mut ws).await {
        Frame::Error { error, .. } => assert_eq!(error, "invalid_token"),
        other => panic!("expected error frame, got {other:?}"),
    }
}

#[tokio::test]
async fn revoked_token_rejected_on_new_connection() {
    let hub = TestHub::start(ServerConfig::default()).await;
    let (token, _) = hub.login(10, "analyst").await;

    // Logout revokes every token for the principal.
    hub.http
        .post(hub.api_url("/api/auth/logout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let url = format!("ws://{}/ws?token={token}", hub.stream_addr);
    let (mut ws, _) = connect_async(&url).await.unwrap();
    match next_frame(&mut ws).await {
        Frame::Error { error, .. } => assert_eq!(error, "revoked_token"),
        other => panic!("expected revoked_token, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Scenario: supersede on second connect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_connect_supersedes_first() {
    let hub = TestHub::start(ServerConfig::default()).await;
    let (token, _) = hub.login(10, "analyst").await;

    let (mut first, _) = hub.connect(&token).await;
    let (_second, _) = hub.connect(&token).await;

    match next_frame(&mut first).await {
        Frame::Error { error, .. } => assert_eq!(error, "superseded"),
        other => panic!("expected superseded, got {other:?}"),
    }

    // Registry holds exactly one session for the agent.
    assert_eq!(hub.state.registry.session_count(), 1);
}

// ---------------------------------------------------------------------------
// Scenario: liveness challenge, then eviction with audit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn idle_session_is_challenged_exactly_once() {
    // stale = 0 puts every session straight into the challenge window.
    let hub = TestHub::start(short_liveness_config(0, 3600)).await;
    let (token, _) = hub.login(10, "analyst").await;
    let (mut ws, _) = hub.connect(&token).await;

    liveness::sweep(&hub.state);
    liveness::sweep(&hub.state);

    match next_frame(&mut ws).await {
        Frame::ActivityVerification { urgent, .. } => assert!(urgent),
        other => panic!("expected activity_verification, got {other:?}"),
    }
    // The second sweep did not re-send the challenge.
    expect_silence(&mut ws, Duration::from_millis(300)).await;

    // Answering the challenge restores the session.
    send(
        &mut ws,
        &Frame::ActivityConfirmation {
            ai_id: AgentId(10),
            content: "active".into(),
            timestamp: chrono::Utc::now(),
        },
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let view = &hub.state.registry.snapshot()[0];
    assert_eq!(view.state, concord_shared::types::SessionState::Active);
}

#[tokio::test]
async fn silent_session_is_evicted_with_audit_row() {
    // stale = 0, grace = 0: a silent session is evicted on the next sweep.
    let hub = TestHub::start(short_liveness_config(0, 0)).await;
    let (token, _) = hub.login(10, "analyst").await;
    let (mut ws, _) = hub.connect(&token).await;

    liveness::sweep(&hub.state);

    match next_frame(&mut ws).await {
        Frame::Error { error, .. } => assert_eq!(error, "evicted:idle"),
        other => panic!("expected eviction, got {other:?}"),
    }

    assert_eq!(hub.state.registry.session_count(), 0);

    let audit = hub.state.db.lock().list_auth_audit(AgentId(10), 10).unwrap();
    let eviction = audit
        .iter()
        .find(|row| row.details == "evicted:idle")
        .expect("eviction audit row");
    assert!(!eviction.success);
}

// ---------------------------------------------------------------------------
// Scenario: reconnect with refresh after revoking the access half
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_with_refreshed_token() {
    let hub = TestHub::start(ServerConfig::default()).await;
    let (_, refresh_a) = hub.login(10, "analyst").await;
    let (token_b, _) = hub.login(11, "builder").await;

    let (mut ws_b, _) = hub.connect(&token_b).await;

    // A refreshes and connects with the fresh access token.
    let body: Value = hub
        .http
        .post(hub.api_url("/api/auth/refresh"))
        .json(&json!({ "refresh_token": refresh_a }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let new_access = body["access_token"].as_str().unwrap();

    let (mut ws_a, _) = hub.connect(new_access).await;
    send(
        &mut ws_a,
        &Frame::Message {
            ai_id: AgentId(10),
            message_type: concord_shared::types::MessageType::Message,
            content: json!("back online"),
            metadata: None,
            conversation_id: None,
        },
    )
    .await;

    match next_frame(&mut ws_b).await {
        Frame::NewMessage { content, .. } => assert_eq!(content, "back online"),
        other => panic!("expected new_message, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Stream RPCs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn who_am_i_and_online_listing() {
    let hub = TestHub::start(ServerConfig::default()).await;
    let (token_a, _) = hub.login(10, "analyst").await;
    let (token_b, _) = hub.login(11, "builder").await;

    let (mut ws_a, session_id) = hub.connect(&token_a).await;
    let (_ws_b, _) = hub.connect(&token_b).await;

    send(
        &mut ws_a,
        &Frame::Request {
            request_type: "who_am_i".into(),
            payload: Value::Null,
            correlation_id: Some("c-1".into()),
        },
    )
    .await;

    match next_frame(&mut ws_a).await {
        Frame::Response {
            request_type,
            payload,
            correlation_id,
        } => {
            assert_eq!(request_type, "who_am_i");
            assert_eq!(correlation_id.as_deref(), Some("c-1"));
            assert_eq!(payload["ai_id"], 10);
            assert_eq!(payload["session_identifier"], session_id.as_str());
        }
        other => panic!("expected response, got {other:?}"),
    }

    send(
        &mut ws_a,
        &Frame::Request {
            request_type: "list_online_ais".into(),
            payload: Value::Null,
            correlation_id: None,
        },
    )
    .await;

    match next_frame(&mut ws_a).await {
        Frame::Response { payload, .. } => {
            let online = payload["online"].as_array().unwrap();
            assert_eq!(online.len(), 2);
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_rpc_gets_typed_error_with_correlation() {
    let hub = TestHub::start(ServerConfig::default()).await;
    let (token, _) = hub.login(10, "analyst").await;
    let (mut ws, _) = hub.connect(&token).await;

    send(
        &mut ws,
        &Frame::Request {
            request_type: "teleport".into(),
            payload: Value::Null,
            correlation_id: Some("c-9".into()),
        },
    )
    .await;

    match next_frame(&mut ws).await {
        Frame::Error {
            error,
            correlation_id,
        } => {
            assert_eq!(error, "unknown_request");
            assert_eq!(correlation_id.as_deref(), Some("c-9"));
        }
        other => panic!("expected error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Request API flows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn api_send_reaches_stream_inbox_and_sent() {
    let hub = TestHub::start(ServerConfig::default()).await;
    let (token_a, _) = hub.login(10, "analyst").await;
    let (token_b, _) = hub.login(11, "builder").await;

    let (mut ws_b, _) = hub.connect(&token_b).await;

    // A sends a directed message through the Request API.
    let body: Value = hub
        .http
        .post(hub.api_url("/api/messages/send"))
        .bearer_auth(&token_a)
        .json(&json!({ "content": "ping", "target_ai_id": 11 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["message_id"].as_i64().unwrap() > 0);
    assert_eq!(body["delivered_online"], true);

    // B sees it on the stream.
    match next_frame(&mut ws_b).await {
        Frame::NewMessage { content, .. } => assert_eq!(content, "ping"),
        other => panic!("expected new_message, got {other:?}"),
    }

    // ...and in its inbox.
    let inbox: Value = hub
        .http
        .get(hub.api_url("/api/messages/inbox?limit=10"))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(inbox.as_array().unwrap().len(), 1);

    let sent: Value = hub
        .http
        .get(hub.api_url("/api/messages/sent?limit=10"))
        .bearer_auth(&token_a)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sent.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn api_errors_are_typed() {
    let hub = TestHub::start(ServerConfig::default()).await;

    // Unknown agent cannot log in (no auto-registration).
    let response = hub
        .http
        .post(hub.api_url("/api/auth/login"))
        .json(&json!({ "ai_id": 999, "ai_name": "ghost" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unknown_agent");

    // Requests without a token are unauthorized.
    let response = hub
        .http
        .get(hub.api_url("/api/agents/10"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Duplicate registration conflicts.
    let register = |ai_id: i64| {
        hub.http
            .post(hub.api_url("/api/agents/register"))
            .json(&json!({ "ai_id": ai_id, "name": "dup", "nickname": "d" }))
            .send()
    };
    register(42).await.unwrap().error_for_status().unwrap();
    let response = register(42).await.unwrap();
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn brain_state_roundtrip_over_api() {
    let hub = TestHub::start(ServerConfig::default()).await;
    let (token, _) = hub.login(10, "analyst").await;

    let save: Value = hub
        .http
        .post(hub.api_url("/api/brain/save"))
        .bearer_auth(&token)
        .json(&json!({
            "current_task": "T1",
            "cycle_count": 5,
            "checkpoint_data": { "step": 3 }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(save["saved"], true);
    assert!(save["cycle_count"].as_i64().unwrap() >= 5);

    let loaded: Value = hub
        .http
        .get(hub.api_url("/api/brain/load"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(loaded["current_task"], "T1");
    assert!(loaded["cycle_count"].as_i64().unwrap() >= 5);
    assert_eq!(loaded["checkpoint_data"]["step"], 3);
}
