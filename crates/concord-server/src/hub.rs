//! The hub: terminates agent streams and fans out broadcasts.
//!
//! Each connection runs one task that owns both halves of the socket.
//! Outbound traffic from other components (broadcasts, liveness
//! challenges, supersede/evict closes) arrives through the session's
//! registry slot as [`SessionCommand`]s; inbound frames are handled inline
//! so replies and broadcasts stay in receive order for any single sender.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use chrono::Utc;
use futures::StreamExt;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use concord_shared::constants::{MAX_FRAME_SIZE, PROTOCOL_VERSION};
use concord_shared::token::TokenType;
use concord_shared::types::{AgentId, ConversationStatus, MessageType};
use concord_shared::Frame;
use concord_store::{AgentProfile, BrainStateUpdate, NewMessage, StoreError};

use crate::registry::{derive_session_identifier, SessionCommand};
use crate::state::AppState;

/// Router exposing the stream endpoint.
pub fn stream_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    // Token may arrive as `?token=` or as a bearer header; both are
    // accepted. Verification happens after the upgrade so the failure
    // reason can be delivered as a protocol-level error frame.
    let token = query.token.clone().or_else(|| {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).to_string())
    });

    ws.on_upgrade(move |socket| handle_connection(state, socket, token))
}

async fn handle_connection(state: AppState, mut socket: WebSocket, token: Option<String>) {
    // -- Authenticate --
    let Some(token) = token else {
        let _ = send_frame(&mut socket, &Frame::error("invalid_token")).await;
        let _ = socket.close().await;
        return;
    };

    let payload = match state.auth.verify(&token, TokenType::Access) {
        Ok(payload) => payload,
        Err(e) => {
            let _ = send_frame(&mut socket, &Frame::error(e.code())).await;
            let _ = socket.close().await;
            return;
        }
    };

    let profile_lookup = state.db.lock().get_agent(payload.ai_id);
    let profile = match profile_lookup {
        Ok(profile) => profile,
        Err(StoreError::NotFound) => {
            let _ = send_frame(&mut socket, &Frame::error("unknown_agent")).await;
            let _ = socket.close().await;
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, ai_id = %payload.ai_id, "profile lookup failed");
            let _ = send_frame(&mut socket, &Frame::error("store_unavailable")).await;
            let _ = socket.close().await;
            return;
        }
    };

    // -- Register --
    let connected_at = Utc::now();
    let entropy: u64 = rand::thread_rng().gen();
    let session_identifier =
        derive_session_identifier(profile.id, &profile.project, connected_at, entropy);

    let log_id = state
        .db
        .lock()
        .record_hub_connect(profile.id, &session_identifier, &profile.project)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to log hub connect");
            0
        });

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SessionCommand>(64);
    let (epoch, superseded) = state.registry.register(
        profile.id,
        profile.name.clone(),
        session_identifier.clone(),
        profile.project.clone(),
        cmd_tx,
        log_id,
    );

    if let Some((old_sender, old_log_id)) = superseded {
        // Best-effort: the old connection closes itself on receipt.
        let _ = old_sender.try_send(SessionCommand::Close("superseded".into()));
        if old_log_id != 0 {
            let _ = state.db.lock().record_hub_disconnect(old_log_id, "superseded");
        }
        tracing::info!(ai_id = %profile.id, "superseded previous session");
    }

    tracing::info!(
        ai_id = %profile.id,
        session_id = %session_identifier,
        project = %profile.project,
        "agent connected"
    );

    let welcome = Frame::Welcome {
        ai_id: profile.id,
        name: profile.name.clone(),
        nickname: profile.nickname.clone(),
        project: profile.project.clone(),
        session_identifier: session_identifier.clone(),
        protocol: PROTOCOL_VERSION.to_string(),
    };
    if send_frame(&mut socket, &welcome).await.is_err() {
        cleanup(&state, &profile, epoch, "send_failed");
        return;
    }

    // -- Serve --
    let close_reason = serve_session(&state, &mut socket, &profile, &session_identifier, &mut cmd_rx).await;

    let _ = socket.close().await;
    cleanup(&state, &profile, epoch, &close_reason);
}

/// Drive one authenticated session until it ends. Returns the close
/// reason recorded in the hub session log.
async fn serve_session(
    state: &AppState,
    socket: &mut WebSocket,
    profile: &AgentProfile,
    session_identifier: &str,
    cmd_rx: &mut mpsc::Receiver<SessionCommand>,
) -> String {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(SessionCommand::Send(frame)) => {
                    if send_frame(socket, &frame).await.is_err() {
                        return "send_failed".into();
                    }
                }
                Some(SessionCommand::Close(reason)) => {
                    let _ = send_frame(socket, &Frame::error(reason.clone())).await;
                    return reason;
                }
                None => return "closed".into(),
            },

            msg = socket.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > MAX_FRAME_SIZE {
                        tracing::warn!(
                            ai_id = %profile.id,
                            size = text.len(),
                            "oversized frame"
                        );
                        let _ = send_frame(socket, &Frame::error("frame_too_large")).await;
                        return "protocol_violation".into();
                    }
                    match Frame::from_json(&text) {
                        Ok(frame) => {
                            state.registry.touch_tx(profile.id);
                            if let Err(reason) =
                                handle_frame(state, socket, profile, session_identifier, frame).await
                            {
                                return reason;
                            }
                        }
                        Err(e) => {
                            // Malformed frames are a protocol violation:
                            // answer once, then drop the session.
                            tracing::warn!(
                                ai_id = %profile.id,
                                session_id = %session_identifier,
                                error = %e,
                                "malformed frame"
                            );
                            let _ = send_frame(socket, &Frame::error("malformed_frame")).await;
                            return "protocol_violation".into();
                        }
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    state.registry.touch_tx(profile.id);
                }
                Some(Ok(Message::Close(_))) | None => return "closed".into(),
                Some(Ok(Message::Binary(_))) => {
                    let _ = send_frame(socket, &Frame::error("malformed_frame")).await;
                    return "protocol_violation".into();
                }
                Some(Err(e)) => {
                    tracing::debug!(ai_id = %profile.id, error = %e, "socket error");
                    return "transport_error".into();
                }
            },
        }
    }
}

/// Handle one inbound frame. `Err(reason)` ends the session.
async fn handle_frame(
    state: &AppState,
    socket: &mut WebSocket,
    profile: &AgentProfile,
    session_identifier: &str,
    frame: Frame,
) -> Result<(), String> {
    let kind = frame.kind();
    match frame {
        Frame::Heartbeat { .. } => {
            let ack = Frame::HeartbeatAck {
                timestamp: Utc::now(),
            };
            send_frame(socket, &ack).await.map_err(|_| "send_failed".to_string())?;
        }

        Frame::Message {
            message_type,
            content,
            metadata,
            conversation_id,
            ..
        } => {
            store_and_broadcast(
                state,
                socket,
                profile,
                message_type,
                content,
                metadata,
                conversation_id,
            )
            .await?;
        }

        Frame::Insight {
            content,
            metadata,
            conversation_id,
            ..
        } => {
            store_and_broadcast(
                state,
                socket,
                profile,
                MessageType::Insight,
                content,
                metadata,
                conversation_id,
            )
            .await?;
        }

        Frame::Subscribe { conversation_id } => {
            state.registry.subscribe(profile.id, conversation_id);
        }
        Frame::Unsubscribe { conversation_id } => {
            state.registry.unsubscribe(profile.id, conversation_id);
        }

        Frame::ActivityConfirmation { .. } => {
            // touch_tx already recovered the state; nothing else to do.
            tracing::debug!(
                ai_id = %profile.id,
                session_id = %session_identifier,
                "activity confirmed"
            );
        }

        Frame::Request {
            request_type,
            payload,
            correlation_id,
        } => {
            let reply = handle_rpc(state, profile, session_identifier, &request_type, payload)
                .map(|payload| Frame::Response {
                    request_type: request_type.clone(),
                    payload,
                    correlation_id: correlation_id.clone(),
                })
                .unwrap_or_else(|code| Frame::error_with_correlation(code, correlation_id));
            send_frame(socket, &reply).await.map_err(|_| "send_failed".to_string())?;
        }

        // Outbound-only frames coming from a client are invalid.
        other => {
            tracing::warn!(
                ai_id = %profile.id,
                session_id = %session_identifier,
                frame_type = other.kind(),
                "unexpected frame from client"
            );
            let _ = send_frame(socket, &Frame::error("unexpected_frame")).await;
        }
    }

    tracing::trace!(ai_id = %profile.id, frame_type = kind, "frame handled");
    Ok(())
}

/// Persist a message and fan it out to every other session. Store failure
/// rejects the frame without dropping the session; a failed delivery
/// evicts only that receiver.
async fn store_and_broadcast(
    state: &AppState,
    socket: &mut WebSocket,
    profile: &AgentProfile,
    message_type: MessageType,
    content: Value,
    metadata: Option<Value>,
    conversation_id: Option<i64>,
) -> Result<(), String> {
    let new = NewMessage {
        sender_id: profile.id,
        conversation_id,
        recipient_id: None,
        message_type,
        content,
        metadata,
        project: profile.project.clone(),
    };

    let inserted = state.db.lock().insert_message(&new);
    let (id, created_at) = match inserted {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!(ai_id = %profile.id, error = %e, "message rejected");
            let code = match e {
                StoreError::Invalid(_) => "bad_request",
                StoreError::ForeignKey => "unknown_agent",
                _ => "store_unavailable",
            };
            send_frame(socket, &Frame::error(code))
                .await
                .map_err(|_| "send_failed".to_string())?;
            return Ok(());
        }
    };

    // Re-read the stored row so the broadcast carries the canonical
    // content/metadata, not the raw inbound value.
    let stored = match state.db.lock().get_message(id) {
        Ok(stored) => stored,
        Err(e) => {
            tracing::error!(error = %e, id, "stored message disappeared");
            return Ok(());
        }
    };

    let broadcast = Frame::NewMessage {
        id: stored.id,
        sender_id: stored.sender_id,
        sender_name: profile.name.clone(),
        message_type: stored.message_type,
        content: stored.content,
        metadata: stored.metadata,
        conversation_id: stored.conversation_id,
        created_at,
    };

    let failed = state.registry.broadcast_except(profile.id, &broadcast);
    for ai_id in failed {
        evict_receiver(state, ai_id);
    }

    Ok(())
}

/// Evict a receiver whose outbound queue is gone or full.
fn evict_receiver(state: &AppState, ai_id: AgentId) {
    tracing::warn!(ai_id = %ai_id, "evicting unreachable receiver");
    if let Some(view) = state
        .registry
        .snapshot()
        .into_iter()
        .find(|v| v.ai_id == ai_id)
    {
        if let Some(sender) = state.registry.mark_evicted(ai_id, view.epoch) {
            let _ = sender.try_send(SessionCommand::Close("unreachable".into()));
        }
        if let Some(log_id) = state.registry.unregister(ai_id, view.epoch) {
            let db = state.db.lock();
            let _ = db.record_auth(ai_id, &view.name, &view.project, false, "evicted:unreachable");
            if log_id != 0 {
                let _ = db.record_hub_disconnect(log_id, "unreachable");
            }
        }
    }
}

/// Answer a `request` frame. `Err` carries the stable error code.
fn handle_rpc(
    state: &AppState,
    profile: &AgentProfile,
    session_identifier: &str,
    request_type: &str,
    payload: Value,
) -> Result<Value, String> {
    match request_type {
        "who_am_i" => Ok(json!({
            "ai_id": profile.id,
            "name": profile.name,
            "nickname": profile.nickname,
            "project": profile.project,
            "session_identifier": session_identifier,
        })),

        "list_online_ais" => {
            let online: Vec<Value> = state
                .registry
                .online_agents()
                .into_iter()
                .map(|(id, name)| json!({ "ai_id": id, "name": name }))
                .collect();
            Ok(json!({ "online": online }))
        }

        "save_brain_state" => {
            let mut update: BrainStateUpdate =
                serde_json::from_value(payload).map_err(|_| "bad_request".to_string())?;
            if update.session_identifier.is_none() {
                update.session_identifier = Some(session_identifier.to_string());
            }
            state
                .db
                .lock()
                .upsert_brain_state(profile.id, &update)
                .map_err(|_| "store_unavailable".to_string())?;
            Ok(json!({ "saved": true }))
        }

        "load_brain_state" => {
            let brain = state
                .db
                .lock()
                .load_brain_state(profile.id)
                .map_err(|_| "store_unavailable".to_string())?;
            Ok(match brain {
                Some(state) => serde_json::to_value(state).unwrap_or(Value::Null),
                None => Value::Null,
            })
        }

        "create_conversation" => {
            let title = payload
                .get("title")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "bad_request".to_string())?;
            let category = payload
                .get("category")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let id = state
                .db
                .lock()
                .create_conversation(title, category, &profile.project)
                .map_err(|_| "store_unavailable".to_string())?;
            Ok(json!({ "conversation_id": id }))
        }

        "list_conversations" => {
            let conversations = state
                .db
                .lock()
                .list_conversations(100, 0)
                .map_err(|_| "store_unavailable".to_string())?;
            Ok(serde_json::to_value(conversations).unwrap_or(Value::Null))
        }

        "set_conversation_status" => {
            let id = payload
                .get("conversation_id")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| "bad_request".to_string())?;
            let status = payload
                .get("status")
                .and_then(|v| v.as_str())
                .and_then(ConversationStatus::parse)
                .ok_or_else(|| "bad_request".to_string())?;
            match state.db.lock().set_conversation_status(id, status) {
                Ok(()) => Ok(json!({ "updated": true })),
                Err(StoreError::NotFound) => Err("not_found".to_string()),
                Err(_) => Err("store_unavailable".to_string()),
            }
        }

        "sleep" => {
            let reason = payload
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("requested")
                .to_string();
            state.registry.set_sleeping(profile.id);
            if let Some(sender) = state.registry.sender_for(profile.id) {
                let _ = sender.try_send(SessionCommand::Send(Frame::SleepNotification {
                    reason: reason.clone(),
                }));
            }
            Ok(json!({ "sleeping": true, "reason": reason }))
        }

        _ => Err("unknown_request".to_string()),
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    let text = frame.to_json().map_err(axum::Error::new)?;
    socket.send(Message::Text(text)).await
}

/// Close out the registry slot and the session log. The epoch guard keeps
/// a superseded connection from touching its successor's slot.
fn cleanup(state: &AppState, profile: &AgentProfile, epoch: u64, reason: &str) {
    if let Some(log_id) = state.registry.unregister(profile.id, epoch) {
        if log_id != 0 {
            if let Err(e) = state.db.lock().record_hub_disconnect(log_id, reason) {
                tracing::error!(error = %e, "failed to log hub disconnect");
            }
        }
    }
    tracing::info!(ai_id = %profile.id, reason, "agent disconnected");
}
