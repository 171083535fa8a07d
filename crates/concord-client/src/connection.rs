//! Stream connection with reconnect/backoff/heartbeat discipline.
//!
//! The contract every agent honours:
//! 1. authenticate via the Request API and cache both tokens;
//! 2. open the stream with the access token, refreshing (or re-logging-in)
//!    when the hub rejects it;
//! 3. reconnect with exponential backoff plus jitter, resetting on
//!    success;
//! 4. heartbeat while connected;
//! 5. answer activity-verification frames immediately, before any other
//!    work;
//! 6. checkpoint brain state on every reconnect and on shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use concord_shared::types::AgentId;
use concord_shared::Frame;

use crate::api::ApiClient;
use crate::brain::BrainCache;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::AgentEvent;

/// Reconnect delay: `base * 2^min(attempts, 10) * uniform(0.5, 1.5)`.
pub fn compute_backoff(attempts: u32, base: Duration) -> Duration {
    let factor = 2u64.pow(attempts.min(10)) as f64;
    let jitter: f64 = rand::thread_rng().gen_range(0.5..1.5);
    base.mul_f64(factor * jitter)
}

/// Why a single connection ended.
enum ConnectionEnd {
    /// Server or network dropped us; reconnect.
    Lost(String),
    /// The hub rejected the token; refresh before reconnecting.
    AuthRejected(String),
    /// Shutdown was requested; stop the loop.
    Shutdown,
}

/// The reference agent client.
pub struct AgentClient {
    config: ClientConfig,
    api: Arc<ApiClient>,
    brain: Arc<Mutex<BrainCache>>,
    event_tx: broadcast::Sender<AgentEvent>,
    outbound_tx: mpsc::Sender<Frame>,
    outbound_rx: mpsc::Receiver<Frame>,
    shutdown_tx: broadcast::Sender<()>,
}

impl AgentClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api = Arc::new(ApiClient::new(&config));
        let brain = Arc::new(Mutex::new(BrainCache::open(&config)?));
        let (event_tx, _) = broadcast::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            api,
            brain,
            event_tx,
            outbound_tx,
            outbound_rx,
            shutdown_tx,
        })
    }

    /// Shared Request API client (usable while the stream loop runs).
    pub fn api(&self) -> Arc<ApiClient> {
        self.api.clone()
    }

    /// Shared brain cache. Save through it on significant state changes;
    /// the connection loop saves on every reconnect and on shutdown.
    pub fn brain(&self) -> Arc<Mutex<BrainCache>> {
        self.brain.clone()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    /// Handle for queueing outbound frames (messages, insights, RPCs).
    pub fn sender(&self) -> mpsc::Sender<Frame> {
        self.outbound_tx.clone()
    }

    /// Handle that ends [`run`](Self::run) gracefully.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Convenience: queue an insight frame.
    pub async fn send_insight(
        &self,
        content: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) {
        let frame = Frame::Insight {
            ai_id: AgentId(self.config.ai_id),
            content,
            metadata,
            conversation_id: None,
        };
        let _ = self.outbound_tx.send(frame).await;
    }

    /// Run until shutdown (or until reconnect attempts are exhausted).
    ///
    /// Also reacts to Ctrl-C: brain state is flushed and the channel is
    /// closed before returning.
    pub async fn run(mut self) -> Result<()> {
        // Authenticate up front; a cached pair would also do.
        if self.api.access_token().is_none() {
            self.api.login().await?;
        }

        // Adopt the store copy when it is newer than the local file.
        match self.api.load_brain_state().await {
            Ok(remote) => self.brain.lock().reconcile(remote),
            Err(e) => tracing::warn!(error = %e, "could not load brain state from store"),
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut attempts: u32 = 0;

        loop {
            let end = tokio::select! {
                end = self.connect_once() => end,
                _ = shutdown_rx.recv() => ConnectionEnd::Shutdown,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received, shutting down");
                    ConnectionEnd::Shutdown
                }
            };

            match end {
                ConnectionEnd::Shutdown => break,
                ConnectionEnd::AuthRejected(code) => {
                    attempts += 1;
                    tracing::info!(code = %code, "access token rejected, re-authenticating");
                    let _ = self.event_tx.send(AgentEvent::Disconnected { reason: code });
                    if let Err(e) = self.api.refresh_or_login().await {
                        tracing::warn!(error = %e, "re-authentication failed");
                    }
                }
                ConnectionEnd::Lost(reason) => {
                    attempts += 1;
                    let _ = self
                        .event_tx
                        .send(AgentEvent::Disconnected { reason: reason.clone() });
                    tracing::info!(reason = %reason, attempts, "connection lost");
                }
            }

            if attempts > self.config.max_connect_attempts {
                self.flush_brain().await;
                return Err(ClientError::GaveUp(attempts));
            }

            let delay = compute_backoff(attempts, self.config.backoff_base);
            tracing::debug!(delay_ms = delay.as_millis() as u64, "backing off before reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        self.flush_brain().await;
        tracing::info!("agent client stopped");
        Ok(())
    }

    /// One connection lifetime: connect, welcome, serve, teardown.
    async fn connect_once(&mut self) -> ConnectionEnd {
        let Some(token) = self.api.access_token() else {
            return ConnectionEnd::AuthRejected("not_authenticated".into());
        };

        let url = format!("{}?token={}", self.config.stream_url, token);
        let mut ws = match connect_async(&url).await {
            Ok((ws, _response)) => ws,
            Err(e) => return ConnectionEnd::Lost(format!("connect: {e}")),
        };

        // Clones for the frame handler, so the select arms below borrow
        // only the outbound queue from `self`.
        let ctx = FrameContext {
            ai_id: AgentId(self.config.ai_id),
            api: self.api.clone(),
            brain: self.brain.clone(),
            event_tx: self.event_tx.clone(),
        };
        let outbound_rx = &mut self.outbound_rx;

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it, the welcome counts.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                msg = ws.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws.send(Message::Pong(data)).await;
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return ConnectionEnd::Lost("closed".into());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return ConnectionEnd::Lost(format!("transport: {e}")),
                    };

                    let frame = match Frame::from_json(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!(error = %e, "unparseable frame from hub");
                            continue;
                        }
                    };

                    if let Some(end) = handle_inbound(&ctx, &mut ws, frame).await {
                        return end;
                    }
                }

                outbound = outbound_rx.recv() => {
                    let Some(frame) = outbound else {
                        return ConnectionEnd::Shutdown;
                    };
                    if let Err(e) = send_frame(&mut ws, &frame).await {
                        tracing::warn!(error = %e, "outbound send failed");
                        return ConnectionEnd::Lost("send_failed".into());
                    }
                }

                _ = heartbeat.tick() => {
                    let frame = Frame::Heartbeat {
                        ai_id: ctx.ai_id,
                        timestamp: Utc::now(),
                    };
                    if send_frame(&mut ws, &frame).await.is_err() {
                        return ConnectionEnd::Lost("heartbeat_failed".into());
                    }
                }
            }
        }
    }

    /// Final checkpoint: local file always, store copy best-effort.
    async fn flush_brain(&self) {
        let payload = {
            let mut brain = self.brain.lock();
            if let Err(e) = brain.save_with(|_| {}) {
                tracing::warn!(error = %e, "final local brain save failed");
            }
            brain.state().to_update_payload()
        };
        if let Err(e) = self.api.save_brain_state(&payload).await {
            tracing::warn!(error = %e, "final store brain save failed");
        }
    }
}

/// Everything the inbound-frame handler needs besides the socket.
struct FrameContext {
    ai_id: AgentId,
    api: Arc<ApiClient>,
    brain: Arc<Mutex<BrainCache>>,
    event_tx: broadcast::Sender<AgentEvent>,
}

/// Handle one frame from the hub. `Some(end)` tears the connection down.
async fn handle_inbound(
    ctx: &FrameContext,
    ws: &mut WsStream,
    frame: Frame,
) -> Option<ConnectionEnd> {
    match frame {
        Frame::Welcome {
            session_identifier, ..
        } => {
            tracing::info!(session_id = %session_identifier, "connected to hub");

            // Reconnect checkpoint: stamp the new session into the local
            // cache and push it to the store.
            let payload = {
                let mut brain = ctx.brain.lock();
                let sid = session_identifier.clone();
                if let Err(e) = brain.save_with(|s| s.session_identifier = sid) {
                    tracing::warn!(error = %e, "local brain save failed");
                }
                brain.state().to_update_payload()
            };
            if let Err(e) = ctx.api.save_brain_state(&payload).await {
                tracing::warn!(error = %e, "store brain save failed");
            }

            let _ = ctx
                .event_tx
                .send(AgentEvent::Connected { session_identifier });
        }

        // Challenges are answered before anything else happens.
        Frame::ActivityVerification { content, .. } => {
            let confirmation = Frame::ActivityConfirmation {
                ai_id: ctx.ai_id,
                content: "active".to_string(),
                timestamp: Utc::now(),
            };
            if send_frame(ws, &confirmation).await.is_err() {
                return Some(ConnectionEnd::Lost("confirmation_failed".into()));
            }
            let _ = ctx.event_tx.send(AgentEvent::ActivityChallenge { content });
        }

        Frame::NewMessage {
            id,
            sender_id,
            sender_name,
            message_type,
            content,
            metadata,
            conversation_id,
            created_at,
        } => {
            let _ = ctx.event_tx.send(AgentEvent::NewMessage {
                id,
                sender_id,
                sender_name,
                message_type,
                content,
                metadata,
                conversation_id,
                created_at,
            });
        }

        // Sleep updates local state only; the channel stays up.
        Frame::SleepNotification { reason } => {
            tracing::info!(reason = %reason, "hub marked this session sleeping");
            let _ = ctx.event_tx.send(AgentEvent::Sleeping { reason });
        }

        Frame::HeartbeatAck { .. } => {}

        Frame::Response {
            request_type,
            payload,
            correlation_id,
        } => {
            let _ = ctx.event_tx.send(AgentEvent::RpcResponse {
                request_type,
                payload,
                correlation_id,
            });
        }

        Frame::Error {
            error,
            correlation_id,
        } => {
            if matches!(
                error.as_str(),
                "invalid_token" | "expired_token" | "revoked_token"
            ) {
                return Some(ConnectionEnd::AuthRejected(error));
            }
            let terminal = error == "superseded" || error.starts_with("evicted");
            let _ = ctx.event_tx.send(AgentEvent::HubError {
                code: error.clone(),
                correlation_id,
            });
            if terminal {
                return Some(ConnectionEnd::Lost(error));
            }
        }

        other => {
            tracing::debug!(frame_type = other.kind(), "ignoring unexpected frame");
        }
    }

    None
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn send_frame(ws: &mut WsStream, frame: &Frame) -> Result<()> {
    let text = frame.to_json()?;
    ws.send(Message::Text(text)).await?;
    Ok(())
}
