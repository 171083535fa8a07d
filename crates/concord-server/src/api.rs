//! The synchronous Request API.
//!
//! JSON over HTTP, mirroring the hub's operations where offline usage
//! matters. Every endpoint except register/login/refresh/verify/health
//! requires a valid non-revoked access token; the bearer's agent id is the
//! acting principal. Authenticated calls refresh the principal's database
//! activity stamp, which counts toward liveness.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use concord_shared::token::{TokenPayload, TokenType};
use concord_shared::types::{AgentId, MessageType, Role};
use concord_shared::Frame;
use concord_store::{
    AgentProfile, BrainState, BrainStateUpdate, MessageFilter, NewMessage, StoredMessage,
};

use crate::error::ServerError;
use crate::rate_limit::rate_limit_middleware;
use crate::registry::SessionCommand;
use crate::state::AppState;

pub fn api_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/verify", post(verify))
        .route("/api/auth/logout", post(logout))
        .route("/api/agents/register", post(register_agent))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/:id", get(get_agent))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(end_session))
        .route("/api/messages/send", post(send_message))
        .route("/api/messages/inbox", get(inbox))
        .route("/api/messages/sent", get(sent))
        .route("/api/collab/request", post(collab_request))
        .route("/api/collab/list", get(collab_list))
        .route("/api/brain/save", post(brain_save))
        .route("/api/brain/load", get(brain_load))
        .route("/api/permissions/grant", post(grant_permission))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth plumbing
// ---------------------------------------------------------------------------

fn bearer_token(headers: &HeaderMap) -> Result<String, ServerError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ServerError::MissingToken)?;

    Ok(auth.strip_prefix("Bearer ").unwrap_or(auth).to_string())
}

/// Verify the bearer access token and stamp database activity for the
/// principal's live session (dual-channel liveness).
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<TokenPayload, ServerError> {
    let token = bearer_token(headers)?;
    let payload = state.auth.verify(&token, TokenType::Access)?;
    state.registry.touch_db(payload.ai_id);
    Ok(payload)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    online_agents: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        online_agents: state.registry.session_count(),
    })
}

// ---------------------------------------------------------------------------
// Auth endpoints
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RegisterRequest {
    ai_id: i64,
    name: String,
    nickname: String,
    #[serde(default)]
    expertise: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    project: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    ai_id: AgentId,
    created: bool,
}

async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ServerError> {
    let profile = AgentProfile {
        id: AgentId(req.ai_id),
        name: req.name,
        nickname: req.nickname,
        expertise: req.expertise,
        version: req.version,
        project: req.project,
        is_active: true,
        created_at: Utc::now(),
    };

    state.db.lock().create_agent(&profile)?;
    info!(ai_id = %profile.id, name = %profile.name, "agent registered");

    Ok(Json(RegisterResponse {
        ai_id: profile.id,
        created: true,
    }))
}

#[derive(Deserialize)]
struct LoginRequest {
    ai_id: i64,
    ai_name: String,
    #[serde(default)]
    ai_nickname: String,
}

#[derive(Serialize)]
struct TokensResponse {
    access_token: String,
    refresh_token: String,
    access_expires_in: i64,
    refresh_expires_in: i64,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokensResponse>, ServerError> {
    let ai_id = AgentId(req.ai_id);

    // No auto-registration: tokens are only issued for known profiles.
    let known = state.db.lock().agent_exists(ai_id)?;
    if !known {
        let _ = state
            .db
            .lock()
            .record_auth(ai_id, &req.ai_name, "", false, "login:unknown_agent");
        return Err(ServerError::UnknownAgent);
    }

    let tokens = state.auth.issue(ai_id, &req.ai_name, &req.ai_nickname)?;

    let project = state
        .db
        .lock()
        .get_agent(ai_id)
        .map(|p| p.project)
        .unwrap_or_default();
    state
        .db
        .lock()
        .record_auth(ai_id, &req.ai_name, &project, true, "login")?;

    Ok(Json(TokensResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        access_expires_in: tokens.access_expires_in,
        refresh_expires_in: tokens.refresh_expires_in,
    }))
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokensResponse>, ServerError> {
    let tokens = state.auth.refresh(&req.refresh_token)?;
    Ok(Json(TokensResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        access_expires_in: tokens.access_expires_in,
        refresh_expires_in: tokens.refresh_expires_in,
    }))
}

#[derive(Deserialize)]
struct VerifyRequest {
    token: String,
}

#[derive(Serialize)]
struct VerifyResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ai_id: Option<AgentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_type: Option<TokenType>,
}

async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Json<VerifyResponse> {
    // A verification probe is a query, not a gate: report rather than 401.
    let outcome = state
        .auth
        .verify(&req.token, TokenType::Access)
        .or_else(|_| state.auth.verify(&req.token, TokenType::Refresh));

    match outcome {
        Ok(payload) => Json(VerifyResponse {
            valid: true,
            ai_id: Some(payload.ai_id),
            token_type: Some(payload.token_type),
        }),
        Err(_) => Json(VerifyResponse {
            valid: false,
            ai_id: None,
            token_type: None,
        }),
    }
}

#[derive(Serialize)]
struct LogoutResponse {
    revoked: usize,
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LogoutResponse>, ServerError> {
    let principal = authenticate(&state, &headers)?;
    let revoked = state.auth.revoke_all(principal.ai_id)?;

    let _ = state
        .db
        .lock()
        .record_auth(principal.ai_id, &principal.ai_name, "", true, "logout");

    info!(ai_id = %principal.ai_id, revoked, "agent logged out");
    Ok(Json(LogoutResponse { revoked }))
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

fn default_limit() -> u32 {
    50
}

async fn get_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<AgentProfile>, ServerError> {
    authenticate(&state, &headers)?;
    let profile = state.db.lock().get_agent(AgentId(id))?;
    Ok(Json(profile))
}

async fn list_agents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<AgentProfile>>, ServerError> {
    authenticate(&state, &headers)?;
    let agents = state.db.lock().list_agents(page.limit, page.offset)?;
    Ok(Json(agents))
}

// ---------------------------------------------------------------------------
// Work sessions
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateSessionRequest {
    session_type: String,
    #[serde(default)]
    project: String,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Serialize)]
struct CreateSessionResponse {
    session_id: Uuid,
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ServerError> {
    let principal = authenticate(&state, &headers)?;
    let session_id = state.db.lock().create_work_session(
        principal.ai_id,
        &req.session_type,
        &req.project,
        req.metadata.as_ref(),
    )?;
    Ok(Json(CreateSessionResponse { session_id }))
}

async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<concord_store::WorkSession>, ServerError> {
    let principal = authenticate(&state, &headers)?;
    let session = state.db.lock().get_work_session(id)?;
    if session.ai_id != principal.ai_id {
        return Err(ServerError::Forbidden("not your session".into()));
    }
    Ok(Json(session))
}

async fn end_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ServerError> {
    let principal = authenticate(&state, &headers)?;
    let session = state.db.lock().get_work_session(id)?;
    if session.ai_id != principal.ai_id {
        return Err(ServerError::Forbidden("not your session".into()));
    }
    state.db.lock().end_work_session(id)?;
    Ok(Json(serde_json::json!({ "ended": true })))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SendMessageRequest {
    content: Value,
    #[serde(default)]
    target_ai_id: Option<i64>,
    #[serde(default)]
    message_type: Option<MessageType>,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    conversation_id: Option<i64>,
}

#[derive(Serialize)]
struct SendMessageResponse {
    message_id: i64,
    created_at: DateTime<Utc>,
    delivered_online: bool,
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ServerError> {
    let principal = authenticate(&state, &headers)?;
    let profile = state.db.lock().get_agent(principal.ai_id)?;

    let new = NewMessage {
        sender_id: principal.ai_id,
        conversation_id: req.conversation_id,
        recipient_id: req.target_ai_id.map(AgentId),
        message_type: req.message_type.unwrap_or(MessageType::Communication),
        content: req.content,
        metadata: req.metadata,
        project: profile.project.clone(),
    };

    let (message_id, created_at) = state.db.lock().insert_message(&new)?;
    let stored = state.db.lock().get_message(message_id)?;

    let frame = Frame::NewMessage {
        id: stored.id,
        sender_id: stored.sender_id,
        sender_name: profile.name.clone(),
        message_type: stored.message_type,
        content: stored.content,
        metadata: stored.metadata,
        conversation_id: stored.conversation_id,
        created_at,
    };

    // Online fan-out: a directed message reaches its recipient's stream;
    // an undirected one reaches everyone but the sender.
    let delivered_online = match req.target_ai_id.map(AgentId) {
        Some(target) => match state.registry.sender_for(target) {
            Some(sender) => sender.try_send(SessionCommand::Send(frame)).is_ok(),
            None => false,
        },
        None => {
            state.registry.broadcast_except(principal.ai_id, &frame);
            true
        }
    };

    Ok(Json(SendMessageResponse {
        message_id,
        created_at,
        delivered_online,
    }))
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: u32,
}

async fn inbox(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<StoredMessage>>, ServerError> {
    let principal = authenticate(&state, &headers)?;
    let filter = MessageFilter {
        recipient_id: Some(principal.ai_id),
        limit: q.limit,
        ..MessageFilter::new()
    };
    let messages = state.db.lock().list_messages(&filter)?;
    Ok(Json(messages))
}

async fn sent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<StoredMessage>>, ServerError> {
    let principal = authenticate(&state, &headers)?;
    let filter = MessageFilter {
        sender_id: Some(principal.ai_id),
        limit: q.limit,
        ..MessageFilter::new()
    };
    let messages = state.db.lock().list_messages(&filter)?;
    Ok(Json(messages))
}

// ---------------------------------------------------------------------------
// Collaboration
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CollabRequestBody {
    target_ai_id: i64,
    request_type: String,
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Serialize)]
struct CollabRequestResponse {
    collab_id: Uuid,
}

async fn collab_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CollabRequestBody>,
) -> Result<Json<CollabRequestResponse>, ServerError> {
    let principal = authenticate(&state, &headers)?;
    let collab_id = state.db.lock().create_collab_request(
        principal.ai_id,
        AgentId(req.target_ai_id),
        &req.request_type,
        &req.title,
        &req.description,
    )?;
    Ok(Json(CollabRequestResponse { collab_id }))
}

async fn collab_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<concord_store::CollabRequest>>, ServerError> {
    let principal = authenticate(&state, &headers)?;
    let requests = state.db.lock().list_collab_requests(principal.ai_id, q.limit)?;
    Ok(Json(requests))
}

// ---------------------------------------------------------------------------
// Brain state
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct BrainSaveResponse {
    saved: bool,
    cycle_count: i64,
}

async fn brain_save(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<BrainStateUpdate>,
) -> Result<Json<BrainSaveResponse>, ServerError> {
    let principal = authenticate(&state, &headers)?;

    let cycle_count = {
        let db = state.db.lock();
        db.upsert_brain_state(principal.ai_id, &update)?;
        db.load_brain_state(principal.ai_id)?
            .map(|s| s.cycle_count)
            .unwrap_or_default()
    };

    Ok(Json(BrainSaveResponse {
        saved: true,
        cycle_count,
    }))
}

async fn brain_load(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Option<BrainState>>, ServerError> {
    let principal = authenticate(&state, &headers)?;
    let brain = state.db.lock().load_brain_state(principal.ai_id)?;
    Ok(Json(brain))
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct GrantRequest {
    ai_id: i64,
    project: String,
    role: Role,
}

async fn grant_permission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GrantRequest>,
) -> Result<Json<Value>, ServerError> {
    let principal = authenticate(&state, &headers)?;

    // The first grant on a fresh project bootstraps its admin; afterwards
    // only admins may grant.
    let has_admin = state.db.lock().project_has_admin(&req.project)?;
    if has_admin {
        state
            .permissions
            .require(principal.ai_id, &req.project, Role::Admin)?;
    }

    state.permissions.grant(
        AgentId(req.ai_id),
        &req.project,
        req.role,
        Some(principal.ai_id),
    )?;

    info!(
        ai_id = req.ai_id,
        project = %req.project,
        role = %req.role,
        granted_by = %principal.ai_id,
        "permission granted"
    );
    Ok(Json(serde_json::json!({ "granted": true })))
}
