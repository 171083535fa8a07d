//! Request API client.
//!
//! Thin reqwest wrapper over the hub's HTTP surface. Tokens live behind a
//! lock so the stream connection and the embedding application can share
//! one client.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use concord_shared::types::AgentId;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Cached token pair.
#[derive(Debug, Clone, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_in: i64,
    pub refresh_expires_in: i64,
}

/// Agent profile as returned by the hub.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentInfo {
    pub id: AgentId,
    pub name: String,
    pub nickname: String,
    pub project: String,
    pub is_active: bool,
}

/// A message from the inbox/sent listings.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub sender_id: AgentId,
    pub recipient_id: Option<AgentId>,
    pub message_type: String,
    pub content: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Brain state as returned by `/api/brain/load`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrainStateRecord {
    pub ai_id: AgentId,
    pub current_task: String,
    pub last_thought: String,
    pub last_insight: String,
    pub current_cycle: String,
    pub cycle_count: i64,
    pub last_activity: DateTime<Utc>,
    pub checkpoint_data: Value,
    pub session_identifier: String,
}

pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    credentials: (i64, String, String),
    tokens: Mutex<Option<Tokens>>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: config.api_base.clone(),
            credentials: (
                config.ai_id,
                config.ai_name.clone(),
                config.ai_nickname.clone(),
            ),
            tokens: Mutex::new(None),
        }
    }

    /// Current access token, if logged in.
    pub fn access_token(&self) -> Option<String> {
        self.tokens.lock().as_ref().map(|t| t.access_token.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        self.tokens.lock().as_ref().map(|t| t.refresh_token.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let code = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| body.get("error").and_then(|v| v.as_str()).map(String::from))
            .unwrap_or_else(|| "unknown".to_string());

        Err(ClientError::Api {
            status: status.as_u16(),
            code,
        })
    }

    async fn get_authed<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let token = self.access_token().ok_or(ClientError::NotAuthenticated)?;
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn post_authed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T> {
        let token = self.access_token().ok_or(ClientError::NotAuthenticated)?;
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        Self::parse(response).await
    }

    // -----------------------------------------------------------------------
    // Auth
    // -----------------------------------------------------------------------

    /// Register the agent's profile. Idempotent from the caller's point of
    /// view: an existing profile is not an error.
    pub async fn register(&self, expertise: &str, version: &str, project: &str) -> Result<()> {
        let (ai_id, name, nickname) = &self.credentials;
        let response = self
            .http
            .post(self.url("/api/agents/register"))
            .json(&json!({
                "ai_id": ai_id,
                "name": name,
                "nickname": nickname,
                "expertise": expertise,
                "version": version,
                "project": project,
            }))
            .send()
            .await?;

        match Self::parse::<Value>(response).await {
            Ok(_) => Ok(()),
            Err(ClientError::Api { status: 409, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Log in and cache the token pair.
    pub async fn login(&self) -> Result<Tokens> {
        let (ai_id, name, nickname) = &self.credentials;
        let response = self
            .http
            .post(self.url("/api/auth/login"))
            .json(&json!({
                "ai_id": ai_id,
                "ai_name": name,
                "ai_nickname": nickname,
            }))
            .send()
            .await?;

        let tokens: Tokens = Self::parse(response).await?;
        *self.tokens.lock() = Some(tokens.clone());
        tracing::info!(ai_id, "logged in");
        Ok(tokens)
    }

    /// Exchange the cached refresh token for a fresh pair.
    pub async fn refresh(&self) -> Result<Tokens> {
        let refresh_token = self.refresh_token().ok_or(ClientError::NotAuthenticated)?;
        let response = self
            .http
            .post(self.url("/api/auth/refresh"))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let tokens: Tokens = Self::parse(response).await?;
        *self.tokens.lock() = Some(tokens.clone());
        tracing::debug!("token pair refreshed");
        Ok(tokens)
    }

    /// Refresh, falling back to a full login when the refresh token is no
    /// longer accepted.
    pub async fn refresh_or_login(&self) -> Result<Tokens> {
        match self.refresh().await {
            Ok(tokens) => Ok(tokens),
            Err(ClientError::NotAuthenticated) | Err(ClientError::Api { .. }) => {
                tracing::info!("refresh failed, falling back to login");
                self.login().await
            }
            Err(e) => Err(e),
        }
    }

    /// Revoke every token for this agent and drop the cache.
    pub async fn logout(&self) -> Result<()> {
        let _: Value = self.post_authed("/api/auth/logout", &json!({})).await?;
        *self.tokens.lock() = None;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    pub async fn get_agent(&self, ai_id: i64) -> Result<AgentInfo> {
        self.get_authed(&format!("/api/agents/{ai_id}")).await
    }

    pub async fn list_agents(&self, limit: u32, offset: u32) -> Result<Vec<AgentInfo>> {
        self.get_authed(&format!("/api/agents?limit={limit}&offset={offset}"))
            .await
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    pub async fn send_message(
        &self,
        content: &Value,
        target_ai_id: Option<i64>,
        message_type: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<i64> {
        #[derive(Deserialize)]
        struct SendResponse {
            message_id: i64,
        }

        let mut body = json!({ "content": content });
        if let Some(target) = target_ai_id {
            body["target_ai_id"] = json!(target);
        }
        if let Some(mt) = message_type {
            body["message_type"] = json!(mt);
        }
        if let Some(meta) = metadata {
            body["metadata"] = meta.clone();
        }

        let response: SendResponse = self.post_authed("/api/messages/send", &body).await?;
        Ok(response.message_id)
    }

    pub async fn inbox(&self, limit: u32) -> Result<Vec<MessageRecord>> {
        self.get_authed(&format!("/api/messages/inbox?limit={limit}"))
            .await
    }

    pub async fn sent(&self, limit: u32) -> Result<Vec<MessageRecord>> {
        self.get_authed(&format!("/api/messages/sent?limit={limit}"))
            .await
    }

    // -----------------------------------------------------------------------
    // Work sessions
    // -----------------------------------------------------------------------

    pub async fn create_session(
        &self,
        session_type: &str,
        project: &str,
        metadata: Option<&Value>,
    ) -> Result<String> {
        #[derive(Deserialize)]
        struct CreateResponse {
            session_id: String,
        }

        let mut body = json!({ "session_type": session_type, "project": project });
        if let Some(meta) = metadata {
            body["metadata"] = meta.clone();
        }

        let response: CreateResponse = self.post_authed("/api/sessions", &body).await?;
        Ok(response.session_id)
    }

    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        let token = self.access_token().ok_or(ClientError::NotAuthenticated)?;
        let response = self
            .http
            .delete(self.url(&format!("/api/sessions/{session_id}")))
            .bearer_auth(token)
            .send()
            .await?;
        let _: Value = Self::parse(response).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Collaboration
    // -----------------------------------------------------------------------

    pub async fn request_collaboration(
        &self,
        target_ai_id: i64,
        request_type: &str,
        title: &str,
        description: &str,
    ) -> Result<String> {
        #[derive(Deserialize)]
        struct CollabResponse {
            collab_id: String,
        }

        let response: CollabResponse = self
            .post_authed(
                "/api/collab/request",
                &json!({
                    "target_ai_id": target_ai_id,
                    "request_type": request_type,
                    "title": title,
                    "description": description,
                }),
            )
            .await?;
        Ok(response.collab_id)
    }

    pub async fn list_collaborations(&self, limit: u32) -> Result<Value> {
        self.get_authed(&format!("/api/collab/list?limit={limit}"))
            .await
    }

    // -----------------------------------------------------------------------
    // Brain state
    // -----------------------------------------------------------------------

    /// Persist brain-state fields to the store. Returns the stored cycle
    /// count.
    pub async fn save_brain_state(&self, update: &Value) -> Result<i64> {
        #[derive(Deserialize)]
        struct SaveResponse {
            cycle_count: i64,
        }

        let response: SaveResponse = self.post_authed("/api/brain/save", update).await?;
        Ok(response.cycle_count)
    }

    pub async fn load_brain_state(&self) -> Result<Option<BrainStateRecord>> {
        self.get_authed("/api/brain/load").await
    }
}
