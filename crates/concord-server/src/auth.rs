//! Token Authority: the only trusted oracle for "is this client who it
//! says it is".
//!
//! Issues access/refresh pairs, verifies presented tokens, refreshes, and
//! revokes. Pairs are persisted so revocation works across restarts; the
//! signing key itself is process-wide and stable across restarts.

use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;

use concord_shared::constants::{ACCESS_TTL_SECS, REFRESH_TTL_SECS};
use concord_shared::error::TokenError;
use concord_shared::token::{self, SigningKey, TokenPayload, TokenType};
use concord_shared::types::AgentId;
use concord_store::{Database, StoreError};

use crate::error::ServerError;

/// A freshly issued pair, as returned to clients.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_in: i64,
    pub refresh_expires_in: i64,
}

pub struct TokenAuthority {
    key: SigningKey,
    db: Arc<Mutex<Database>>,
}

impl TokenAuthority {
    pub fn new(key: SigningKey, db: Arc<Mutex<Database>>) -> Arc<Self> {
        Arc::new(Self { key, db })
    }

    /// Issue a new pair for a registered agent.
    ///
    /// The caller is responsible for having checked that the profile
    /// exists; issuing for an unknown id is rejected here as well since
    /// the insert would violate the foreign key.
    pub fn issue(
        &self,
        ai_id: AgentId,
        ai_name: &str,
        ai_nickname: &str,
    ) -> Result<IssuedTokens, ServerError> {
        let now = Utc::now();
        let access_expires_at = now + Duration::seconds(ACCESS_TTL_SECS);
        let refresh_expires_at = now + Duration::seconds(REFRESH_TTL_SECS);

        let access_payload = TokenPayload {
            ai_id,
            ai_name: ai_name.to_string(),
            ai_nickname: ai_nickname.to_string(),
            token_type: TokenType::Access,
            iat: now.timestamp(),
            exp: access_expires_at.timestamp(),
        };
        let refresh_payload = TokenPayload {
            token_type: TokenType::Refresh,
            exp: refresh_expires_at.timestamp(),
            ..access_payload.clone()
        };

        let access_token = token::sign(&self.key, &access_payload)
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        let refresh_token = token::sign(&self.key, &refresh_payload)
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        self.db.lock().insert_token_pair(
            &access_token,
            &refresh_token,
            ai_id,
            now,
            access_expires_at,
            refresh_expires_at,
        )?;

        tracing::debug!(ai_id = %ai_id, "issued token pair");

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            access_expires_in: ACCESS_TTL_SECS,
            refresh_expires_in: REFRESH_TTL_SECS,
        })
    }

    /// Verify a token end to end: signature → unexpired → expected type →
    /// not revoked.
    ///
    /// A token whose row is missing from the store is accepted as long as
    /// the structural checks pass (tolerance for test flows; a revoked row
    /// always wins).
    pub fn verify(&self, token: &str, expect: TokenType) -> Result<TokenPayload, TokenError> {
        let payload = token::verify(&self.key, token, Utc::now())?;

        if payload.token_type != expect {
            return Err(TokenError::WrongType);
        }

        let row = {
            let db = self.db.lock();
            match expect {
                TokenType::Access => db.find_by_access(token),
                TokenType::Refresh => db.find_by_refresh(token),
            }
        };

        match row {
            Ok(Some(pair)) if pair.is_revoked => Err(TokenError::Revoked),
            Ok(_) => Ok(payload),
            Err(e) => {
                // A store hiccup must not grant access.
                tracing::error!(error = %e, "token revocation lookup failed");
                Err(TokenError::Revoked)
            }
        }
    }

    /// Verify a refresh token and mint a fresh pair.
    ///
    /// The consumed refresh token is intentionally NOT rotated out; it
    /// stays valid until expiry unless explicitly revoked.
    pub fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, ServerError> {
        let payload = self.verify(refresh_token, TokenType::Refresh)?;
        self.issue(payload.ai_id, &payload.ai_name, &payload.ai_nickname)
    }

    /// Revoke a single token (either half revokes the pair). Idempotent.
    pub fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        self.db.lock().revoke_token(token)
    }

    /// Revoke every outstanding pair for an agent. Idempotent.
    pub fn revoke_all(&self, ai_id: AgentId) -> Result<usize, StoreError> {
        self.db.lock().revoke_all_for_agent(ai_id)
    }

    /// Remove rows past both expirations. Returns the count removed.
    pub fn sweep_expired(&self) -> Result<usize, StoreError> {
        self.db.lock().sweep_expired_tokens(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_shared::token::generate_signing_key;
    use concord_store::agents::new_profile;

    fn authority() -> Arc<TokenAuthority> {
        let db = Database::open_in_memory().unwrap();
        db.create_agent(&new_profile(10, "analyst", "ana", "apollo"))
            .unwrap();
        TokenAuthority::new(generate_signing_key(), Arc::new(Mutex::new(db)))
    }

    #[test]
    fn test_issue_and_verify() {
        let auth = authority();
        let tokens = auth.issue(AgentId(10), "analyst", "ana").unwrap();

        let payload = auth
            .verify(&tokens.access_token, TokenType::Access)
            .unwrap();
        assert_eq!(payload.ai_id, AgentId(10));
        assert_eq!(payload.token_type, TokenType::Access);
    }

    #[test]
    fn test_wrong_type_rejected() {
        let auth = authority();
        let tokens = auth.issue(AgentId(10), "analyst", "ana").unwrap();

        assert!(matches!(
            auth.verify(&tokens.access_token, TokenType::Refresh),
            Err(TokenError::WrongType)
        ));
        assert!(matches!(
            auth.verify(&tokens.refresh_token, TokenType::Access),
            Err(TokenError::WrongType)
        ));
    }

    #[test]
    fn test_issue_for_unknown_agent_fails() {
        let auth = authority();
        let err = auth.issue(AgentId(99), "ghost", "g").unwrap_err();
        assert!(matches!(err, ServerError::UnknownAgent));
    }

    #[test]
    fn test_revoke_then_verify_is_revoked() {
        let auth = authority();
        let tokens = auth.issue(AgentId(10), "analyst", "ana").unwrap();

        auth.revoke(&tokens.access_token).unwrap();
        assert!(matches!(
            auth.verify(&tokens.access_token, TokenType::Access),
            Err(TokenError::Revoked)
        ));
        // The pair is revoked as a unit.
        assert!(matches!(
            auth.verify(&tokens.refresh_token, TokenType::Refresh),
            Err(TokenError::Revoked)
        ));
    }

    #[test]
    fn test_revoke_all_then_new_login_is_independent() {
        let auth = authority();
        let first = auth.issue(AgentId(10), "analyst", "ana").unwrap();
        auth.revoke_all(AgentId(10)).unwrap();

        let second = auth.issue(AgentId(10), "analyst", "ana").unwrap();
        assert_ne!(first.access_token, second.access_token);
        assert!(auth.verify(&second.access_token, TokenType::Access).is_ok());
        assert!(matches!(
            auth.verify(&first.access_token, TokenType::Access),
            Err(TokenError::Revoked)
        ));
    }

    #[test]
    fn test_unknown_but_valid_token_accepted() {
        let auth = authority();
        let tokens = auth.issue(AgentId(10), "analyst", "ana").unwrap();

        // Drop the persisted rows entirely; structural checks still pass.
        {
            let db = auth.db.lock();
            db.conn().execute("DELETE FROM tokens", []).unwrap();
        }
        assert!(auth.verify(&tokens.access_token, TokenType::Access).is_ok());
    }

    #[test]
    fn test_refresh_does_not_rotate_old_refresh() {
        let auth = authority();
        let first = auth.issue(AgentId(10), "analyst", "ana").unwrap();

        let second = auth.refresh(&first.refresh_token).unwrap();
        assert_ne!(first.access_token, second.access_token);

        // The consumed refresh token keeps working until revoked.
        assert!(auth.refresh(&first.refresh_token).is_ok());
    }

    #[test]
    fn test_garbage_token_invalid() {
        let auth = authority();
        assert!(matches!(
            auth.verify("garbage", TokenType::Access),
            Err(TokenError::Malformed)
        ));
    }
}
