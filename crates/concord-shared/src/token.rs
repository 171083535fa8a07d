//! Compact symmetric tokens.
//!
//! A token is `base64url(payload_json) . base64url(signature)` where the
//! signature is a BLAKE3 keyed hash of the payload bytes. The signing key
//! is process-wide and stable across restarts, so outstanding tokens
//! survive a hub restart.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{KDF_CONTEXT_TOKEN_KEY, SIGNING_KEY_SIZE};
use crate::error::TokenError;
use crate::types::AgentId;

/// Key for BLAKE3 keyed-hash token signatures.
pub type SigningKey = [u8; SIGNING_KEY_SIZE];

/// Generate a random signing key.
pub fn generate_signing_key() -> SigningKey {
    use rand::RngCore;
    let mut key = [0u8; SIGNING_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Derive a stable signing key from a passphrase (BLAKE3 KDF with domain
/// separation). Used when no explicit key is configured, so that the same
/// passphrase always yields the same key.
pub fn derive_signing_key(passphrase: &[u8]) -> SigningKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_TOKEN_KEY);
    hasher.update(passphrase);
    let hash = hasher.finalize();
    let mut key = [0u8; SIGNING_KEY_SIZE];
    key.copy_from_slice(&hash.as_bytes()[..SIGNING_KEY_SIZE]);
    key
}

/// Parse a 64-character hex string into a signing key.
pub fn signing_key_from_hex(s: &str) -> Result<SigningKey, TokenError> {
    let bytes = hex::decode(s.trim()).map_err(|_| TokenError::InvalidKey)?;
    if bytes.len() != SIGNING_KEY_SIZE {
        return Err(TokenError::InvalidKey);
    }
    let mut key = [0u8; SIGNING_KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Which of the two token classes a token belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Access => f.write_str("access"),
            TokenType::Refresh => f.write_str("refresh"),
        }
    }
}

/// Signed token payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenPayload {
    pub ai_id: AgentId,
    pub ai_name: String,
    pub ai_nickname: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Issued-at (unix timestamp, seconds).
    pub iat: i64,
    /// Expiry (unix timestamp, seconds). The bound is closed: a token is
    /// expired the instant `now >= exp`.
    pub exp: i64,
}

impl TokenPayload {
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Sign a payload into its compact wire form.
pub fn sign(key: &SigningKey, payload: &TokenPayload) -> Result<String, TokenError> {
    let body = serde_json::to_vec(payload).map_err(|_| TokenError::Malformed)?;
    let sig = blake3::keyed_hash(key, &body);

    let mut token = String::new();
    token.push_str(&URL_SAFE_NO_PAD.encode(&body));
    token.push('.');
    token.push_str(&URL_SAFE_NO_PAD.encode(sig.as_bytes()));
    Ok(token)
}

/// Verify signature and expiry, returning the decoded payload.
///
/// Checks run in order: structure → signature → expiry. Type matching and
/// revocation are the caller's concern (they need the store).
pub fn verify(key: &SigningKey, token: &str, now: DateTime<Utc>) -> Result<TokenPayload, TokenError> {
    let (body_b64, sig_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;

    let body = URL_SAFE_NO_PAD
        .decode(body_b64)
        .map_err(|_| TokenError::Malformed)?;
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| TokenError::Malformed)?;
    let sig: [u8; 32] = sig_bytes.try_into().map_err(|_| TokenError::Malformed)?;

    // blake3::Hash equality is constant-time.
    let expected = blake3::keyed_hash(key, &body);
    if expected != blake3::Hash::from(sig) {
        return Err(TokenError::InvalidSignature);
    }

    let payload: TokenPayload = serde_json::from_slice(&body).map_err(|_| TokenError::Malformed)?;

    if now.timestamp() >= payload.exp {
        return Err(TokenError::Expired);
    }

    Ok(payload)
}
