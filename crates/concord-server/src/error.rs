//! Server-side error taxonomy and its HTTP mapping.
//!
//! Every rejected request yields a JSON body with a stable `error` code
//! string so clients can branch programmatically; the human-readable
//! `message` is advisory only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use concord_shared::error::TokenError;
use concord_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid / expired / revoked token, or no token at all.
    #[error("Unauthorized: {0}")]
    Unauthorized(TokenError),

    #[error("Missing bearer token")]
    MissingToken,

    /// Role insufficient for the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The request referenced an agent id with no registered profile.
    #[error("Unknown agent")]
    UnknownAgent,

    #[error("Rate limit exceeded")]
    RateLimited,

    /// Transient store failure; the client may retry.
    #[error("Store temporarily unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Stable code string used in HTTP bodies and stream `error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Unauthorized(e) => e.code(),
            ServerError::MissingToken => "unauthorized",
            ServerError::Forbidden(_) => "forbidden",
            ServerError::NotFound => "not_found",
            ServerError::Conflict(_) => "conflict",
            ServerError::BadRequest(_) => "bad_request",
            ServerError::UnknownAgent => "unknown_agent",
            ServerError::RateLimited => "too_many_requests",
            ServerError::StoreUnavailable(_) => "store_unavailable",
            ServerError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServerError::Unauthorized(_) | ServerError::MissingToken => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::BadRequest(_) | ServerError::UnknownAgent => StatusCode::BAD_REQUEST,
            ServerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ServerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TokenError> for ServerError {
    fn from(e: TokenError) -> Self {
        ServerError::Unauthorized(e)
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound,
            StoreError::Conflict => ServerError::Conflict("record already exists".into()),
            StoreError::ForeignKey => ServerError::UnknownAgent,
            StoreError::Invalid(msg) => ServerError::BadRequest(msg.into()),
            StoreError::Sqlite(ref inner) => {
                // Busy / locked databases are retryable; anything else is a
                // server fault.
                let msg = inner.to_string();
                if msg.contains("locked") || msg.contains("busy") {
                    ServerError::StoreUnavailable(msg)
                } else {
                    ServerError::Internal(e.to_string())
                }
            }
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Internal details stay out of responses.
            ServerError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": self.code(),
            "message": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::Unauthorized(TokenError::Expired).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ServerError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ServerError::Conflict("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServerError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::RateLimited.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_token_error_codes() {
        assert_eq!(
            ServerError::Unauthorized(TokenError::Expired).code(),
            "expired_token"
        );
        assert_eq!(
            ServerError::Unauthorized(TokenError::Revoked).code(),
            "revoked_token"
        );
        assert_eq!(
            ServerError::Unauthorized(TokenError::InvalidSignature).code(),
            "invalid_token"
        );
    }

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            ServerError::from(StoreError::NotFound),
            ServerError::NotFound
        ));
        assert!(matches!(
            ServerError::from(StoreError::ForeignKey),
            ServerError::UnknownAgent
        ));
        assert!(matches!(
            ServerError::from(StoreError::Conflict),
            ServerError::Conflict(_)
        ));
    }
}
