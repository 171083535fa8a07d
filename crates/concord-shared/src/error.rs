use thiserror::Error;

/// Token verification failures. These map 1:1 onto the stable error code
/// strings surfaced to clients.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token is structurally malformed")]
    Malformed,

    #[error("Token signature is invalid")]
    InvalidSignature,

    #[error("Token is expired")]
    Expired,

    #[error("Token has been revoked")]
    Revoked,

    #[error("Wrong token type for this operation")]
    WrongType,

    #[error("Invalid signing key")]
    InvalidKey,
}

impl TokenError {
    /// Stable code string for wire errors.
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::Malformed | TokenError::InvalidSignature | TokenError::InvalidKey => {
                "invalid_token"
            }
            TokenError::Expired => "expired_token",
            TokenError::Revoked => "revoked_token",
            TokenError::WrongType => "wrong_token_type",
        }
    }
}
