pub mod jwt;
pub mod middleware;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Access tokens open sessions; refresh tokens only mint new access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Decoded token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id, as a decimal string
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Verifies bearer tokens. Signature and expiry checks happen here; the
/// token type check is left to the caller.
pub trait Authenticator: Send + Sync {
    fn decode(&self, token: &str) -> Result<TokenClaims, AuthError>;
}
