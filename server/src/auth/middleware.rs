use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use std::sync::Arc;

use super::{Authenticator, TokenType};
use crate::ws::UserId;

/// Authenticated caller extracted from `Authorization: Bearer <token>`.
/// Only access tokens are accepted.
#[derive(Debug, Clone)]
pub struct Claims {
    pub user_id: UserId,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Set by the middleware layer in routes.rs
        let verifier = parts
            .extensions
            .get::<TokenVerifier>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        let claims = verifier
            .0
            .decode(token)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        if claims.token_type != TokenType::Access {
            return Err(StatusCode::UNAUTHORIZED);
        }

        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        Ok(Claims {
            user_id,
            exp: claims.exp,
        })
    }
}

/// Token verifier stored in request extensions for the Claims extractor.
#[derive(Clone)]
pub struct TokenVerifier(pub Arc<dyn Authenticator>);
