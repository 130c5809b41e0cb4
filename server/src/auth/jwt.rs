use std::path::Path;

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

use super::{AuthError, Authenticator, TokenClaims, TokenType};
use crate::ws::UserId;

/// Load or generate the JWT signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// HS256 token issuer and verifier.
#[derive(Clone)]
pub struct JwtAuthenticator {
    secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtAuthenticator {
    /// Defaults: 30-minute access tokens, 7-day refresh tokens.
    pub fn new(secret: Vec<u8>) -> Self {
        Self::with_ttls(secret, Duration::minutes(30), Duration::days(7))
    }

    pub fn with_ttls(secret: Vec<u8>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            secret,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn issue_access_token(&self, user_id: UserId) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue(user_id, TokenType::Access, self.access_ttl)
    }

    pub fn issue_refresh_token(&self, user_id: UserId) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue(user_id, TokenType::Refresh, self.refresh_ttl)
    }

    fn issue(
        &self,
        user_id: UserId,
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            token_type,
        };
        encode(
            &Header::default(), // HS256
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
    }
}

impl Authenticator for JwtAuthenticator {
    fn decode(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<TokenClaims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(err.to_string()),
            })
    }
}

impl std::fmt::Debug for JwtAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthenticator")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> JwtAuthenticator {
        JwtAuthenticator::new(vec![7u8; 32])
    }

    #[test]
    fn test_access_token_round_trip() {
        let auth = authenticator();
        let token = auth.issue_access_token(12).unwrap();
        let claims = auth.decode(&token).unwrap();
        assert_eq!(claims.sub, "12");
        assert_eq!(claims.token_type, TokenType::Access);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_refresh_token_has_refresh_type() {
        let auth = authenticator();
        let token = auth.issue_refresh_token(12).unwrap();
        assert_eq!(auth.decode(&token).unwrap().token_type, TokenType::Refresh);
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = authenticator().issue_access_token(1).unwrap();
        let other = JwtAuthenticator::new(vec![8u8; 32]);
        assert!(matches!(other.decode(&token), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn test_expired_token() {
        let auth = JwtAuthenticator::with_ttls(vec![7u8; 32], Duration::hours(-2), Duration::days(7));
        let token = auth.issue_access_token(1).unwrap();
        assert!(matches!(auth.decode(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_garbage_token_is_invalid() {
        assert!(matches!(
            authenticator().decode("not-a-jwt"),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn test_secret_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        let first = load_or_generate_jwt_secret(data_dir).unwrap();
        let second = load_or_generate_jwt_secret(data_dir).unwrap();
        assert_eq!(first.len(), 32);
        assert_eq!(first, second);
    }
}
