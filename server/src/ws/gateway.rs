//! Handshake checks that run before a connection is admitted to a room.

use std::sync::Arc;

use super::{RoomId, UserId};
use crate::auth::{Authenticator, TokenType};
use crate::db::{ResourceStore, UserDirectory};
use crate::error::CollabError;

/// A handshake that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub username: String,
}

/// Validates token, identity and room ownership, in that order.
///
/// The gateway never touches the room registry: it only decides. The caller
/// joins the registry after the upgrade, so a rejected handshake leaves the
/// registry untouched.
#[derive(Clone)]
pub struct SessionGateway {
    authenticator: Arc<dyn Authenticator>,
    users: Arc<dyn UserDirectory>,
    resources: Arc<dyn ResourceStore>,
}

impl SessionGateway {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        users: Arc<dyn UserDirectory>,
        resources: Arc<dyn ResourceStore>,
    ) -> Self {
        Self {
            authenticator,
            users,
            resources,
        }
    }

    /// Run the handshake for `room_id`. Blocking: the store is synchronous,
    /// so async callers should run this on the blocking pool.
    pub fn admit(&self, room_id: RoomId, token: Option<&str>) -> Result<Admission, CollabError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CollabError::Unauthenticated("missing token".into()))?;

        let claims = self
            .authenticator
            .decode(token)
            .map_err(|e| CollabError::Unauthenticated(e.to_string()))?;

        if claims.token_type != TokenType::Access {
            return Err(CollabError::Unauthenticated(format!(
                "expected access token, got {:?}",
                claims.token_type
            )));
        }

        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| CollabError::Unauthenticated(format!("bad subject {:?}", claims.sub)))?;

        let user = self
            .users
            .find_by_id(user_id)
            .map_err(|e| CollabError::Internal(e.to_string()))?
            .ok_or_else(|| CollabError::Unauthenticated(format!("unknown user {user_id}")))?;

        if !user.is_active {
            return Err(CollabError::Unauthenticated(format!("user {user_id} is inactive")));
        }

        let room = self
            .resources
            .find_room(room_id)
            .map_err(|e| CollabError::Internal(e.to_string()))?
            .ok_or(CollabError::NotFound(room_id))?;

        if room.owner_id != user.id {
            return Err(CollabError::Forbidden(room_id));
        }

        Ok(Admission {
            room_id,
            user_id: user.id,
            username: user.username,
        })
    }
}
