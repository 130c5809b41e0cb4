//! Read-only presence endpoint for sheets.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::ws::registry::Presence;
use crate::ws::RoomId;

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub sheet_id: RoomId,
    pub active_users: Vec<Presence>,
    /// Live connections, which can exceed `active_users` when a user has several tabs open.
    pub connections: usize,
}

/// GET /api/sheets/{id}/presence: who is currently in a sheet. JWT auth required;
/// the caller must own the sheet.
pub async fn get_sheet_presence(
    State(state): State<AppState>,
    claims: Claims,
    Path(sheet_id): Path<RoomId>,
) -> Result<Json<PresenceResponse>, (StatusCode, String)> {
    let resources = state.resources.clone();
    let user_id = claims.user_id;

    let sheet = tokio::task::spawn_blocking(move || resources.find_room_owned_by(sheet_id, user_id))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))?
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    if sheet.is_none() {
        return Err((StatusCode::NOT_FOUND, "Sheet not found".to_string()));
    }

    Ok(Json(PresenceResponse {
        sheet_id,
        active_users: state.rooms.members_of(sheet_id),
        connections: state.rooms.member_count(sheet_id),
    }))
}
