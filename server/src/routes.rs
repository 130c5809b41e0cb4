use axum::{middleware, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::auth::middleware::TokenVerifier;
use crate::presence;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the token verifier into request extensions so the Claims extractor can find it.
async fn inject_token_verifier(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(TokenVerifier(state.authenticator.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route(
        "/ws/collaborate/{sheet_id}",
        get(ws_handler::ws_upgrade),
    );

    // Authenticated routes (JWT required, Claims extractor validates token)
    let sheet_routes = Router::new().route(
        "/api/sheets/{id}/presence",
        get(presence::get_sheet_presence),
    );

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(sheet_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_token_verifier,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
