//! Health check endpoint.

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::web_client::state::SharedState;

pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let state = state.lock().await;
    let body = serde_json::json!({
        "status": "ok",
        "gateway": state.gateway_kind,
        "signed_in": state.session.is_authenticated(),
        "notifications_listening": state.notifications.is_listening(),
        "ws_connections": state.ws_connection_count.load(Ordering::Relaxed),
    });
    (StatusCode::OK, axum::Json(body))
}
