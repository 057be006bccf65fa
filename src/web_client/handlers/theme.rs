//! Theme preference handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::web_client::state::SharedState;
use crate::web_client::utils::api_error;

/// GET /api/theme
pub async fn get_theme_handler(State(state): State<SharedState>) -> Response {
    let st = state.lock().await;
    let json = serde_json::json!({ "dark_mode": st.theme.dark_mode() });
    (StatusCode::OK, axum::Json(json)).into_response()
}

/// POST /api/theme/toggle
pub async fn toggle_theme_handler(State(state): State<SharedState>) -> Response {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    match st.theme.toggle(&st.storage) {
        Ok(dark_mode) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "dark_mode": dark_mode })),
        )
            .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
