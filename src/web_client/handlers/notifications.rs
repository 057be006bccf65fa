//! Notification handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::web_client::state::SharedState;
use crate::web_client::utils::{api_error, require_owner};

/// GET /api/notifications - Session notifications, newest first.
pub async fn list_notifications_handler(State(state): State<SharedState>) -> Response {
    let st = state.lock().await;
    if let Err(resp) = require_owner(&st) {
        return resp;
    }
    let json = serde_json::json!({
        "notifications": st.notifications.list(),
        "unread_count": st.notifications.unread_count(),
        "permission": st.notifications.permission(),
    });
    (StatusCode::OK, axum::Json(json)).into_response()
}

/// POST /api/notifications/:id/read - Mark a notification as read.
pub async fn mark_read_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Response {
    let st = state.lock().await;
    if let Err(resp) = require_owner(&st) {
        return resp;
    }
    if !st.notifications.list().iter().any(|n| n.id == id) {
        return api_error(StatusCode::NOT_FOUND, "notification not found");
    }
    let changed = st.notifications.mark_as_read(&id);
    let json = serde_json::json!({
        "status": "ok",
        "id": id,
        "changed": changed,
        "unread_count": st.notifications.unread_count(),
    });
    (StatusCode::OK, axum::Json(json)).into_response()
}

/// POST /api/notifications/read-all - Mark all notifications as read.
pub async fn mark_all_read_handler(State(state): State<SharedState>) -> Response {
    let st = state.lock().await;
    if let Err(resp) = require_owner(&st) {
        return resp;
    }
    let json = serde_json::json!({
        "status": "ok",
        "marked_read": st.notifications.mark_all_as_read(),
    });
    (StatusCode::OK, axum::Json(json)).into_response()
}

/// POST /api/notifications/permission - Ask for platform notification
/// permission if it has not been decided.
pub async fn request_permission_handler(State(state): State<SharedState>) -> Response {
    let st = state.lock().await;
    if let Err(resp) = require_owner(&st) {
        return resp;
    }
    let json = serde_json::json!({
        "permission": st.notifications.request_permission(),
    });
    (StatusCode::OK, axum::Json(json)).into_response()
}
