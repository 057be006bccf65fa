//! Registration, login, logout and session handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::web_client::state::{AppState, SharedState};
use crate::web_client::utils::session_error;

#[derive(Deserialize)]
pub struct RegisterRequest {
    email: String,
    password: String,
    #[serde(default)]
    full_name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

/// Load contacts and start the incoming-transfer feed for the signed-in
/// user. Failures are logged; the session stays valid.
fn start_user_services(st: &mut AppState) {
    let Some(user_id) = st.session.identity().map(|i| i.id.clone()) else {
        return;
    };
    let AppState {
        storage,
        contacts,
        notifications,
        gateway,
        ..
    } = st;
    if let Err(e) = contacts.fetch_contacts(storage, &user_id) {
        crate::wlog!("login: could not load contacts: {}", e);
    }
    if let Err(e) = notifications.start(Arc::clone(gateway), &user_id) {
        crate::wlog!("login: notifications unavailable: {}", e);
    }
}

/// POST /api/auth/register - Create an account (does not sign in).
pub async fn register_handler(
    State(state): State<SharedState>,
    axum::Json(req): axum::Json<RegisterRequest>,
) -> Response {
    let mut st = state.lock().await;
    match st.session.register(&req.email, &req.password, req.full_name.trim()) {
        Ok(()) => (
            StatusCode::CREATED,
            axum::Json(serde_json::json!({ "status": "ok" })),
        )
            .into_response(),
        Err(e) => session_error(&e),
    }
}

/// POST /api/auth/login
pub async fn login_handler(
    State(state): State<SharedState>,
    axum::Json(req): axum::Json<LoginRequest>,
) -> Response {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    let identity = match st.session.login(&st.storage, &req.email, &req.password) {
        Ok(identity) => identity.clone(),
        Err(e) => return session_error(&e),
    };
    start_user_services(st);

    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "identity": identity })),
    )
        .into_response()
}

/// POST /api/auth/logout
pub async fn logout_handler(State(state): State<SharedState>) -> Response {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    if let Err(e) = st.session.logout(&st.storage) {
        return session_error(&e);
    }
    st.contacts.clear();
    st.notifications.cleanup();
    st.notifications.clear();

    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "status": "ok" })),
    )
        .into_response()
}

/// GET /api/session - Resolve the current identity.
pub async fn session_handler(State(state): State<SharedState>) -> Response {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    let identity = match st.session.resolve_session(&st.storage) {
        Ok(identity) => identity.cloned(),
        Err(e) => return session_error(&e),
    };
    if identity.is_some() && !st.notifications.is_listening() {
        start_user_services(st);
    }

    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "authenticated": identity.is_some(),
            "identity": identity,
        })),
    )
        .into_response()
}
