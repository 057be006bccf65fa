//! Shared utility functions for the web client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::contacts::LedgerError;
use crate::gateway::GatewayError;
use crate::model::Persistence;
use crate::session::SessionError;
use crate::web_client::state::AppState;

/// Build a standard JSON error response.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, axum::Json(body)).into_response()
}

/// The signed-in user's id, or a 401 response.
pub fn require_owner(state: &AppState) -> Result<String, Response> {
    state
        .session
        .identity()
        .map(|identity| identity.id.clone())
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "not signed in"))
}

pub fn persistence_json(persistence: &Persistence) -> serde_json::Value {
    serde_json::to_value(persistence).unwrap_or(serde_json::Value::Null)
}

fn gateway_status(e: &GatewayError) -> StatusCode {
    match e {
        GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
        GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::Conflict(_) => StatusCode::CONFLICT,
        GatewayError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Schema(_) | GatewayError::Decode(_) | GatewayError::Rejected { .. } => {
            StatusCode::BAD_GATEWAY
        }
    }
}

pub fn session_error(e: &SessionError) -> Response {
    let status = match e {
        SessionError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        SessionError::InvalidInput(_) | SessionError::SelfTransfer => StatusCode::BAD_REQUEST,
        SessionError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::RecipientNotFound => StatusCode::NOT_FOUND,
        SessionError::Gateway(g) => gateway_status(g),
        SessionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}

pub fn ledger_error(e: &LedgerError) -> Response {
    let status = match e {
        LedgerError::InvalidInput(_) | LedgerError::InvalidAmount | LedgerError::SameWallet => {
            StatusCode::BAD_REQUEST
        }
        LedgerError::DuplicateAddress => StatusCode::CONFLICT,
        LedgerError::ContactNotFound(_) | LedgerError::UnknownWallet(_) => StatusCode::NOT_FOUND,
        LedgerError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        LedgerError::Gateway(g) => gateway_status(g),
        LedgerError::Storage(_) | LedgerError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}
