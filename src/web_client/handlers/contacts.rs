//! Contact management handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::model::{ContactUpdate, NewContact, Persistence};
use crate::web_client::state::{AppState, SharedState};
use crate::web_client::utils::{ledger_error, persistence_json, require_owner};

#[derive(Deserialize)]
pub struct ListContactsQuery {
    search: Option<String>,
}

/// Make sure the ledger holds the owner's contacts before a mutation that
/// looks one up by id.
fn ensure_loaded(st: &mut AppState, owner_id: &str) -> Result<(), Response> {
    if !st.contacts.contacts().is_empty() {
        return Ok(());
    }
    st.contacts
        .fetch_contacts(&st.storage, owner_id)
        .map(|_| ())
        .map_err(|e| ledger_error(&e))
}

/// GET /api/contacts?search= - Fetch contacts, optionally filtered by name
/// or address.
pub async fn list_contacts_handler(
    State(state): State<SharedState>,
    Query(params): Query<ListContactsQuery>,
) -> Response {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    let owner_id = match require_owner(st) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let persistence = match st.contacts.fetch_contacts(&st.storage, &owner_id) {
        Ok(outcome) => outcome.persistence,
        Err(e) => return ledger_error(&e),
    };
    let contacts = st.contacts.search(params.search.as_deref().unwrap_or(""));

    let json = serde_json::json!({
        "contacts": contacts,
        "persistence": persistence_json(&persistence),
    });
    (StatusCode::OK, axum::Json(json)).into_response()
}

/// POST /api/contacts
pub async fn add_contact_handler(
    State(state): State<SharedState>,
    axum::Json(req): axum::Json<NewContact>,
) -> Response {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    let owner_id = match require_owner(st) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Err(resp) = ensure_loaded(st, &owner_id) {
        return resp;
    }

    match st.contacts.add_contact(&st.storage, &owner_id, req) {
        Ok(outcome) => {
            let json = serde_json::json!({
                "contact": outcome.value,
                "persistence": persistence_json(&outcome.persistence),
            });
            (StatusCode::CREATED, axum::Json(json)).into_response()
        }
        Err(e) => ledger_error(&e),
    }
}

/// PUT /api/contacts/:id
pub async fn update_contact_handler(
    State(state): State<SharedState>,
    Path(contact_id): Path<String>,
    axum::Json(req): axum::Json<ContactUpdate>,
) -> Response {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    let owner_id = match require_owner(st) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Err(resp) = ensure_loaded(st, &owner_id) {
        return resp;
    }

    match st.contacts.update_contact(&st.storage, &contact_id, req) {
        Ok(outcome) => contact_response(outcome.value, &outcome.persistence),
        Err(e) => ledger_error(&e),
    }
}

/// DELETE /api/contacts/:id
pub async fn delete_contact_handler(
    State(state): State<SharedState>,
    Path(contact_id): Path<String>,
) -> Response {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    let owner_id = match require_owner(st) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Err(resp) = ensure_loaded(st, &owner_id) {
        return resp;
    }

    match st.contacts.delete_contact(&st.storage, &contact_id) {
        Ok(outcome) => {
            let json = serde_json::json!({
                "status": "ok",
                "id": contact_id,
                "persistence": persistence_json(&outcome.persistence),
            });
            (StatusCode::OK, axum::Json(json)).into_response()
        }
        Err(e) => ledger_error(&e),
    }
}

/// POST /api/contacts/:id/favorite - Flip the favourite flag.
pub async fn toggle_favorite_handler(
    State(state): State<SharedState>,
    Path(contact_id): Path<String>,
) -> Response {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    let owner_id = match require_owner(st) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Err(resp) = ensure_loaded(st, &owner_id) {
        return resp;
    }

    match st.contacts.toggle_favorite(&st.storage, &contact_id) {
        Ok(outcome) => contact_response(outcome.value, &outcome.persistence),
        Err(e) => ledger_error(&e),
    }
}

fn contact_response(contact: crate::model::Contact, persistence: &Persistence) -> Response {
    let json = serde_json::json!({
        "contact": contact,
        "persistence": persistence_json(persistence),
    });
    (StatusCode::OK, axum::Json(json)).into_response()
}
