//! Transfer handlers: moves between the owner's wallets and sends to other
//! registered users.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::model::{Amount, WalletEndpoint, MAIN_WALLET_ID};
use crate::web_client::state::{AppState, SharedState};
use crate::web_client::utils::{ledger_error, persistence_json, require_owner, session_error};

#[derive(Deserialize)]
pub struct TransferRequest {
    from_wallet_id: String,
    to_wallet_id: String,
    amount: Amount,
    description: Option<String>,
}

#[derive(Deserialize)]
pub struct SendRequest {
    recipient_wallet: String,
    amount: Amount,
    description: Option<String>,
}

/// GET /api/transfers - The local transfer log, newest first.
pub async fn list_transfers_handler(State(state): State<SharedState>) -> Response {
    let st = state.lock().await;
    let owner_id = match require_owner(&st) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match st.contacts.transactions(&st.storage, &owner_id) {
        Ok(transfers) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "transfers": transfers })),
        )
            .into_response(),
        Err(e) => ledger_error(&e),
    }
}

fn endpoint_balance(st: &AppState, endpoint: &WalletEndpoint) -> Option<Amount> {
    match endpoint {
        WalletEndpoint::Main => st.session.identity().map(|i| i.balance),
        WalletEndpoint::Contact(id) => st
            .contacts
            .contacts()
            .iter()
            .find(|c| &c.id == id)
            .map(|c| c.balance),
    }
}

/// POST /api/transfers - Move funds between the main wallet and contacts.
pub async fn create_transfer_handler(
    State(state): State<SharedState>,
    axum::Json(req): axum::Json<TransferRequest>,
) -> Response {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    let owner_id = match require_owner(st) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if st.contacts.contacts().is_empty() {
        if let Err(e) = st.contacts.fetch_contacts(&st.storage, &owner_id) {
            return ledger_error(&e);
        }
    }

    let AppState {
        storage,
        session,
        contacts,
        ..
    } = &mut *st;
    let outcome = match contacts.transfer_funds(
        storage,
        session,
        &owner_id,
        &req.from_wallet_id,
        &req.to_wallet_id,
        req.amount,
        req.description.as_deref(),
    ) {
        Ok(outcome) => outcome,
        Err(e) => return ledger_error(&e),
    };

    for wallet_id in [&outcome.value.from_wallet_id, &outcome.value.to_wallet_id] {
        if let Some(balance) = endpoint_balance(st, &WalletEndpoint::parse(wallet_id)) {
            st.broadcast_balance(wallet_id, balance);
        }
    }

    let json = serde_json::json!({
        "transfer": outcome.value,
        "persistence": persistence_json(&outcome.persistence),
        "balance": st.session.identity().map(|i| i.balance),
    });
    (StatusCode::CREATED, axum::Json(json)).into_response()
}

/// POST /api/send - Send funds to another registered user's wallet.
pub async fn send_money_handler(
    State(state): State<SharedState>,
    axum::Json(req): axum::Json<SendRequest>,
) -> Response {
    let mut guard = state.lock().await;
    let st = &mut *guard;
    if let Err(resp) = require_owner(st) {
        return resp;
    }

    match st.session.send_money(
        &st.storage,
        &req.recipient_wallet,
        req.amount,
        req.description.as_deref(),
    ) {
        Ok(sent) => {
            st.broadcast_balance(MAIN_WALLET_ID, sent.new_balance);
            let json = serde_json::json!({
                "transaction_id": sent.transaction_id,
                "receiver_id": sent.receiver_id,
                "amount": sent.amount,
                "balance": sent.new_balance,
            });
            (StatusCode::CREATED, axum::Json(json)).into_response()
        }
        Err(e) => session_error(&e),
    }
}
