//! Live wallet feed over WebSocket.
//!
//! A client first receives a `snapshot` of the signed-in wallet, then every
//! `balance_changed` and `notification` event as it happens.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::broadcast::error::RecvError;

use crate::web_client::config::MAX_WS_CONNECTIONS;
use crate::web_client::state::{SharedState, WsEvent};
use crate::web_client::utils::api_error;

/// GET /api/ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    let slot = {
        let st = state.lock().await;
        FeedSlot::claim(&st.ws_connection_count)
    };
    let Some(slot) = slot else {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("too many WebSocket connections (max {MAX_WS_CONNECTIONS})"),
        );
    };

    ws.on_upgrade(move |socket| wallet_feed(socket, state, slot))
        .into_response()
}

/// One counted feed connection; released on drop.
struct FeedSlot(Arc<AtomicUsize>);

impl FeedSlot {
    fn claim(count: &Arc<AtomicUsize>) -> Option<Self> {
        count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < MAX_WS_CONNECTIONS).then_some(n + 1)
            })
            .ok()
            .map(|_| FeedSlot(Arc::clone(count)))
    }
}

impl Drop for FeedSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn wallet_feed(mut socket: WebSocket, state: SharedState, _slot: FeedSlot) {
    // Subscribe before taking the snapshot so nothing falls between them.
    let (mut events, snapshot) = {
        let st = state.lock().await;
        (st.ws_tx.subscribe(), st.snapshot())
    };
    if !send_event(&mut socket, &snapshot).await {
        return;
    }

    loop {
        tokio::select! {
            received = events.recv() => {
                let event = match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(count)) => {
                        crate::wlog!("ws: feed lagged, {} events dropped", count);
                        WsEvent::EventsMissed { count }
                    }
                    Err(RecvError::Closed) => break,
                };
                if !send_event(&mut socket, &event).await {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(WsMessage::Ping(data))) => {
                    if socket.send(WsMessage::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                // The feed is one-way.
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Send one event as a text frame. False once the client is gone.
async fn send_event(socket: &mut WebSocket, event: &WsEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(WsMessage::Text(json)).await.is_ok(),
        Err(e) => {
            crate::wlog!("ws: could not encode event: {}", e);
            true
        }
    }
}
