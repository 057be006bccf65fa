//! Axum router construction.

use axum::routing::{get, post};
use axum::Router;

use crate::web_client::handlers;
use crate::web_client::state::SharedState;

/// Build the complete Axum router with all API routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health::health_handler))
        // Auth / session
        .route(
            "/api/auth/register",
            post(handlers::auth::register_handler),
        )
        .route("/api/auth/login", post(handlers::auth::login_handler))
        .route("/api/auth/logout", post(handlers::auth::logout_handler))
        .route("/api/session", get(handlers::auth::session_handler))
        // Contacts API
        .route(
            "/api/contacts",
            get(handlers::contacts::list_contacts_handler)
                .post(handlers::contacts::add_contact_handler),
        )
        .route(
            "/api/contacts/:id",
            axum::routing::put(handlers::contacts::update_contact_handler)
                .delete(handlers::contacts::delete_contact_handler),
        )
        .route(
            "/api/contacts/:id/favorite",
            post(handlers::contacts::toggle_favorite_handler),
        )
        // Transfers API
        .route(
            "/api/transfers",
            get(handlers::transfers::list_transfers_handler)
                .post(handlers::transfers::create_transfer_handler),
        )
        .route("/api/send", post(handlers::transfers::send_money_handler))
        // Notifications API
        .route(
            "/api/notifications",
            get(handlers::notifications::list_notifications_handler),
        )
        .route(
            "/api/notifications/read-all",
            post(handlers::notifications::mark_all_read_handler),
        )
        .route(
            "/api/notifications/permission",
            post(handlers::notifications::request_permission_handler),
        )
        .route(
            "/api/notifications/:id/read",
            post(handlers::notifications::mark_read_handler),
        )
        // Theme
        .route("/api/theme", get(handlers::theme::get_theme_handler))
        .route(
            "/api/theme/toggle",
            post(handlers::theme::toggle_theme_handler),
        )
        // WebSocket
        .route("/api/ws", get(handlers::websocket::ws_handler))
        .with_state(state)
}
