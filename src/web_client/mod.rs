//! cbdc-wallet-web: local wallet server.
//!
//! Provides a REST API + WebSocket over the wallet library, talks to the
//! hosted backend (or its in-process emulation), and keeps balances in the
//! SQLite cache.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod utils;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;

use crate::gateway::{Gateway, InMemoryGateway, RestGateway};
use crate::settings::load_settings;
use crate::storage::{db_path, Storage};

use config::{Cli, Config, GatewayTarget, WS_CHANNEL_CAPACITY};
use state::{AppState, SharedState};

/// Build the shared state from its parts.
pub fn build_state(
    storage: Storage,
    gateway: Arc<dyn Gateway>,
    gateway_kind: &'static str,
    settings: crate::settings::WalletSettings,
) -> Result<SharedState, crate::storage::StorageError> {
    let (ws_tx, _) = broadcast::channel(WS_CHANNEL_CAPACITY);
    let state = AppState::new(storage, gateway, gateway_kind, settings, ws_tx)?;
    Ok(Arc::new(tokio::sync::Mutex::new(state)))
}

/// Entry point: parse CLI, open the cache, connect the backend, start server.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(cli);

    crate::logging::init();

    crate::wlog!("cbdc-wallet-web starting");
    crate::wlog!("  data directory: {}", config.data_dir.display());

    let settings = load_settings(&config.data_dir)?;
    crate::wlog!(
        "  settings: default balance {} {}, fallback {:?}",
        settings.currency,
        settings.default_balance,
        settings.balance_fallback
    );

    let db = db_path(&config.data_dir);
    let storage = Storage::open(&db)?;
    crate::wlog!("  database: {}", db.display());

    let (gateway, gateway_kind): (Arc<dyn Gateway>, &'static str) = match &config.gateway {
        GatewayTarget::Remote { url, api_key } => {
            crate::wlog!("  backend: {}", url);
            (Arc::new(RestGateway::new(url, api_key)), "remote")
        }
        GatewayTarget::InMemory => {
            crate::wlog!("  backend: in-process emulation (data is not shared)");
            (Arc::new(InMemoryGateway::new()), "in_memory")
        }
    };

    let state = build_state(storage, gateway, gateway_kind, settings)?;

    {
        let mut guard = state.lock().await;
        let st = &mut *guard;
        match st.session.resolve_session(&st.storage) {
            Ok(Some(identity)) => crate::wlog!(
                "  session: {} signed in",
                crate::logging::user(&identity.id)
            ),
            Ok(None) => crate::wlog!("  session: nobody signed in"),
            Err(e) => crate::wlog!("  WARNING: could not resolve session: {}", e),
        }
    }

    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    crate::wlog!("cbdc-wallet-web listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
