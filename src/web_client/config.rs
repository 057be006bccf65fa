//! Configuration types and constants for the wallet web server.

use std::path::PathBuf;

use clap::Parser;

use crate::storage::resolve_data_dir;

pub(crate) const WS_CHANNEL_CAPACITY: usize = 256;
pub(crate) const MAX_WS_CONNECTIONS: usize = 8;

/// Local server for a simulated CBDC wallet.
///
/// Provides a REST API + WebSocket over the wallet library, backed by a
/// hosted backend (or an in-process emulation with `--offline`) and a
/// SQLite cache.
///
/// Configuration can be set via CLI arguments or environment variables.
/// CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(name = "cbdc-wallet-web", version, about)]
pub struct Cli {
    /// HTTP server bind address [env: WALLET_WEB_BIND] [default: 127.0.0.1:3000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Data directory for the cache and settings [env: WALLET_HOME] [default: ~/.cbdc-wallet]
    #[arg(long, short = 'd')]
    pub data_dir: Option<PathBuf>,

    /// Backend base URL [env: WALLET_GATEWAY_URL]
    #[arg(long, short = 'g')]
    pub gateway_url: Option<String>,

    /// Backend API key [env: WALLET_GATEWAY_KEY]
    #[arg(long, short = 'k')]
    pub gateway_key: Option<String>,

    /// Use the in-process backend emulation instead of a hosted backend
    #[arg(long)]
    pub offline: bool,
}

/// Which backend the server talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayTarget {
    Remote { url: String, api_key: String },
    InMemory,
}

pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub gateway: GatewayTarget,
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Self {
        let data_dir = cli.data_dir.unwrap_or_else(resolve_data_dir);

        let bind_addr = cli
            .bind
            .or_else(|| std::env::var("WALLET_WEB_BIND").ok())
            .unwrap_or_else(|| "127.0.0.1:3000".to_string());

        let gateway_url = cli
            .gateway_url
            .or_else(|| std::env::var("WALLET_GATEWAY_URL").ok())
            .filter(|u| !u.trim().is_empty());

        let gateway_key = cli
            .gateway_key
            .or_else(|| std::env::var("WALLET_GATEWAY_KEY").ok())
            .unwrap_or_default();

        let gateway = match gateway_url {
            Some(url) if !cli.offline => GatewayTarget::Remote {
                url,
                api_key: gateway_key,
            },
            _ => GatewayTarget::InMemory,
        };

        Self {
            bind_addr,
            data_dir,
            gateway,
        }
    }
}
