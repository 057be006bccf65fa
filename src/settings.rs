//! Wallet settings stored in `{data_dir}/settings.toml`.
//!
//! A missing file yields the defaults; a present file may set any subset of
//! the fields.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::Amount;

/// What a contact's balance becomes when neither the cache nor the remote
/// row has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceFallback {
    #[default]
    Zero,
    /// Deterministic value derived from name and address. Kept for
    /// compatibility with demo data; the value is not backed by any ledger.
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletSettings {
    /// Opening main-wallet balance for an identity with no balance anywhere.
    pub default_balance: Amount,
    pub balance_fallback: BalanceFallback,
    /// Currency label used in notifications.
    pub currency: String,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            default_balance: Amount::from_cents(5_000_000),
            balance_fallback: BalanceFallback::Zero,
            currency: "LKR".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Toml(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "io error: {e}"),
            SettingsError::Toml(e) => write!(f, "settings error: {e}"),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<std::io::Error> for SettingsError {
    fn from(e: std::io::Error) -> Self {
        SettingsError::Io(e)
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.toml")
}

pub fn load_settings(data_dir: &Path) -> Result<WalletSettings, SettingsError> {
    let path = settings_path(data_dir);
    if !path.exists() {
        return Ok(WalletSettings::default());
    }
    let contents = fs::read_to_string(&path)?;
    toml::from_str(&contents).map_err(|e| SettingsError::Toml(e.to_string()))
}

pub fn save_settings(data_dir: &Path, settings: &WalletSettings) -> Result<(), SettingsError> {
    fs::create_dir_all(data_dir)?;
    let contents =
        toml::to_string_pretty(settings).map_err(|e| SettingsError::Toml(e.to_string()))?;
    fs::write(settings_path(data_dir), contents)?;
    Ok(())
}
