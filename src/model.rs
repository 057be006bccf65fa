//! Wallet domain types shared by the session manager, the contact ledger,
//! the notification relay and the HTTP layer.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Pseudo-identifier for the signed-in user's own wallet in transfer records.
pub const MAIN_WALLET_ID: &str = "main-wallet";

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// A money amount in minor units (cents).
///
/// Serialised as a decimal number of major units (`49800.0`). Deserialises
/// from a number or a numeric string, which is how older caches stored
/// balances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: i64) -> Self {
        Amount(cents)
    }

    /// Round a major-unit value to the nearest cent. Returns `None` for
    /// NaN, infinities and values outside the representable range.
    pub fn from_major(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let cents = (value * 100.0).round();
        if cents.abs() >= i64::MAX as f64 {
            return None;
        }
        Some(Amount(cents as i64))
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn as_major(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn negate(self) -> Amount {
        Amount(-self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_major())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        let value = match Raw::deserialize(deserializer)? {
            Raw::Number(n) => n,
            Raw::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| serde::de::Error::custom(format!("not an amount: {s:?}")))?,
        };
        Amount::from_major(value)
            .ok_or_else(|| serde::de::Error::custom(format!("amount out of range: {value}")))
    }
}

// ---------------------------------------------------------------------------
// Identity and contacts
// ---------------------------------------------------------------------------

/// The signed-in user: auth identity merged with the `profiles` row and the
/// resolved balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub wallet_address: Option<String>,
    pub balance: Amount,
}

/// A counter-wallet known to an owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    /// Stored remotely as `user_id`.
    #[serde(alias = "user_id")]
    pub owner_id: String,
    pub name: String,
    pub wallet_address: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub balance: Amount,
    #[serde(default)]
    pub created_at: Option<u64>,
}

/// Input for creating a contact.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewContact {
    pub name: String,
    pub wallet_address: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    /// Opening balance; the configured fallback applies when absent.
    #[serde(default)]
    pub balance: Option<Amount>,
}

/// Partial update of a contact. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_favorite: Option<bool>,
}

impl ContactUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.wallet_address.is_none()
            && self.notes.is_none()
            && self.is_favorite.is_none()
    }

    /// Fold a later update into this one; fields set in `later` win.
    pub fn merge(&mut self, later: ContactUpdate) {
        if later.name.is_some() {
            self.name = later.name;
        }
        if later.wallet_address.is_some() {
            self.wallet_address = later.wallet_address;
        }
        if later.notes.is_some() {
            self.notes = later.notes;
        }
        if later.is_favorite.is_some() {
            self.is_favorite = later.is_favorite;
        }
    }

    /// Write the set fields into `contact`. An empty `notes` clears them.
    pub fn apply_to(&self, contact: &mut Contact) {
        if let Some(name) = &self.name {
            contact.name = name.clone();
        }
        if let Some(address) = &self.wallet_address {
            contact.wallet_address = address.clone();
        }
        if let Some(notes) = &self.notes {
            contact.notes = Some(notes.clone()).filter(|n| !n.trim().is_empty());
        }
        if let Some(favorite) = self.is_favorite {
            contact.is_favorite = favorite;
        }
    }
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

/// One side of a ledger transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WalletEndpoint {
    Main,
    Contact(String),
}

impl WalletEndpoint {
    pub fn parse(id: &str) -> Self {
        if id == MAIN_WALLET_ID {
            WalletEndpoint::Main
        } else {
            WalletEndpoint::Contact(id.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            WalletEndpoint::Main => MAIN_WALLET_ID,
            WalletEndpoint::Contact(id) => id,
        }
    }
}

impl fmt::Display for WalletEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Completed,
}

/// Append-only record of a ledger transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: String,
    pub user_id: String,
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    pub amount: Amount,
    pub description: Option<String>,
    pub status: TransferStatus,
    pub created_at: u64,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub timestamp: u64,
    pub read: bool,
}

// ---------------------------------------------------------------------------
// Degraded-mode reporting
// ---------------------------------------------------------------------------

/// Where a write ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Persistence {
    /// Local cache and remote store both hold the change.
    Synced,
    /// Only the local cache holds the change; the remote write failed.
    LocalOnly { reason: String },
}

/// Result value of a write together with its [`Persistence`].
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub persistence: Persistence,
}

impl<T> Outcome<T> {
    pub fn synced(value: T) -> Self {
        Self {
            value,
            persistence: Persistence::Synced,
        }
    }

    pub fn local_only(value: T, reason: impl Into<String>) -> Self {
        Self {
            value,
            persistence: Persistence::LocalOnly {
                reason: reason.into(),
            },
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.persistence, Persistence::LocalOnly { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            persistence: self.persistence,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Random 128-bit identifier, hex encoded.
pub fn new_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Seconds since the UNIX epoch.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
