//! Session/identity manager.
//!
//! Resolves who is signed in, merges the remote `profiles` row into the
//! identity and owns the main-wallet balance. The balance lives in the local
//! cache under `cbdc_main_balance_<id>`; on first resolve it is seeded from
//! the remote profile column or the configured default.
//!
//! Every action resets [`SessionManager::last_error`] and records a
//! human-readable message there when it fails.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::gateway::{row, Filter, Gateway, GatewayError, Select, PROFILES, TRANSACTIONS};
use crate::model::{Amount, Identity};
use crate::storage::{keys, CacheWrite, Storage, StorageError};

const DEFAULT_SEND_DESCRIPTION: &str = "Wallet Transfer";

#[derive(Debug)]
pub enum SessionError {
    NotAuthenticated,
    InvalidInput(String),
    InsufficientFunds { available: Amount, requested: Amount },
    RecipientNotFound,
    SelfTransfer,
    Gateway(GatewayError),
    Storage(StorageError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NotAuthenticated => write!(f, "not signed in"),
            SessionError::InvalidInput(msg) => write!(f, "{msg}"),
            SessionError::InsufficientFunds {
                available,
                requested,
            } => write!(
                f,
                "insufficient funds: balance {available}, requested {requested}"
            ),
            SessionError::RecipientNotFound => write!(f, "Recipient wallet address not found."),
            SessionError::SelfTransfer => write!(f, "You cannot send money to yourself."),
            SessionError::Gateway(e) => write!(f, "{e}"),
            SessionError::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<GatewayError> for SessionError {
    fn from(e: GatewayError) -> Self {
        SessionError::Gateway(e)
    }
}

impl From<StorageError> for SessionError {
    fn from(e: StorageError) -> Self {
        SessionError::Storage(e)
    }
}

/// Receipt for a send to a registered wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct SentPayment {
    pub transaction_id: Option<String>,
    pub receiver_id: String,
    pub amount: Amount,
    pub new_balance: Amount,
}

pub struct SessionManager {
    gateway: Arc<dyn Gateway>,
    default_balance: Amount,
    identity: Option<Identity>,
    last_error: Option<String>,
}

impl SessionManager {
    pub fn new(gateway: Arc<dyn Gateway>, default_balance: Amount) -> Self {
        Self {
            gateway,
            default_balance,
            identity: None,
            last_error: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Message from the most recent failed action, cleared when the next
    /// action starts.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn require_identity(&self) -> Result<&Identity, SessionError> {
        self.identity.as_ref().ok_or(SessionError::NotAuthenticated)
    }

    fn record<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Refresh the identity from the active session. Returns `Ok(None)` when
    /// nobody is signed in.
    pub fn resolve_session(&mut self, storage: &Storage) -> Result<Option<&Identity>, SessionError> {
        self.last_error = None;
        let resolved = self.load_identity(storage);
        let resolved = self.record(resolved)?;
        self.identity = resolved;
        Ok(self.identity.as_ref())
    }

    fn load_identity(&self, storage: &Storage) -> Result<Option<Identity>, SessionError> {
        let Some(session) = self.gateway.get_session()? else {
            return Ok(None);
        };
        let user = session.user;

        let mut identity = Identity {
            id: user.id.clone(),
            email: user.email.clone(),
            full_name: user
                .metadata
                .get("full_name")
                .and_then(Value::as_str)
                .map(str::to_string),
            wallet_address: None,
            balance: Amount::ZERO,
        };

        let profile_query = Select::from(PROFILES).filter(Filter::eq("id", user.id.clone()));
        let mut remote_balance = None;
        match self.gateway.select_single(&profile_query) {
            Ok(profile) => {
                if let Some(name) = profile.get("full_name").and_then(Value::as_str) {
                    identity.full_name = Some(name.to_string());
                }
                if let Some(email) = profile.get("email").and_then(Value::as_str) {
                    identity.email = Some(email.to_string());
                }
                identity.wallet_address = profile
                    .get("wallet_address")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                remote_balance = profile
                    .get("balance")
                    .filter(|v| !v.is_null())
                    .and_then(|v| serde_json::from_value::<Amount>(v.clone()).ok())
                    .filter(|b| *b != Amount::ZERO);
            }
            Err(GatewayError::NotFound(_)) => {
                crate::wlog!("session: no profile row for {}", crate::logging::user(&user.id));
            }
            Err(e) => {
                crate::wlog!(
                    "session: profile read failed for {}: {}",
                    crate::logging::user(&user.id),
                    e
                );
            }
        }

        let key = keys::main_balance(&identity.id);
        identity.balance = match storage.get_as::<Amount>(&key)? {
            Some(cached) => cached,
            None => {
                let seeded = remote_balance.unwrap_or(self.default_balance);
                storage.set_as(&key, &seeded)?;
                crate::wlog!(
                    "session: seeded balance {} for {}",
                    seeded,
                    crate::logging::user(&identity.id)
                );
                seeded
            }
        };

        Ok(Some(identity))
    }

    /// Create an account. Does not sign in.
    pub fn register(
        &mut self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<(), SessionError> {
        self.last_error = None;
        let result = self
            .gateway
            .sign_up(email, password, row(json!({ "full_name": full_name })))
            .map(|user| {
                crate::wlog!("session: registered {}", crate::logging::user(&user.id));
            })
            .map_err(SessionError::from);
        self.record(result)
    }

    pub fn login(
        &mut self,
        storage: &Storage,
        email: &str,
        password: &str,
    ) -> Result<&Identity, SessionError> {
        self.last_error = None;
        let signed_in = self
            .gateway
            .sign_in_with_password(email, password)
            .map_err(SessionError::from);
        self.record(signed_in)?;

        let loaded = self.load_identity(storage);
        let identity = self.record(loaded)?;
        let identity = self.record(identity.ok_or(SessionError::NotAuthenticated))?;
        crate::wlog!("session: signed in {}", crate::logging::user(&identity.id));
        Ok(self.identity.insert(identity))
    }

    /// Sign out remotely, then forget the identity and its cached balance.
    pub fn logout(&mut self, storage: &Storage) -> Result<(), SessionError> {
        self.last_error = None;
        let signed_out = self.gateway.sign_out().map_err(SessionError::from);
        self.record(signed_out)?;

        // The identity stays until its cached balance is gone, so a failed
        // delete can be retried.
        if let Some(user_id) = self.identity.as_ref().map(|i| i.id.clone()) {
            let removed = storage
                .delete(&keys::main_balance(&user_id))
                .map_err(SessionError::from);
            self.record(removed)?;
            self.identity = None;
            crate::wlog!("session: signed out {}", crate::logging::user(&user_id));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Balance
    // -----------------------------------------------------------------------

    /// Apply a signed delta to the main balance and persist it to the cache.
    /// Returns the new balance. No floor is applied; callers that spend check
    /// funds first.
    pub fn adjust_balance(&mut self, storage: &Storage, delta: Amount) -> Result<Amount, SessionError> {
        self.last_error = None;
        let staged = self.stage_balance(delta);
        let (new_balance, write) = self.record(staged)?;
        let applied = storage.apply(&[write]).map_err(SessionError::from);
        self.record(applied)?;
        self.commit_balance(new_balance);
        Ok(new_balance)
    }

    /// Compute the balance after `delta` and the cache write that persists
    /// it, without changing anything. Pair with [`Self::commit_balance`]
    /// once the write has been applied.
    pub fn stage_balance(&self, delta: Amount) -> Result<(Amount, CacheWrite), SessionError> {
        let identity = self.require_identity()?;
        let new_balance = identity
            .balance
            .checked_add(delta)
            .ok_or_else(|| SessionError::InvalidInput("balance overflow".to_string()))?;
        let write = CacheWrite::set_as(keys::main_balance(&identity.id), &new_balance)?;
        Ok((new_balance, write))
    }

    /// Set the in-memory balance after a staged write was applied.
    pub fn commit_balance(&mut self, new_balance: Amount) {
        if let Some(identity) = self.identity.as_mut() {
            identity.balance = new_balance;
        }
    }

    // -----------------------------------------------------------------------
    // Sending to registered wallets
    // -----------------------------------------------------------------------

    /// Send funds to another registered user's wallet address.
    ///
    /// The remote `transactions` insert is what the receiver's notification
    /// feed observes; the local debit follows it.
    pub fn send_money(
        &mut self,
        storage: &Storage,
        recipient_wallet: &str,
        amount: Amount,
        description: Option<&str>,
    ) -> Result<SentPayment, SessionError> {
        self.last_error = None;
        let sent = self.try_send_money(storage, recipient_wallet, amount, description);
        self.record(sent)
    }

    fn try_send_money(
        &mut self,
        storage: &Storage,
        recipient_wallet: &str,
        amount: Amount,
        description: Option<&str>,
    ) -> Result<SentPayment, SessionError> {
        if !amount.is_positive() {
            return Err(SessionError::InvalidInput(
                "amount must be greater than zero".to_string(),
            ));
        }
        let recipient_wallet = recipient_wallet.trim();
        if recipient_wallet.is_empty() {
            return Err(SessionError::InvalidInput(
                "recipient wallet address is required".to_string(),
            ));
        }
        let sender = self.require_identity()?.clone();
        if amount > sender.balance {
            return Err(SessionError::InsufficientFunds {
                available: sender.balance,
                requested: amount,
            });
        }

        let lookup = Select::from(PROFILES)
            .columns(&["id"])
            .filter(Filter::eq("wallet_address", recipient_wallet));
        let receiver_id = match self.gateway.select_single(&lookup) {
            Ok(profile) => profile
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(SessionError::RecipientNotFound)?,
            Err(GatewayError::NotFound(_)) => return Err(SessionError::RecipientNotFound),
            Err(e) => return Err(e.into()),
        };
        if receiver_id == sender.id {
            return Err(SessionError::SelfTransfer);
        }

        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_SEND_DESCRIPTION);
        let inserted = self.gateway.insert(
            TRANSACTIONS,
            row(json!({
                "sender_id": sender.id,
                "receiver_id": receiver_id,
                "receiver_wallet_id": recipient_wallet,
                "amount": amount,
                "type": "transfer",
                "description": description,
            })),
        )?;

        let (new_balance, write) = self.stage_balance(amount.negate())?;
        storage.apply(&[write])?;
        self.commit_balance(new_balance);

        crate::wlog!(
            "session: sent {} from {} to {}",
            amount,
            crate::logging::user(&sender.id),
            crate::logging::wallet(recipient_wallet)
        );

        Ok(SentPayment {
            transaction_id: inserted.get("id").and_then(Value::as_str).map(str::to_string),
            receiver_id,
            amount,
            new_balance,
        })
    }
}
