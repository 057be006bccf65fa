//! Contact ledger: an owner's counter-wallets, their balances and transfers.
//!
//! Balances live in the local cache (`cbdc_balances`, contact id -> amount)
//! and the main wallet's balance is owned by the [`SessionManager`]. Remote
//! rows in `wallet_contacts` carry the descriptive fields; the remote
//! `balance` column is optional and only read when the cache has no value.
//!
//! A transfer commits the debit, the credit and the log append in one cache
//! transaction and then mirrors the record to `wallet_transactions`.
//!
//! Edits and deletes that the backend could not take are queued under
//! `cbdc_pending_contact_changes`. Each fetch replays the queue before it
//! reads, and lays whatever is still queued over the remote rows.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::gateway::{
    row, Filter, Gateway, GatewayError, Row, Select, WALLET_CONTACTS, WALLET_TRANSACTIONS,
};
use crate::model::{
    new_id, now_secs, Amount, Contact, ContactUpdate, NewContact, Outcome, Persistence,
    TransferRecord, TransferStatus, WalletEndpoint,
};
use crate::session::{SessionError, SessionManager};
use crate::settings::BalanceFallback;
use crate::storage::{keys, CacheWrite, Storage, StorageError};

/// Prefix of ids assigned to contacts that only exist in the local cache.
pub const LOCAL_ID_PREFIX: &str = "local-";

const CONTACT_COLUMNS: &[&str] = &[
    "id",
    "user_id",
    "name",
    "wallet_address",
    "notes",
    "is_favorite",
    "balance",
];

/// For deployments whose `wallet_contacts` has no `balance` column.
const NARROW_CONTACT_COLUMNS: &[&str] = &[
    "id",
    "user_id",
    "name",
    "wallet_address",
    "notes",
    "is_favorite",
];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum LedgerError {
    InvalidInput(String),
    DuplicateAddress,
    ContactNotFound(String),
    UnknownWallet(String),
    SameWallet,
    InvalidAmount,
    InsufficientFunds { available: Amount, requested: Amount },
    NotAuthenticated,
    Gateway(GatewayError),
    Storage(StorageError),
    Decode(String),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::InvalidInput(msg) => write!(f, "{msg}"),
            LedgerError::DuplicateAddress => {
                write!(f, "This wallet address is already in your contacts")
            }
            LedgerError::ContactNotFound(id) => write!(f, "contact not found: {id}"),
            LedgerError::UnknownWallet(id) => write!(f, "unknown wallet: {id}"),
            LedgerError::SameWallet => write!(f, "source and destination wallets must differ"),
            LedgerError::InvalidAmount => write!(f, "amount must be greater than zero"),
            LedgerError::InsufficientFunds {
                available,
                requested,
            } => write!(
                f,
                "insufficient funds: balance {available}, requested {requested}"
            ),
            LedgerError::NotAuthenticated => write!(f, "not signed in"),
            LedgerError::Gateway(e) => write!(f, "{e}"),
            LedgerError::Storage(e) => write!(f, "{e}"),
            LedgerError::Decode(msg) => write!(f, "unreadable contact row: {msg}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<GatewayError> for LedgerError {
    fn from(e: GatewayError) -> Self {
        LedgerError::Gateway(e)
    }
}

impl From<StorageError> for LedgerError {
    fn from(e: StorageError) -> Self {
        LedgerError::Storage(e)
    }
}

impl From<SessionError> for LedgerError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotAuthenticated => LedgerError::NotAuthenticated,
            SessionError::InsufficientFunds {
                available,
                requested,
            } => LedgerError::InsufficientFunds {
                available,
                requested,
            },
            SessionError::Storage(e) => LedgerError::Storage(e),
            SessionError::Gateway(e) => LedgerError::Gateway(e),
            other => LedgerError::InvalidInput(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Balance fallback
// ---------------------------------------------------------------------------

/// Deterministic demo balance derived from a contact's name and address:
/// a 31-multiplier string hash over UTF-16 units, scaled by 1234.56 and
/// reduced modulo 50000.
pub fn synthetic_balance(name: &str, wallet_address: &str) -> Amount {
    let hash = name
        .encode_utf16()
        .chain(wallet_address.encode_utf16())
        .fold(0i32, |h, unit| {
            h.wrapping_shl(5).wrapping_sub(h).wrapping_add(i32::from(unit))
        });
    let value = (f64::from(hash.unsigned_abs()) * 1234.56) % 50000.0;
    Amount::from_major(value).unwrap_or(Amount::ZERO)
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

/// Decode a `wallet_contacts` row. The remote balance is returned separately
/// because it may be absent or null.
fn contact_from_row(mut row: Row) -> Result<(Contact, Option<Amount>), LedgerError> {
    let remote_balance = match row.remove("balance") {
        None | Some(Value::Null) => None,
        Some(v) => serde_json::from_value::<Amount>(v).ok(),
    };
    // Remote timestamps are ISO strings; contacts keep only local epochs.
    let created_at = row.remove("created_at").and_then(|v| v.as_u64());
    if row.get("notes").is_some_and(Value::is_null) {
        row.remove("notes");
    }
    if row.get("is_favorite").is_some_and(Value::is_null) {
        row.remove("is_favorite");
    }
    let mut contact: Contact =
        serde_json::from_value(Value::Object(row)).map_err(|e| LedgerError::Decode(e.to_string()))?;
    contact.created_at = created_at;
    Ok((contact, remote_balance))
}

fn load_balances(storage: &Storage) -> Result<HashMap<String, Amount>, StorageError> {
    Ok(storage.get_as(keys::BALANCES)?.unwrap_or_default())
}

fn load_contact_cache(storage: &Storage) -> Result<HashMap<String, Vec<Contact>>, StorageError> {
    Ok(storage.get_as(keys::CONTACTS_CACHE)?.unwrap_or_default())
}

fn load_transfers(storage: &Storage) -> Result<Vec<TransferRecord>, StorageError> {
    Ok(storage.get_as(keys::TRANSACTIONS)?.unwrap_or_default())
}

/// Changes to remote contacts that so far only the cache holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PendingChanges {
    #[serde(default)]
    deleted: Vec<String>,
    #[serde(default)]
    edits: HashMap<String, ContactUpdate>,
}

impl PendingChanges {
    fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.edits.is_empty()
    }
}

fn load_pending(storage: &Storage) -> Result<HashMap<String, PendingChanges>, StorageError> {
    Ok(storage
        .get_as(keys::PENDING_CONTACT_CHANGES)?
        .unwrap_or_default())
}

fn pending_write(mut pending: HashMap<String, PendingChanges>) -> Result<CacheWrite, StorageError> {
    pending.retain(|_, changes| !changes.is_empty());
    if pending.is_empty() {
        return Ok(CacheWrite::delete(keys::PENDING_CONTACT_CHANGES));
    }
    CacheWrite::set_as(keys::PENDING_CONTACT_CHANGES, &pending)
}

/// A change to a remote contact that did not reach the backend.
fn needs_replay(contact_id: &str, persistence: &Persistence) -> bool {
    !contact_id.starts_with(LOCAL_ID_PREFIX) && matches!(persistence, Persistence::LocalOnly { .. })
}

/// The `wallet_contacts` patch for an update.
fn patch_row(update: &ContactUpdate) -> Row {
    let mut patch = Row::new();
    if let Some(name) = &update.name {
        patch.insert("name".into(), Value::String(name.clone()));
    }
    if let Some(address) = &update.wallet_address {
        patch.insert("wallet_address".into(), Value::String(address.clone()));
    }
    if let Some(notes) = &update.notes {
        let notes = Some(notes).filter(|n| !n.trim().is_empty());
        patch.insert("notes".into(), json!(notes));
    }
    if let Some(favorite) = update.is_favorite {
        patch.insert("is_favorite".into(), Value::Bool(favorite));
    }
    patch
}

fn non_empty(field: &str, value: &str) -> Result<String, LedgerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::InvalidInput(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct ContactLedger {
    gateway: Arc<dyn Gateway>,
    fallback: BalanceFallback,
    contacts: Vec<Contact>,
    last_error: Option<String>,
}

impl ContactLedger {
    pub fn new(gateway: Arc<dyn Gateway>, fallback: BalanceFallback) -> Self {
        Self {
            gateway,
            fallback,
            contacts: Vec::new(),
            last_error: None,
        }
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn record<T>(&mut self, result: Result<T, LedgerError>) -> Result<T, LedgerError> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(e) => self.last_error = Some(e.to_string()),
        }
        result
    }

    fn fallback_balance(&self, name: &str, wallet_address: &str) -> Amount {
        match self.fallback {
            BalanceFallback::Zero => Amount::ZERO,
            BalanceFallback::Synthetic => synthetic_balance(name, wallet_address),
        }
    }

    fn position(&self, contact_id: &str) -> Result<usize, LedgerError> {
        self.contacts
            .iter()
            .position(|c| c.id == contact_id)
            .ok_or_else(|| LedgerError::ContactNotFound(contact_id.to_string()))
    }

    /// The cache write that stores the in-memory list as `owner_id`'s
    /// cached contacts.
    fn contact_cache_write(&self, storage: &Storage, owner_id: &str) -> Result<CacheWrite, StorageError> {
        let mut cache = load_contact_cache(storage)?;
        let owned: Vec<Contact> = self
            .contacts
            .iter()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        cache.insert(owner_id.to_string(), owned);
        CacheWrite::set_as(keys::CONTACTS_CACHE, &cache)
    }

    // -----------------------------------------------------------------------
    // Fetch
    // -----------------------------------------------------------------------

    /// Load `owner_id`'s contacts with resolved balances.
    ///
    /// Served from the cache with a `LocalOnly` status when the backend is
    /// unreachable and a cached list exists.
    pub fn fetch_contacts(
        &mut self,
        storage: &Storage,
        owner_id: &str,
    ) -> Result<Outcome<Vec<Contact>>, LedgerError> {
        let fetched = self.try_fetch(storage, owner_id);
        self.record(fetched)
    }

    fn select_contacts(&self, owner_id: &str) -> Result<Vec<Row>, GatewayError> {
        let query = |columns: &[&str]| {
            Select::from(WALLET_CONTACTS)
                .columns(columns)
                .filter(Filter::eq("user_id", owner_id))
                .order_by("name", true)
        };
        match self.gateway.select(&query(CONTACT_COLUMNS)) {
            Err(e) if e.is_schema_error() => {
                crate::wlog!("contacts: remote has no balance column, retrying narrow select");
                self.gateway.select(&query(NARROW_CONTACT_COLUMNS))
            }
            other => other,
        }
    }

    fn try_fetch(
        &mut self,
        storage: &Storage,
        owner_id: &str,
    ) -> Result<Outcome<Vec<Contact>>, LedgerError> {
        let mut balances = load_balances(storage)?;
        let cached = load_contact_cache(storage)?.remove(owner_id);
        let mut pending = load_pending(storage)?;
        let mut queued = pending.remove(owner_id).unwrap_or_default();

        for id in self.replay_pending(&mut queued) {
            balances.remove(&id);
        }

        let rows = match self.select_contacts(owner_id) {
            Ok(rows) => rows,
            Err(e) if e.is_unreachable() => {
                let Some(mut list) = cached else {
                    return Err(e.into());
                };
                for contact in list.iter_mut() {
                    if let Some(balance) = balances.get(&contact.id) {
                        contact.balance = *balance;
                    }
                }
                crate::wlog!(
                    "contacts: backend unreachable, serving {} cached contacts for {}",
                    list.len(),
                    crate::logging::user(owner_id)
                );
                self.contacts = list.clone();
                return Ok(Outcome::local_only(list, e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut list = Vec::with_capacity(rows.len());
        for row in rows {
            let (mut contact, remote_balance) = contact_from_row(row)?;
            if queued.deleted.contains(&contact.id) {
                continue;
            }
            if let Some(edit) = queued.edits.get(&contact.id) {
                edit.apply_to(&mut contact);
            }
            contact.balance = match balances.get(&contact.id) {
                Some(cached) => *cached,
                None => remote_balance
                    .unwrap_or_else(|| self.fallback_balance(&contact.name, &contact.wallet_address)),
            };
            balances.insert(contact.id.clone(), contact.balance);
            list.push(contact);
        }

        // Contacts created while degraded have no remote row yet.
        for local in cached
            .into_iter()
            .flatten()
            .filter(|c| c.id.starts_with(LOCAL_ID_PREFIX))
        {
            let mut local = local;
            if let Some(balance) = balances.get(&local.id) {
                local.balance = *balance;
            }
            list.push(local);
        }
        list.sort_by(|a, b| a.name.cmp(&b.name));

        self.contacts = list.clone();
        pending.insert(owner_id.to_string(), queued);
        storage.apply(&[
            CacheWrite::set_as(keys::BALANCES, &balances)?,
            self.contact_cache_write(storage, owner_id)?,
            pending_write(pending)?,
        ])?;
        Ok(Outcome::synced(list))
    }

    /// Push queued changes to the backend. Returns the ids whose deletes
    /// went through. Changes the backend refuses outright are dropped; the
    /// remote row wins.
    fn replay_pending(&self, queued: &mut PendingChanges) -> Vec<String> {
        let mut deleted = Vec::new();
        queued.deleted.retain(|id| {
            match self
                .gateway
                .delete(WALLET_CONTACTS, &[Filter::eq("id", id.as_str())])
            {
                Ok(_) => {
                    deleted.push(id.clone());
                    false
                }
                Err(e) if e.allows_local_fallback() => true,
                Err(e) => {
                    crate::wlog!("contacts: dropping queued delete of {}: {}", id, e);
                    false
                }
            }
        });
        queued.edits.retain(|id, edit| {
            match self.gateway.update(
                WALLET_CONTACTS,
                &[Filter::eq("id", id.as_str())],
                patch_row(edit),
            ) {
                Ok(_) => false,
                Err(e) if e.allows_local_fallback() => true,
                Err(e) => {
                    crate::wlog!("contacts: dropping queued edit of {}: {}", id, e);
                    false
                }
            }
        });
        if !deleted.is_empty() {
            crate::wlog!("contacts: replayed {} queued deletes", deleted.len());
        }
        deleted
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub fn add_contact(
        &mut self,
        storage: &Storage,
        owner_id: &str,
        input: NewContact,
    ) -> Result<Outcome<Contact>, LedgerError> {
        let added = self.try_add(storage, owner_id, input);
        self.record(added)
    }

    fn try_add(
        &mut self,
        storage: &Storage,
        owner_id: &str,
        input: NewContact,
    ) -> Result<Outcome<Contact>, LedgerError> {
        let name = non_empty("name", &input.name)?;
        let wallet_address = non_empty("wallet address", &input.wallet_address)?;
        if self
            .contacts
            .iter()
            .any(|c| c.owner_id == owner_id && c.wallet_address == wallet_address)
        {
            return Err(LedgerError::DuplicateAddress);
        }
        let balance = match input.balance {
            Some(b) if b < Amount::ZERO => {
                return Err(LedgerError::InvalidInput(
                    "balance cannot be negative".to_string(),
                ))
            }
            Some(b) => b,
            None => self.fallback_balance(&name, &wallet_address),
        };
        let notes = input.notes.filter(|n| !n.trim().is_empty());

        let inserted = self.gateway.insert(
            WALLET_CONTACTS,
            row(json!({
                "user_id": owner_id,
                "name": name,
                "wallet_address": wallet_address,
                "notes": notes,
                "is_favorite": input.is_favorite,
            })),
        );
        let mut outcome = match inserted {
            Ok(stored) => Outcome::synced(contact_from_row(stored)?.0),
            Err(e) if e.allows_local_fallback() => {
                crate::wlog!("contacts: keeping new contact locally: {}", e);
                let contact = Contact {
                    id: format!("{LOCAL_ID_PREFIX}{}", new_id()),
                    owner_id: owner_id.to_string(),
                    name,
                    wallet_address,
                    notes,
                    is_favorite: input.is_favorite,
                    balance: Amount::ZERO,
                    created_at: Some(now_secs()),
                };
                Outcome::local_only(contact, e.to_string())
            }
            Err(e) => return Err(e.into()),
        };
        outcome.value.balance = balance;

        let mut balances = load_balances(storage)?;
        balances.insert(outcome.value.id.clone(), balance);
        self.contacts.push(outcome.value.clone());
        let writes = [
            CacheWrite::set_as(keys::BALANCES, &balances)?,
            self.contact_cache_write(storage, owner_id)?,
        ];
        if let Err(e) = storage.apply(&writes) {
            self.contacts.pop();
            return Err(e.into());
        }

        crate::wlog!(
            "contacts: added {} for {} with balance {}",
            crate::logging::wallet(&outcome.value.wallet_address),
            crate::logging::user(owner_id),
            balance
        );
        Ok(outcome)
    }

    /// Patch a contact's descriptive fields. The balance is not touched.
    pub fn update_contact(
        &mut self,
        storage: &Storage,
        contact_id: &str,
        update: ContactUpdate,
    ) -> Result<Outcome<Contact>, LedgerError> {
        let updated = self.try_update(storage, contact_id, update);
        self.record(updated)
    }

    fn try_update(
        &mut self,
        storage: &Storage,
        contact_id: &str,
        update: ContactUpdate,
    ) -> Result<Outcome<Contact>, LedgerError> {
        let index = self.position(contact_id)?;
        if update.is_empty() {
            return Ok(Outcome::synced(self.contacts[index].clone()));
        }

        let current = &self.contacts[index];
        let mut applied = ContactUpdate {
            notes: update.notes,
            is_favorite: update.is_favorite,
            ..ContactUpdate::default()
        };
        if let Some(name) = &update.name {
            applied.name = Some(non_empty("name", name)?);
        }
        if let Some(address) = &update.wallet_address {
            let address = non_empty("wallet address", address)?;
            if address != current.wallet_address
                && self.contacts.iter().any(|c| {
                    c.id != contact_id && c.owner_id == current.owner_id && c.wallet_address == address
                })
            {
                return Err(LedgerError::DuplicateAddress);
            }
            applied.wallet_address = Some(address);
        }
        let mut patched = current.clone();
        applied.apply_to(&mut patched);

        let patch = patch_row(&applied);
        let persistence = self.remote_write(contact_id, |gw| {
            let rows = gw.update(WALLET_CONTACTS, &[Filter::eq("id", contact_id)], patch)?;
            if rows.is_empty() {
                return Err(GatewayError::NotFound(format!("no contact row {contact_id}")));
            }
            Ok(())
        })?;

        // A queued edit absorbs this one so a later replay cannot undo it.
        let mut writes = vec![];
        let mut pending = load_pending(storage)?;
        let queued = pending.entry(patched.owner_id.clone()).or_default();
        if needs_replay(contact_id, &persistence) {
            queued
                .edits
                .entry(contact_id.to_string())
                .or_default()
                .merge(applied);
            writes.push(pending_write(pending)?);
        } else if let Some(edit) = queued.edits.get_mut(contact_id) {
            edit.merge(applied);
            writes.push(pending_write(pending)?);
        }

        let previous = std::mem::replace(&mut self.contacts[index], patched.clone());
        let written = self
            .contact_cache_write(storage, &patched.owner_id)
            .and_then(|w| {
                writes.push(w);
                storage.apply(&writes)
            });
        if let Err(e) = written {
            self.contacts[index] = previous;
            return Err(e.into());
        }
        Ok(Outcome {
            value: patched,
            persistence,
        })
    }

    pub fn delete_contact(
        &mut self,
        storage: &Storage,
        contact_id: &str,
    ) -> Result<Outcome<()>, LedgerError> {
        let deleted = self.try_delete(storage, contact_id);
        self.record(deleted)
    }

    fn try_delete(&mut self, storage: &Storage, contact_id: &str) -> Result<Outcome<()>, LedgerError> {
        let index = self.position(contact_id)?;
        let persistence = self.remote_write(contact_id, |gw| {
            gw.delete(WALLET_CONTACTS, &[Filter::eq("id", contact_id)])
                .map(|_| ())
        })?;

        let removed = self.contacts.remove(index);
        let written = self.delete_writes(storage, &removed, &persistence).and_then(|writes| {
            storage.apply(&writes)
        });
        if let Err(e) = written {
            self.contacts.insert(index, removed);
            return Err(e.into());
        }
        crate::wlog!(
            "contacts: removed {}",
            crate::logging::wallet(&removed.wallet_address)
        );
        Ok(Outcome {
            value: (),
            persistence,
        })
    }

    /// Cache writes for a delete. A delete the backend has not seen keeps
    /// the contact's balance and queues a tombstone.
    fn delete_writes(
        &self,
        storage: &Storage,
        removed: &Contact,
        persistence: &Persistence,
    ) -> Result<Vec<CacheWrite>, StorageError> {
        let mut pending = load_pending(storage)?;
        let mut writes = Vec::with_capacity(3);
        let queued = pending.entry(removed.owner_id.clone()).or_default();
        queued.edits.remove(&removed.id);
        if needs_replay(&removed.id, persistence) {
            if !queued.deleted.contains(&removed.id) {
                queued.deleted.push(removed.id.clone());
            }
        } else {
            let mut balances = load_balances(storage)?;
            balances.remove(&removed.id);
            writes.push(CacheWrite::set_as(keys::BALANCES, &balances)?);
        }
        writes.push(pending_write(pending)?);
        writes.push(self.contact_cache_write(storage, &removed.owner_id)?);
        Ok(writes)
    }

    /// Flip `is_favorite`.
    pub fn toggle_favorite(
        &mut self,
        storage: &Storage,
        contact_id: &str,
    ) -> Result<Outcome<Contact>, LedgerError> {
        let current = match self.position(contact_id) {
            Ok(index) => self.contacts[index].is_favorite,
            Err(e) => return self.record(Err(e)),
        };
        self.update_contact(
            storage,
            contact_id,
            ContactUpdate {
                is_favorite: Some(!current),
                ..ContactUpdate::default()
            },
        )
    }

    /// Run a remote write for an existing contact and classify the result.
    /// Contacts that only exist locally skip the backend.
    fn remote_write(
        &self,
        contact_id: &str,
        write: impl FnOnce(&dyn Gateway) -> Result<(), GatewayError>,
    ) -> Result<Persistence, LedgerError> {
        if contact_id.starts_with(LOCAL_ID_PREFIX) {
            return Ok(Persistence::LocalOnly {
                reason: "contact exists only on this device".to_string(),
            });
        }
        match write(self.gateway.as_ref()) {
            Ok(()) => Ok(Persistence::Synced),
            Err(e) if e.allows_local_fallback() => {
                crate::wlog!("contacts: applying change locally only: {}", e);
                Ok(Persistence::LocalOnly {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    /// Move `amount` between two of `owner_id`'s wallets. Either endpoint may
    /// be the main wallet (`main-wallet`) or a contact id.
    #[allow(clippy::too_many_arguments)]
    pub fn transfer_funds(
        &mut self,
        storage: &Storage,
        session: &mut SessionManager,
        owner_id: &str,
        from: &str,
        to: &str,
        amount: Amount,
        description: Option<&str>,
    ) -> Result<Outcome<TransferRecord>, LedgerError> {
        let transferred = self.try_transfer(storage, session, owner_id, from, to, amount, description);
        self.record(transferred)
    }

    fn endpoint_balance(
        &self,
        session: &SessionManager,
        owner_id: &str,
        endpoint: &WalletEndpoint,
    ) -> Result<Amount, LedgerError> {
        match endpoint {
            WalletEndpoint::Main => {
                let identity = session.require_identity()?;
                if identity.id != owner_id {
                    return Err(LedgerError::NotAuthenticated);
                }
                Ok(identity.balance)
            }
            WalletEndpoint::Contact(id) => self
                .contacts
                .iter()
                .find(|c| &c.id == id && c.owner_id == owner_id)
                .map(|c| c.balance)
                .ok_or_else(|| LedgerError::UnknownWallet(id.clone())),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn try_transfer(
        &mut self,
        storage: &Storage,
        session: &mut SessionManager,
        owner_id: &str,
        from: &str,
        to: &str,
        amount: Amount,
        description: Option<&str>,
    ) -> Result<Outcome<TransferRecord>, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount);
        }
        if from == to {
            return Err(LedgerError::SameWallet);
        }
        let source = WalletEndpoint::parse(from);
        let target = WalletEndpoint::parse(to);
        let available = self.endpoint_balance(session, owner_id, &source)?;
        let target_balance = self.endpoint_balance(session, owner_id, &target)?;
        if amount > available {
            return Err(LedgerError::InsufficientFunds {
                available,
                requested: amount,
            });
        }
        let credited = target_balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::InvalidInput("balance overflow".to_string()))?;

        // Stage every write; nothing is mutated until the batch commits.
        let mut writes = Vec::with_capacity(3);
        let mut main_balance = None;
        let mut contact_balances = Vec::new();
        let mut balances = load_balances(storage)?;
        for (endpoint, delta) in [(&source, amount.negate()), (&target, amount)] {
            match endpoint {
                WalletEndpoint::Main => {
                    let (new_balance, write) = session.stage_balance(delta)?;
                    main_balance = Some(new_balance);
                    writes.push(write);
                }
                WalletEndpoint::Contact(id) => {
                    let new_balance = if delta.is_positive() {
                        credited
                    } else {
                        available.checked_sub(amount).unwrap_or(Amount::ZERO)
                    };
                    balances.insert(id.clone(), new_balance);
                    contact_balances.push((id.clone(), new_balance));
                }
            }
        }
        if !contact_balances.is_empty() {
            writes.push(CacheWrite::set_as(keys::BALANCES, &balances)?);
        }

        let record = TransferRecord {
            id: new_id(),
            user_id: owner_id.to_string(),
            from_wallet_id: source.to_string(),
            to_wallet_id: target.to_string(),
            amount,
            description: description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            status: TransferStatus::Completed,
            created_at: now_secs(),
        };
        let mut log = load_transfers(storage)?;
        log.insert(0, record.clone());
        writes.push(CacheWrite::set_as(keys::TRANSACTIONS, &log)?);

        storage.apply(&writes)?;

        if let Some(new_balance) = main_balance {
            session.commit_balance(new_balance);
        }
        for (id, new_balance) in contact_balances {
            if let Some(contact) = self.contacts.iter_mut().find(|c| c.id == id) {
                contact.balance = new_balance;
            }
        }
        crate::wlog!(
            "transfer: {} {} -> {}",
            amount,
            crate::logging::wallet(from),
            crate::logging::wallet(to)
        );

        let mirrored = self.gateway.insert(
            WALLET_TRANSACTIONS,
            row(json!({
                "user_id": record.user_id,
                "from_wallet_id": record.from_wallet_id,
                "to_wallet_id": record.to_wallet_id,
                "amount": record.amount,
                "description": record.description,
                "status": record.status,
            })),
        );
        Ok(match mirrored {
            Ok(_) => Outcome::synced(record),
            Err(e) => {
                crate::wlog!("transfer: remote mirror failed, kept locally: {}", e);
                Outcome::local_only(record, e.to_string())
            }
        })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn contact_by_address(&self, wallet_address: &str) -> Option<&Contact> {
        self.contacts
            .iter()
            .find(|c| c.wallet_address == wallet_address)
    }

    /// Case-insensitive match on name or address. An empty term matches all.
    pub fn search(&self, term: &str) -> Vec<&Contact> {
        let term = term.trim().to_lowercase();
        self.contacts
            .iter()
            .filter(|c| {
                term.is_empty()
                    || c.name.to_lowercase().contains(&term)
                    || c.wallet_address.to_lowercase().contains(&term)
            })
            .collect()
    }

    pub fn sorted_by_name(&self) -> Vec<&Contact> {
        let mut sorted: Vec<&Contact> = self.contacts.iter().collect();
        sorted.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        });
        sorted
    }

    pub fn favorites(&self) -> Vec<&Contact> {
        self.contacts.iter().filter(|c| c.is_favorite).collect()
    }

    /// The local transfer log for `owner_id`, newest first.
    pub fn transactions(
        &self,
        storage: &Storage,
        owner_id: &str,
    ) -> Result<Vec<TransferRecord>, LedgerError> {
        Ok(load_transfers(storage)?
            .into_iter()
            .filter(|t| t.user_id == owner_id)
            .collect())
    }

    /// Forget the in-memory list (on logout). The cache is kept.
    pub fn clear(&mut self) {
        self.contacts.clear();
        self.last_error = None;
    }
}
