//! SQLite-backed local cache.
//!
//! The cache is a flat key/value store: string keys mapping to JSON values,
//! mirroring what a browser profile keeps in local storage. It is the
//! authoritative home of balances; remote rows are mirrors.
//!
//! Multi-key updates go through [`Storage::apply`], which commits a batch of
//! writes in a single SQLite transaction.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::model::now_secs;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    Serde(serde_json::Error),
    /// A stored value exists but does not have the expected shape.
    Corrupt { key: String, reason: String },
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StorageError::Io(e) => write!(f, "io error: {e}"),
            StorageError::Serde(e) => write!(f, "serialization error: {e}"),
            StorageError::Corrupt { key, reason } => {
                write!(f, "cached value for {key} is unreadable: {reason}")
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Sqlite(e)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serde(e)
    }
}

// ---------------------------------------------------------------------------
// Cache keys
// ---------------------------------------------------------------------------

/// Key names used by the wallet. They match the browser client's
/// local-storage keys so exported caches stay readable.
pub mod keys {
    /// Object: contact id -> balance.
    pub const BALANCES: &str = "cbdc_balances";
    /// Object: owner id -> array of contacts.
    pub const CONTACTS_CACHE: &str = "cbdc_contacts_cache";
    /// Object: owner id -> contact changes kept locally while the backend
    /// could not take them.
    pub const PENDING_CONTACT_CHANGES: &str = "cbdc_pending_contact_changes";
    /// Array of transfer records, newest first.
    pub const TRANSACTIONS: &str = "cbdc_transactions";
    /// Bool (legacy clients wrote the strings "true"/"false").
    pub const DARK_MODE: &str = "darkMode";

    /// Number: the main-wallet balance of one identity.
    pub fn main_balance(user_id: &str) -> String {
        format!("cbdc_main_balance_{user_id}")
    }
}

// ---------------------------------------------------------------------------
// Batched writes
// ---------------------------------------------------------------------------

/// One write inside an [`Storage::apply`] batch.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheWrite {
    Set { key: String, value: Value },
    Delete { key: String },
}

impl CacheWrite {
    pub fn set(key: impl Into<String>, value: Value) -> Self {
        CacheWrite::Set {
            key: key.into(),
            value,
        }
    }

    /// Serialize `value` into a set-write.
    pub fn set_as<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self, StorageError> {
        Ok(CacheWrite::Set {
            key: key.into(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn delete(key: impl Into<String>) -> Self {
        CacheWrite::Delete { key: key.into() }
    }
}

// ---------------------------------------------------------------------------
// Storage handle
// ---------------------------------------------------------------------------

pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cache (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                updated_at  INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Raw JSON access
    // -----------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM cache WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        write_row(&self.conn, key, value)
    }

    /// Remove a key. Returns whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let affected = self
            .conn
            .execute("DELETE FROM cache WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Typed access
    // -----------------------------------------------------------------------

    /// Read and decode a value. A value of the wrong shape is reported as
    /// [`StorageError::Corrupt`] rather than silently dropped.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StorageError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value)?;
        self.set(key, &value)
    }

    // -----------------------------------------------------------------------
    // Batches
    // -----------------------------------------------------------------------

    /// Apply all writes or none of them.
    pub fn apply(&self, writes: &[CacheWrite]) -> Result<(), StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        for write in writes {
            match write {
                CacheWrite::Set { key, value } => write_row(&tx, key, value)?,
                CacheWrite::Delete { key } => {
                    tx.execute("DELETE FROM cache WHERE key = ?1", params![key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn write_row(conn: &Connection, key: &str, value: &Value) -> Result<(), StorageError> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO cache (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, text, now_secs() as i64],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `{data_dir}/wallet.db`
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("wallet.db")
}

/// Data directory from `WALLET_HOME`, else `~/.cbdc-wallet`.
pub fn resolve_data_dir() -> PathBuf {
    std::env::var("WALLET_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(|h| PathBuf::from(h).join(".cbdc-wallet"))
                .unwrap_or_else(|_| PathBuf::from(".cbdc-wallet"))
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Amount;
    use serde_json::json;

    fn test_storage() -> Storage {
        Storage::open_in_memory().unwrap()
    }

    #[test]
    fn test_get_set_delete() {
        let storage = test_storage();
        assert!(storage.get("missing").unwrap().is_none());

        storage.set("k", &json!({"a": 1})).unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(json!({"a": 1})));

        // Overwrite replaces the value
        storage.set("k", &json!([1, 2])).unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(json!([1, 2])));

        assert!(storage.delete("k").unwrap());
        assert!(!storage.delete("k").unwrap());
        assert!(storage.get("k").unwrap().is_none());
    }

    #[test]
    fn test_typed_access() {
        let storage = test_storage();
        let key = keys::main_balance("u1");
        storage
            .set_as(&key, &Amount::from_cents(4_980_000))
            .unwrap();
        let bal: Amount = storage.get_as(&key).unwrap().unwrap();
        assert_eq!(bal.to_string(), "49800.00");
    }

    #[test]
    fn test_corrupt_value_is_reported() {
        let storage = test_storage();
        storage.set("n", &json!({"not": "a number"})).unwrap();
        let err = storage.get_as::<Amount>("n").unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn test_apply_batch() {
        let storage = test_storage();
        storage.set("gone", &json!(true)).unwrap();

        storage
            .apply(&[
                CacheWrite::set("a", json!(1)),
                CacheWrite::set("b", json!(2)),
                CacheWrite::delete("gone"),
            ])
            .unwrap();

        assert_eq!(storage.get("a").unwrap(), Some(json!(1)));
        assert_eq!(storage.get("b").unwrap(), Some(json!(2)));
        assert!(storage.get("gone").unwrap().is_none());
    }

    #[test]
    fn test_open_on_disk_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = db_path(tmp.path());
        {
            let storage = Storage::open(&path).unwrap();
            storage.set("persist", &json!("yes")).unwrap();
        }
        let reopened = Storage::open(&path).unwrap();
        assert_eq!(reopened.get("persist").unwrap(), Some(json!("yes")));
    }
}
