//! Remote data gateway: the seam to the hosted backend.
//!
//! The backend provides password auth, row CRUD over named tables and a
//! change feed of row inserts. [`Gateway`] captures exactly that surface;
//! [`rest::RestGateway`] talks to a hosted deployment and
//! [`memory::InMemoryGateway`] emulates one in-process.

pub mod memory;
pub mod realtime;
pub mod rest;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

pub use memory::InMemoryGateway;
pub use rest::RestGateway;

/// A table row as returned by the backend.
pub type Row = Map<String, Value>;

pub const PROFILES: &str = "profiles";
pub const TRANSACTIONS: &str = "transactions";
pub const WALLET_CONTACTS: &str = "wallet_contacts";
pub const WALLET_TRANSACTIONS: &str = "wallet_transactions";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Credentials rejected or no session.
    Auth(String),
    /// A single-row query matched nothing.
    NotFound(String),
    /// Unique or foreign-key constraint violation.
    Conflict(String),
    /// The deployment's schema lacks a referenced table or column.
    Schema(String),
    /// The backend could not be reached.
    Transport(String),
    /// The backend answered with something we could not decode.
    Decode(String),
    /// Any other rejection.
    Rejected { status: u16, message: String },
}

impl GatewayError {
    /// Missing-column / schema-cache errors: the write or read may be retried
    /// with fewer columns or emulated locally.
    pub fn is_schema_error(&self) -> bool {
        matches!(self, GatewayError::Schema(_))
    }

    /// The backend was unreachable; local fallbacks apply.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }

    /// Errors after which a change may be kept locally as degraded.
    pub fn allows_local_fallback(&self) -> bool {
        self.is_schema_error() || self.is_unreachable()
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Auth(msg) => write!(f, "{msg}"),
            GatewayError::NotFound(msg) => write!(f, "not found: {msg}"),
            GatewayError::Conflict(msg) => write!(f, "conflict: {msg}"),
            GatewayError::Schema(msg) => write!(f, "schema error: {msg}"),
            GatewayError::Transport(msg) => write!(f, "backend unreachable: {msg}"),
            GatewayError::Decode(msg) => write!(f, "unexpected response: {msg}"),
            GatewayError::Rejected { status, message } => {
                write!(f, "request rejected ({status}): {message}")
            }
        }
    }
}

impl std::error::Error for GatewayError {}

// ---------------------------------------------------------------------------
// Auth types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    /// Free-form metadata supplied at sign-up (`full_name`).
    pub metadata: Row,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub user: AuthUser,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Equality predicate on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column) == Some(&self.value)
    }

    /// Text form of the value for query strings (`eq.<value>`).
    pub fn value_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// A row read: table, projected columns, filters, ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    /// Empty means all columns.
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    /// Column and ascending flag.
    pub order: Option<(String, bool)>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn from(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some((column.to_string(), ascending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn column_list(&self) -> String {
        if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(",")
        }
    }
}

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

/// A live subscription to row inserts. Dropping the receiver or calling
/// [`Gateway::unsubscribe`] ends it; the stream then yields `None`.
pub struct Subscription {
    pub id: u64,
    pub rows: mpsc::UnboundedReceiver<Row>,
}

// ---------------------------------------------------------------------------
// The trait
// ---------------------------------------------------------------------------

/// Client of the hosted backend.
///
/// Calls block until the backend answers. The gateway keeps the current
/// session the way a browser SDK keeps it in the page.
pub trait Gateway: Send + Sync {
    fn sign_up(&self, email: &str, password: &str, metadata: Row) -> Result<AuthUser, GatewayError>;

    fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, GatewayError>;

    /// The active session, if any.
    fn get_session(&self) -> Result<Option<Session>, GatewayError>;

    fn sign_out(&self) -> Result<(), GatewayError>;

    fn select(&self, query: &Select) -> Result<Vec<Row>, GatewayError>;

    /// Insert one row and return it as stored (with generated columns).
    fn insert(&self, table: &str, row: Row) -> Result<Row, GatewayError>;

    /// Patch matching rows and return them as stored.
    fn update(&self, table: &str, filters: &[Filter], patch: Row) -> Result<Vec<Row>, GatewayError>;

    /// Delete matching rows, returning how many were removed.
    fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, GatewayError>;

    /// Subscribe to inserts on `table` whose `filter` column matches.
    ///
    /// Must be called from within a tokio runtime.
    fn subscribe_inserts(&self, table: &str, filter: Filter) -> Result<Subscription, GatewayError>;

    fn unsubscribe(&self, subscription_id: u64);

    /// Select expecting exactly one row.
    fn select_single(&self, query: &Select) -> Result<Row, GatewayError> {
        let mut rows = self.select(query)?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            0 => Err(GatewayError::NotFound(format!("no row in {}", query.table))),
            n => Err(GatewayError::Rejected {
                status: 406,
                message: format!("expected one row in {}, got {n}", query.table),
            }),
        }
    }
}

/// Build a [`Row`] from a `serde_json::json!` object literal.
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matching_and_text() {
        let r = row(json!({"user_id": "u1", "n": 3}));
        assert!(Filter::eq("user_id", "u1").matches(&r));
        assert!(!Filter::eq("user_id", "u2").matches(&r));
        assert_eq!(Filter::eq("n", 3).value_text(), "3");
        assert_eq!(Filter::eq("user_id", "u1").value_text(), "u1");
    }

    #[test]
    fn select_builder() {
        let q = Select::from(WALLET_CONTACTS)
            .columns(&["id", "name"])
            .filter(Filter::eq("user_id", "u1"))
            .order_by("name", true);
        assert_eq!(q.column_list(), "id,name");
        assert_eq!(Select::from(PROFILES).column_list(), "*");
        assert_eq!(q.order, Some(("name".to_string(), true)));
    }

    #[test]
    fn fallback_classification() {
        assert!(GatewayError::Schema("x".into()).allows_local_fallback());
        assert!(GatewayError::Transport("x".into()).allows_local_fallback());
        assert!(!GatewayError::Auth("x".into()).allows_local_fallback());
        assert!(!GatewayError::Conflict("x".into()).allows_local_fallback());
    }
}
