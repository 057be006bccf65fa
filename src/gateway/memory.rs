//! In-process emulation of the hosted backend.
//!
//! Used for offline mode and tests. Besides plain CRUD it can pretend a
//! deployment lacks a column ([`InMemoryGateway::drop_column`]) or is
//! unreachable ([`InMemoryGateway::set_offline`]), which are the two
//! conditions the wallet degrades on.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;

use super::{AuthUser, Filter, Gateway, GatewayError, Row, Select, Session, Subscription, PROFILES};
use crate::model::{new_id, now_secs};

const MIN_PASSWORD_LEN: usize = 6;

struct StoredUser {
    id: String,
    email: String,
    password: String,
    metadata: Row,
}

struct Subscriber {
    id: u64,
    table: String,
    filter: Filter,
    tx: mpsc::UnboundedSender<Row>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, StoredUser>,
    session: Option<Session>,
    tables: HashMap<String, Vec<Row>>,
    missing_columns: HashSet<(String, String)>,
    offline: bool,
    subscribers: Vec<Subscriber>,
    next_subscription_id: u64,
}

#[derive(Default)]
pub struct InMemoryGateway {
    inner: Mutex<Inner>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Behave like a deployment whose `table` has no `column`.
    pub fn drop_column(&self, table: &str, column: &str) {
        let mut inner = self.lock();
        inner
            .missing_columns
            .insert((table.to_string(), column.to_string()));
        if let Some(rows) = inner.tables.get_mut(table) {
            for row in rows.iter_mut() {
                row.remove(column);
            }
        }
    }

    /// While offline every call fails with [`GatewayError::Transport`].
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Snapshot of a table, for inspection.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Number of live change-feed subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }
}

impl Inner {
    fn ensure_online(&self) -> Result<(), GatewayError> {
        if self.offline {
            return Err(GatewayError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    fn check_columns<'a>(
        &self,
        table: &str,
        columns: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), GatewayError> {
        for column in columns {
            if self
                .missing_columns
                .contains(&(table.to_string(), column.to_string()))
            {
                return Err(GatewayError::Schema(format!(
                    "Could not find the '{column}' column of '{table}' in the schema cache"
                )));
            }
        }
        Ok(())
    }

    fn publish_insert(&mut self, table: &str, row: &Row) {
        self.subscribers.retain(|s| !s.tx.is_closed());
        for sub in &self.subscribers {
            if sub.table == table && sub.filter.matches(row) {
                let _ = sub.tx.send(row.clone());
            }
        }
    }
}

fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(row))
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

fn wallet_address() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("CBDC{}", hex::encode_upper(bytes))
}

impl Gateway for InMemoryGateway {
    fn sign_up(&self, email: &str, password: &str, metadata: Row) -> Result<AuthUser, GatewayError> {
        let mut inner = self.lock();
        inner.ensure_online()?;
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(GatewayError::Auth(
                "Unable to validate email address: invalid format".to_string(),
            ));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(GatewayError::Auth(format!(
                "Password should be at least {MIN_PASSWORD_LEN} characters."
            )));
        }
        if inner.users.contains_key(&email) {
            return Err(GatewayError::Auth("User already registered".to_string()));
        }

        let id = new_id();
        let mut profile = Row::new();
        profile.insert("id".into(), Value::String(id.clone()));
        profile.insert("email".into(), Value::String(email.clone()));
        profile.insert(
            "full_name".into(),
            metadata.get("full_name").cloned().unwrap_or(Value::Null),
        );
        profile.insert("wallet_address".into(), Value::String(wallet_address()));
        profile.insert("created_at".into(), Value::from(now_secs()));
        inner
            .tables
            .entry(PROFILES.to_string())
            .or_default()
            .push(profile);

        inner.users.insert(
            email.clone(),
            StoredUser {
                id: id.clone(),
                email: email.clone(),
                password: password.to_string(),
                metadata: metadata.clone(),
            },
        );

        Ok(AuthUser {
            id,
            email: Some(email),
            metadata,
        })
    }

    fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        let mut inner = self.lock();
        inner.ensure_online()?;
        let email = email.trim().to_lowercase();
        let user = match inner.users.get(&email) {
            Some(u) if u.password == password => AuthUser {
                id: u.id.clone(),
                email: Some(u.email.clone()),
                metadata: u.metadata.clone(),
            },
            _ => return Err(GatewayError::Auth("Invalid login credentials".to_string())),
        };
        let session = Session {
            access_token: new_id(),
            user,
        };
        inner.session = Some(session.clone());
        Ok(session)
    }

    fn get_session(&self) -> Result<Option<Session>, GatewayError> {
        let inner = self.lock();
        inner.ensure_online()?;
        Ok(inner.session.clone())
    }

    fn sign_out(&self) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        inner.ensure_online()?;
        inner.session = None;
        Ok(())
    }

    fn select(&self, query: &Select) -> Result<Vec<Row>, GatewayError> {
        let inner = self.lock();
        inner.ensure_online()?;
        inner.check_columns(
            &query.table,
            query
                .columns
                .iter()
                .map(String::as_str)
                .chain(query.filters.iter().map(|f| f.column.as_str()))
                .chain(query.order.iter().map(|(c, _)| c.as_str())),
        )?;

        let mut rows: Vec<Row> = inner
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| matches_all(r, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some((column, ascending)) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare(a.get(column), b.get(column));
                if *ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        if !query.columns.is_empty() {
            for row in rows.iter_mut() {
                row.retain(|k, _| query.columns.iter().any(|c| c == k));
            }
        }
        Ok(rows)
    }

    fn insert(&self, table: &str, mut row: Row) -> Result<Row, GatewayError> {
        let mut inner = self.lock();
        inner.ensure_online()?;
        inner.check_columns(table, row.keys().map(String::as_str))?;

        row.entry("id")
            .or_insert_with(|| Value::String(new_id()));
        row.entry("created_at")
            .or_insert_with(|| Value::from(now_secs()));

        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        inner.publish_insert(table, &row);
        Ok(row)
    }

    fn update(&self, table: &str, filters: &[Filter], patch: Row) -> Result<Vec<Row>, GatewayError> {
        let mut inner = self.lock();
        inner.ensure_online()?;
        inner.check_columns(
            table,
            patch
                .keys()
                .map(String::as_str)
                .chain(filters.iter().map(|f| f.column.as_str())),
        )?;

        let mut updated = Vec::new();
        if let Some(rows) = inner.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| matches_all(r, filters)) {
                for (k, v) in &patch {
                    row.insert(k.clone(), v.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, GatewayError> {
        let mut inner = self.lock();
        inner.ensure_online()?;
        inner.check_columns(table, filters.iter().map(|f| f.column.as_str()))?;

        let Some(rows) = inner.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !matches_all(r, filters));
        Ok(before - rows.len())
    }

    fn subscribe_inserts(&self, table: &str, filter: Filter) -> Result<Subscription, GatewayError> {
        let mut inner = self.lock();
        inner.ensure_online()?;
        inner.check_columns(table, [filter.column.as_str()])?;

        inner.next_subscription_id += 1;
        let id = inner.next_subscription_id;
        let (tx, rows) = mpsc::unbounded_channel();
        inner.subscribers.push(Subscriber {
            id,
            table: table.to_string(),
            filter,
            tx,
        });
        Ok(Subscription { id, rows })
    }

    fn unsubscribe(&self, subscription_id: u64) {
        self.lock().subscribers.retain(|s| s.id != subscription_id);
    }
}
