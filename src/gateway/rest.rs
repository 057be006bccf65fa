//! HTTP client for a hosted backend exposing a PostgREST-style row API
//! (`/rest/v1`) and a GoTrue-style auth API (`/auth/v1`).
//!
//! Calls are blocking (`ureq`). The change feed is served by
//! [`super::realtime`] on a background task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::realtime::{self, ChannelConfig};
use super::{AuthUser, Filter, Gateway, GatewayError, Row, Select, Session, Subscription};

const REQUEST_TIMEOUT_SECS: u64 = 15;

pub struct RestGateway {
    base_url: String,
    api_key: String,
    agent: ureq::Agent,
    session: Mutex<Option<Session>>,
    listeners: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_subscription_id: AtomicU64,
}

impl RestGateway {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            agent,
            session: Mutex::new(None),
            listeners: Mutex::new(HashMap::new()),
            next_subscription_id: AtomicU64::new(1),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bearer token: the signed-in user's access token, else the API key.
    fn bearer(&self) -> String {
        let token = self
            .session()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.api_key.clone());
        format!("Bearer {token}")
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &format!("{}{}", self.base_url, path))
            .set("apikey", &self.api_key)
            .set("Authorization", &self.bearer())
    }

    fn table_request(&self, method: &str, table: &str, filters: &[Filter]) -> ureq::Request {
        let mut req = self.request(method, &format!("/rest/v1/{table}"));
        for f in filters {
            req = req.query(&f.column, &format!("eq.{}", f.value_text()));
        }
        req
    }
}

// ---------------------------------------------------------------------------
// Response handling
// ---------------------------------------------------------------------------

fn map_error(err: ureq::Error) -> GatewayError {
    match err {
        ureq::Error::Status(status, response) => {
            let body: Value = response.into_json().unwrap_or(Value::Null);
            classify(status, &body)
        }
        ureq::Error::Transport(t) => GatewayError::Transport(t.to_string()),
    }
}

/// Turn an error status and body into a [`GatewayError`].
pub(crate) fn classify(status: u16, body: &Value) -> GatewayError {
    let code = body.get("code").and_then(Value::as_str).unwrap_or_default();
    let message = ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .unwrap_or("request failed")
        .to_string();

    match (status, code) {
        // Column missing from the schema cache / undefined column / undefined table
        (_, "PGRST204") | (_, "42703") | (_, "PGRST205") | (_, "42P01") => {
            GatewayError::Schema(message)
        }
        (_, "PGRST116") => GatewayError::NotFound(message),
        (_, "23505") | (_, "23503") | (409, _) => GatewayError::Conflict(message),
        (400, _) if body.get("error").and_then(Value::as_str) == Some("invalid_grant") => {
            GatewayError::Auth(message)
        }
        (401, _) | (403, _) | (422, _) => GatewayError::Auth(message),
        (404, _) => GatewayError::NotFound(message),
        _ => GatewayError::Rejected { status, message },
    }
}

fn read_json(response: ureq::Response) -> Result<Value, GatewayError> {
    if response.status() == 204 {
        return Ok(Value::Null);
    }
    response
        .into_json()
        .map_err(|e| GatewayError::Decode(e.to_string()))
}

fn read_rows(response: ureq::Response) -> Result<Vec<Row>, GatewayError> {
    match read_json(response)? {
        Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => Ok(map),
                other => Err(GatewayError::Decode(format!("expected row object, got {other}"))),
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(GatewayError::Decode(format!("expected row array, got {other}"))),
    }
}

/// Parse an auth user object (`{id, email, user_metadata}`).
pub(crate) fn parse_user(value: &Value) -> Result<AuthUser, GatewayError> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Decode("auth user without id".to_string()))?;
    Ok(AuthUser {
        id: id.to_string(),
        email: value.get("email").and_then(Value::as_str).map(str::to_string),
        metadata: value
            .get("user_metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    })
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

impl Gateway for RestGateway {
    fn sign_up(&self, email: &str, password: &str, metadata: Row) -> Result<AuthUser, GatewayError> {
        let body = json!({ "email": email, "password": password, "data": metadata });
        let response = self
            .request("POST", "/auth/v1/signup")
            .send_json(body)
            .map_err(map_error)?;
        let value = read_json(response)?;
        // Auto-confirming deployments answer with a session wrapping the user.
        parse_user(value.get("user").unwrap_or(&value))
    }

    fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        let response = self
            .request("POST", "/auth/v1/token")
            .query("grant_type", "password")
            .send_json(json!({ "email": email, "password": password }))
            .map_err(map_error)?;
        let value = read_json(response)?;
        let access_token = value
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Decode("token response without access_token".into()))?
            .to_string();
        let user = parse_user(value.get("user").unwrap_or(&Value::Null))?;
        let session = Session { access_token, user };
        *self.session() = Some(session.clone());
        Ok(session)
    }

    fn get_session(&self) -> Result<Option<Session>, GatewayError> {
        Ok(self.session().clone())
    }

    fn sign_out(&self) -> Result<(), GatewayError> {
        if self.session().is_none() {
            return Ok(());
        }
        self.request("POST", "/auth/v1/logout")
            .call()
            .map_err(map_error)?;
        *self.session() = None;
        Ok(())
    }

    fn select(&self, query: &Select) -> Result<Vec<Row>, GatewayError> {
        let mut req = self
            .table_request("GET", &query.table, &query.filters)
            .query("select", &query.column_list());
        if let Some((column, ascending)) = &query.order {
            let dir = if *ascending { "asc" } else { "desc" };
            req = req.query("order", &format!("{column}.{dir}"));
        }
        if let Some(limit) = query.limit {
            req = req.query("limit", &limit.to_string());
        }
        read_rows(req.call().map_err(map_error)?)
    }

    fn insert(&self, table: &str, row: Row) -> Result<Row, GatewayError> {
        let response = self
            .table_request("POST", table, &[])
            .set("Prefer", "return=representation")
            .send_json(Value::Object(row))
            .map_err(map_error)?;
        read_rows(response)?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Decode(format!("insert into {table} returned no row")))
    }

    fn update(&self, table: &str, filters: &[Filter], patch: Row) -> Result<Vec<Row>, GatewayError> {
        let response = self
            .table_request("PATCH", table, filters)
            .set("Prefer", "return=representation")
            .send_json(Value::Object(patch))
            .map_err(map_error)?;
        read_rows(response)
    }

    fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, GatewayError> {
        let response = self
            .table_request("DELETE", table, filters)
            .set("Prefer", "return=representation")
            .call()
            .map_err(map_error)?;
        Ok(read_rows(response)?.len())
    }

    fn subscribe_inserts(&self, table: &str, filter: Filter) -> Result<Subscription, GatewayError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| GatewayError::Transport(format!("no async runtime for change feed: {e}")))?;

        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rows) = mpsc::unbounded_channel();
        let config = ChannelConfig {
            socket_url: realtime::socket_url(&self.base_url, &self.api_key),
            topic: format!("realtime:{table}-channel-{id}"),
            table: table.to_string(),
            filter,
            access_token: self
                .session()
                .as_ref()
                .map(|s| s.access_token.clone())
                .unwrap_or_else(|| self.api_key.clone()),
        };
        let handle = runtime.spawn(realtime::listen(config, tx));
        self.listeners().insert(id, handle);
        Ok(Subscription { id, rows })
    }

    fn unsubscribe(&self, subscription_id: u64) {
        if let Some(handle) = self.listeners().remove(&subscription_id) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_schema_errors() {
        let body = json!({
            "code": "PGRST204",
            "message": "Could not find the 'balance' column of 'wallet_contacts' in the schema cache"
        });
        assert!(classify(400, &body).is_schema_error());
        assert!(classify(400, &json!({"code": "42703", "message": "column x does not exist"}))
            .is_schema_error());
    }

    #[test]
    fn test_classify_auth_and_conflict() {
        let bad_login = json!({"error": "invalid_grant", "error_description": "Invalid login credentials"});
        assert_eq!(
            classify(400, &bad_login),
            GatewayError::Auth("Invalid login credentials".to_string())
        );
        assert!(matches!(
            classify(409, &json!({"code": "23505", "message": "duplicate key"})),
            GatewayError::Conflict(_)
        ));
        assert!(matches!(
            classify(500, &Value::Null),
            GatewayError::Rejected { status: 500, .. }
        ));
    }

    #[test]
    fn test_parse_user() {
        let user = parse_user(&json!({
            "id": "abc",
            "email": "a@b.c",
            "user_metadata": {"full_name": "Ana"}
        }))
        .unwrap();
        assert_eq!(user.id, "abc");
        assert_eq!(user.metadata["full_name"], "Ana");
        assert!(parse_user(&json!({})).is_err());
    }

    #[test]
    fn test_unreachable_backend_is_transport_error() {
        // Port 9 (discard) on localhost is not expected to serve HTTP.
        let gw = RestGateway::new("http://127.0.0.1:9", "anon");
        let err = gw.select(&Select::from("profiles")).unwrap_err();
        assert!(err.is_unreachable(), "got {err:?}");
    }
}
