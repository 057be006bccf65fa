//! Incoming-transfer notifications.
//!
//! [`NotificationCenter::start`] subscribes to inserts on `transactions`
//! whose `receiver_id` is the signed-in user. Each insert becomes an unread
//! in-app notification and, when the platform has granted permission, a
//! platform notification through the [`Notifier`]. The list lives for the
//! session only; nothing is replayed after a reconnect.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::gateway::{Filter, Gateway, GatewayError, Row, TRANSACTIONS};
use crate::model::{new_id, now_secs, Amount, Notification, NotificationKind};

#[derive(Debug)]
pub enum NotificationError {
    Gateway(GatewayError),
    /// `start` was called outside a tokio runtime.
    NoRuntime(String),
}

impl std::fmt::Display for NotificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationError::Gateway(e) => write!(f, "notification feed: {e}"),
            NotificationError::NoRuntime(e) => write!(f, "notification feed needs a runtime: {e}"),
        }
    }
}

impl std::error::Error for NotificationError {}

impl From<GatewayError> for NotificationError {
    fn from(e: GatewayError) -> Self {
        NotificationError::Gateway(e)
    }
}

// ---------------------------------------------------------------------------
// Platform notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Not asked yet.
    Default,
    Granted,
    Denied,
}

/// The platform's notification facility.
pub trait Notifier: Send + Sync {
    fn permission(&self) -> Permission;

    /// Prompt for permission and return the answer.
    fn request_permission(&self) -> Permission;

    /// Raise a platform notification. Only called while permission is
    /// granted.
    fn show(&self, notification: &Notification);

    /// Called for every in-app notification, whatever the permission.
    fn received(&self, _notification: &Notification) {}
}

/// Notifier that writes platform notifications to the log. A permission
/// request is answered with `answer`.
pub struct LogNotifier {
    permission: Mutex<Permission>,
    answer: Permission,
}

impl LogNotifier {
    pub fn new(answer: Permission) -> Self {
        Self {
            permission: Mutex::new(Permission::Default),
            answer,
        }
    }

    fn state(&self) -> MutexGuard<'_, Permission> {
        self.permission.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Notifier for LogNotifier {
    fn permission(&self) -> Permission {
        *self.state()
    }

    fn request_permission(&self) -> Permission {
        let mut state = self.state();
        *state = self.answer;
        *state
    }

    fn show(&self, notification: &Notification) {
        crate::wlog!("notify: {} - {}", notification.title, notification.message);
    }
}

// ---------------------------------------------------------------------------
// Notification list
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct NotificationLog {
    /// Newest first.
    items: Vec<Notification>,
    unread: usize,
}

fn lock(log: &Mutex<NotificationLog>) -> MutexGuard<'_, NotificationLog> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Turn an inserted `transactions` row into a notification and deliver it.
fn relay_insert(
    log: &Mutex<NotificationLog>,
    notifier: &dyn Notifier,
    currency: &str,
    row: &Row,
) -> Notification {
    let id = match row.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => new_id(),
    };
    let amount = match row.get("amount") {
        Some(v) => serde_json::from_value::<Amount>(v.clone())
            .map(|a| a.to_string())
            .unwrap_or_else(|_| v.to_string()),
        None => "0.00".to_string(),
    };
    let notification = Notification {
        id,
        title: "Money Received!".to_string(),
        message: format!("You received {currency} {amount}"),
        kind: NotificationKind::Success,
        timestamp: now_secs(),
        read: false,
    };

    {
        let mut log = lock(log);
        log.items.insert(0, notification.clone());
        log.unread += 1;
    }
    notifier.received(&notification);
    if notifier.permission() == Permission::Granted {
        notifier.show(&notification);
    }
    notification
}

// ---------------------------------------------------------------------------
// Center
// ---------------------------------------------------------------------------

struct Feed {
    gateway: Arc<dyn Gateway>,
    subscription_id: u64,
    task: JoinHandle<()>,
}

pub struct NotificationCenter {
    log: Arc<Mutex<NotificationLog>>,
    notifier: Arc<dyn Notifier>,
    currency: String,
    feed: Option<Feed>,
}

impl NotificationCenter {
    pub fn new(notifier: Arc<dyn Notifier>, currency: &str) -> Self {
        Self {
            log: Arc::new(Mutex::new(NotificationLog::default())),
            notifier,
            currency: currency.to_string(),
            feed: None,
        }
    }

    /// Subscribe to transfers received by `user_id`. An empty id does
    /// nothing. A previous subscription is replaced.
    pub fn start(&mut self, gateway: Arc<dyn Gateway>, user_id: &str) -> Result<(), NotificationError> {
        if user_id.is_empty() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| NotificationError::NoRuntime(e.to_string()))?;
        self.cleanup();

        let mut subscription =
            gateway.subscribe_inserts(TRANSACTIONS, Filter::eq("receiver_id", user_id))?;
        let log = Arc::clone(&self.log);
        let notifier = Arc::clone(&self.notifier);
        let currency = self.currency.clone();
        let task = runtime.spawn(async move {
            while let Some(row) = subscription.rows.recv().await {
                relay_insert(&log, notifier.as_ref(), &currency, &row);
            }
        });

        crate::wlog!(
            "notifications: listening for transfers to {}",
            crate::logging::user(user_id)
        );
        self.feed = Some(Feed {
            gateway,
            subscription_id: subscription.id,
            task,
        });
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.feed.is_some()
    }

    /// Record a received transfer as if it had arrived on the feed.
    pub fn handle_new_transaction(&self, row: &Row) -> Notification {
        relay_insert(&self.log, self.notifier.as_ref(), &self.currency, row)
    }

    /// Newest first.
    pub fn list(&self) -> Vec<Notification> {
        lock(&self.log).items.clone()
    }

    pub fn unread_count(&self) -> usize {
        lock(&self.log).unread
    }

    /// Mark one notification read. Returns false when it is unknown or was
    /// already read.
    pub fn mark_as_read(&self, id: &str) -> bool {
        let mut log = lock(&self.log);
        let Some(item) = log.items.iter_mut().find(|n| n.id == id) else {
            return false;
        };
        if item.read {
            return false;
        }
        item.read = true;
        log.unread = log.unread.saturating_sub(1);
        true
    }

    /// Returns how many notifications changed.
    pub fn mark_all_as_read(&self) -> usize {
        let mut log = lock(&self.log);
        let mut changed = 0;
        for item in log.items.iter_mut().filter(|n| !n.read) {
            item.read = true;
            changed += 1;
        }
        log.unread = 0;
        changed
    }

    pub fn permission(&self) -> Permission {
        self.notifier.permission()
    }

    /// Ask for platform permission if it has not been asked yet.
    pub fn request_permission(&self) -> Permission {
        match self.notifier.permission() {
            Permission::Default => self.notifier.request_permission(),
            settled => settled,
        }
    }

    /// Drop the subscription and stop the listener.
    pub fn cleanup(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.gateway.unsubscribe(feed.subscription_id);
            feed.task.abort();
            crate::wlog!("notifications: feed stopped");
        }
    }

    /// Forget all notifications (end of session).
    pub fn clear(&self) {
        let mut log = lock(&self.log);
        log.items.clear();
        log.unread = 0;
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::row;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        shown: Mutex<Vec<String>>,
        received: Mutex<usize>,
        granted: bool,
    }

    impl Notifier for Recorder {
        fn permission(&self) -> Permission {
            if self.granted {
                Permission::Granted
            } else {
                Permission::Denied
            }
        }
        fn request_permission(&self) -> Permission {
            self.permission()
        }
        fn show(&self, n: &Notification) {
            self.shown.lock().unwrap().push(n.message.clone());
        }
        fn received(&self, _n: &Notification) {
            *self.received.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_new_transaction_becomes_unread_notification() {
        let recorder = Arc::new(Recorder {
            granted: true,
            ..Recorder::default()
        });
        let center = NotificationCenter::new(recorder.clone(), "LKR");
        let n = center.handle_new_transaction(&row(json!({"id": "t1", "amount": 200})));

        assert_eq!(n.title, "Money Received!");
        assert_eq!(n.message, "You received LKR 200.00");
        assert_eq!(n.kind, NotificationKind::Success);
        assert_eq!(center.unread_count(), 1);
        assert_eq!(recorder.shown.lock().unwrap().len(), 1);
        assert_eq!(*recorder.received.lock().unwrap(), 1);
    }

    #[test]
    fn test_platform_notification_needs_permission() {
        let recorder = Arc::new(Recorder::default());
        let center = NotificationCenter::new(recorder.clone(), "LKR");
        center.handle_new_transaction(&row(json!({"id": "t1", "amount": "5"})));
        assert!(recorder.shown.lock().unwrap().is_empty());
        assert_eq!(*recorder.received.lock().unwrap(), 1);
    }

    #[test]
    fn test_mark_read_counts_once() {
        let center = NotificationCenter::new(Arc::new(LogNotifier::new(Permission::Denied)), "LKR");
        center.handle_new_transaction(&row(json!({"id": "a", "amount": 1})));
        center.handle_new_transaction(&row(json!({"id": "b", "amount": 2})));
        assert_eq!(center.list()[0].id, "b");

        assert!(center.mark_as_read("a"));
        assert!(!center.mark_as_read("a"));
        assert!(!center.mark_as_read("missing"));
        assert_eq!(center.unread_count(), 1);

        assert_eq!(center.mark_all_as_read(), 1);
        assert_eq!(center.unread_count(), 0);
        assert!(center.list().iter().all(|n| n.read));
    }

    #[test]
    fn test_request_permission_only_prompts_once() {
        let center = NotificationCenter::new(Arc::new(LogNotifier::new(Permission::Granted)), "LKR");
        assert_eq!(center.permission(), Permission::Default);
        assert_eq!(center.request_permission(), Permission::Granted);

        let denied = NotificationCenter::new(Arc::new(LogNotifier::new(Permission::Denied)), "LKR");
        assert_eq!(denied.request_permission(), Permission::Denied);
        assert_eq!(denied.request_permission(), Permission::Denied);
    }

    #[test]
    fn test_start_with_empty_user_is_noop() {
        let mut center = NotificationCenter::new(Arc::new(LogNotifier::new(Permission::Denied)), "LKR");
        let gw = Arc::new(crate::gateway::InMemoryGateway::new());
        center.start(gw.clone(), "").unwrap();
        assert!(!center.is_listening());
        assert_eq!(gw.subscriber_count(), 0);
    }
}
