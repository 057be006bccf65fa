//! Shared application state and WebSocket event types.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::contacts::ContactLedger;
use crate::gateway::Gateway;
use crate::model::{Amount, Notification};
use crate::notifications::{LogNotifier, NotificationCenter, Notifier, Permission};
use crate::session::SessionManager;
use crate::settings::WalletSettings;
use crate::storage::{Storage, StorageError};
use crate::theme::ThemePreference;

/// Events broadcast to connected WebSocket clients.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    /// First frame on every connection: where the wallet stands right now.
    Snapshot {
        signed_in: bool,
        balance: Option<Amount>,
        unread_count: usize,
    },
    Notification {
        notification: Notification,
    },
    BalanceChanged {
        wallet_id: String,
        balance: Amount,
    },
    /// The connection fell behind the broadcast channel and `count` events
    /// were dropped. Clients refetch balances and notifications.
    EventsMissed {
        count: u64,
    },
}

pub struct AppState {
    pub storage: Storage,
    pub gateway: Arc<dyn Gateway>,
    /// `"remote"` or `"in_memory"`, reported by the health check.
    pub gateway_kind: &'static str,
    pub settings: WalletSettings,
    pub session: SessionManager,
    pub contacts: ContactLedger,
    pub notifications: NotificationCenter,
    pub theme: ThemePreference,
    pub ws_tx: broadcast::Sender<WsEvent>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        storage: Storage,
        gateway: Arc<dyn Gateway>,
        gateway_kind: &'static str,
        settings: WalletSettings,
        ws_tx: broadcast::Sender<WsEvent>,
    ) -> Result<Self, StorageError> {
        let theme = ThemePreference::init(&storage, false)?;
        let notifier = Arc::new(BroadcastNotifier::new(ws_tx.clone()));
        Ok(Self {
            session: SessionManager::new(Arc::clone(&gateway), settings.default_balance),
            contacts: ContactLedger::new(Arc::clone(&gateway), settings.balance_fallback),
            notifications: NotificationCenter::new(notifier, &settings.currency),
            storage,
            gateway,
            gateway_kind,
            settings,
            theme,
            ws_tx,
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn snapshot(&self) -> WsEvent {
        let identity = self.session.identity();
        WsEvent::Snapshot {
            signed_in: identity.is_some(),
            balance: identity.map(|i| i.balance),
            unread_count: self.notifications.unread_count(),
        }
    }

    /// Push a balance update to WebSocket clients. Having no clients is fine.
    pub fn broadcast_balance(&self, wallet_id: &str, balance: Amount) {
        let _ = self.ws_tx.send(WsEvent::BalanceChanged {
            wallet_id: wallet_id.to_string(),
            balance,
        });
    }
}

pub type SharedState = Arc<Mutex<AppState>>;

/// Platform notifier for the server: platform notifications go to the log,
/// every in-app notification is pushed to WebSocket clients. Permission
/// requests are granted.
pub struct BroadcastNotifier {
    log: LogNotifier,
    ws_tx: broadcast::Sender<WsEvent>,
}

impl BroadcastNotifier {
    pub fn new(ws_tx: broadcast::Sender<WsEvent>) -> Self {
        Self {
            log: LogNotifier::new(Permission::Granted),
            ws_tx,
        }
    }
}

impl Notifier for BroadcastNotifier {
    fn permission(&self) -> Permission {
        self.log.permission()
    }

    fn request_permission(&self) -> Permission {
        self.log.request_permission()
    }

    fn show(&self, notification: &Notification) {
        self.log.show(notification);
    }

    fn received(&self, notification: &Notification) {
        let _ = self.ws_tx.send(WsEvent::Notification {
            notification: notification.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ws_event_wire_shapes() {
        let snapshot = WsEvent::Snapshot {
            signed_in: true,
            balance: Some(Amount::from_cents(4_980_000)),
            unread_count: 2,
        };
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            json!({"type": "snapshot", "signed_in": true, "balance": 49800.0, "unread_count": 2})
        );

        let signed_out = WsEvent::Snapshot {
            signed_in: false,
            balance: None,
            unread_count: 0,
        };
        assert_eq!(serde_json::to_value(&signed_out).unwrap()["balance"], json!(null));

        let changed = WsEvent::BalanceChanged {
            wallet_id: "main-wallet".into(),
            balance: Amount::from_cents(150),
        };
        assert_eq!(
            serde_json::to_value(&changed).unwrap(),
            json!({"type": "balance_changed", "wallet_id": "main-wallet", "balance": 1.5})
        );

        assert_eq!(
            serde_json::to_value(&WsEvent::EventsMissed { count: 7 }).unwrap(),
            json!({"type": "events_missed", "count": 7})
        );
    }
}
