use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use cbdc_wallet::gateway::{row, Gateway, InMemoryGateway, PROFILES, TRANSACTIONS};
use cbdc_wallet::model::Amount;
use cbdc_wallet::notifications::{LogNotifier, NotificationCenter, Permission};
use cbdc_wallet::session::SessionManager;
use cbdc_wallet::storage::Storage;

async fn wait_for_unread(center: &NotificationCenter, expected: usize) {
    for _ in 0..100 {
        if center.unread_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} unread notifications, have {}",
        center.unread_count()
    );
}

#[tokio::test]
async fn insert_for_receiver_produces_one_unread_notification() {
    let gw = Arc::new(InMemoryGateway::new());
    let mut center = NotificationCenter::new(Arc::new(LogNotifier::new(Permission::Granted)), "LKR");
    center.start(gw.clone(), "receiver-1").unwrap();
    assert!(center.is_listening());

    gw.insert(TRANSACTIONS, row(json!({"receiver_id": "someone-else", "amount": 10})))
        .unwrap();
    gw.insert(TRANSACTIONS, row(json!({"receiver_id": "receiver-1", "amount": 200})))
        .unwrap();
    wait_for_unread(&center, 1).await;

    let list = center.list();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].message, "You received LKR 200.00");

    let id = list[0].id.clone();
    assert!(center.mark_as_read(&id));
    assert!(!center.mark_as_read(&id));
    assert_eq!(center.unread_count(), 0);
}

#[tokio::test]
async fn cleanup_stops_the_feed() {
    let gw = Arc::new(InMemoryGateway::new());
    let mut center = NotificationCenter::new(Arc::new(LogNotifier::new(Permission::Denied)), "LKR");
    center.start(gw.clone(), "receiver-1").unwrap();
    assert_eq!(gw.subscriber_count(), 1);

    center.cleanup();
    assert!(!center.is_listening());
    assert_eq!(gw.subscriber_count(), 0);

    gw.insert(TRANSACTIONS, row(json!({"receiver_id": "receiver-1", "amount": 5})))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(center.unread_count(), 0);
}

#[tokio::test]
async fn send_money_notifies_the_receiver() {
    let gw = Arc::new(InMemoryGateway::new());
    let storage = Storage::open_in_memory().unwrap();
    let mut sender = SessionManager::new(gw.clone(), Amount::from_cents(5_000_000));
    sender.register("ana@wallet.test", "secret1", "Ana").unwrap();
    let ben = gw
        .sign_up("ben@wallet.test", "secret2", row(json!({"full_name": "Ben"})))
        .unwrap();
    let ben_wallet = gw
        .rows(PROFILES)
        .into_iter()
        .find(|p| p["id"] == ben.id.as_str())
        .and_then(|p| p["wallet_address"].as_str().map(str::to_string))
        .unwrap();

    let mut bens_center =
        NotificationCenter::new(Arc::new(LogNotifier::new(Permission::Granted)), "LKR");
    bens_center.start(gw.clone(), &ben.id).unwrap();

    sender.login(&storage, "ana@wallet.test", "secret1").unwrap();
    sender
        .send_money(&storage, &ben_wallet, Amount::from_cents(7_550), Some("Rent share"))
        .unwrap();

    wait_for_unread(&bens_center, 1).await;
    assert_eq!(bens_center.list()[0].message, "You received LKR 75.50");
    assert_eq!(bens_center.list()[0].title, "Money Received!");
}
