use std::sync::Arc;

use serde_json::Value;

use cbdc_wallet::gateway::{InMemoryGateway, PROFILES, TRANSACTIONS};
use cbdc_wallet::model::Amount;
use cbdc_wallet::session::{SessionError, SessionManager};
use cbdc_wallet::storage::{keys, Storage};

fn wallet_address_of(gw: &InMemoryGateway, email: &str) -> String {
    gw.rows(PROFILES)
        .into_iter()
        .find(|p| p["email"] == email)
        .and_then(|p| p["wallet_address"].as_str().map(str::to_string))
        .unwrap()
}

fn setup() -> (Arc<InMemoryGateway>, SessionManager, Storage) {
    let gw = Arc::new(InMemoryGateway::new());
    let mut manager = SessionManager::new(gw.clone(), Amount::from_cents(5_000_000));
    manager.register("ana@wallet.test", "secret1", "Ana").unwrap();
    manager.register("ben@wallet.test", "secret2", "Ben").unwrap();
    (gw, manager, Storage::open_in_memory().unwrap())
}

#[test]
fn register_does_not_sign_in() {
    let (_gw, mut manager, storage) = setup();
    assert!(manager.resolve_session(&storage).unwrap().is_none());

    let err = manager
        .register("ana@wallet.test", "secret1", "Ana")
        .unwrap_err();
    assert!(matches!(err, SessionError::Gateway(_)));
    assert_eq!(manager.last_error(), Some("User already registered"));
}

#[test]
fn login_merges_profile() {
    let (_gw, mut manager, storage) = setup();
    let identity = manager
        .login(&storage, "ana@wallet.test", "secret1")
        .unwrap()
        .clone();
    assert_eq!(identity.full_name.as_deref(), Some("Ana"));
    assert_eq!(identity.email.as_deref(), Some("ana@wallet.test"));
    assert!(identity.wallet_address.unwrap().starts_with("CBDC"));
    assert_eq!(identity.balance.to_string(), "50000.00");
    assert!(manager.last_error().is_none());
}

#[test]
fn send_money_to_registered_wallet() {
    let (gw, mut manager, storage) = setup();
    let ben_wallet = wallet_address_of(&gw, "ben@wallet.test");
    manager.login(&storage, "ana@wallet.test", "secret1").unwrap();

    let sent = manager
        .send_money(&storage, &ben_wallet, Amount::from_cents(15_000), None)
        .unwrap();
    assert_eq!(sent.new_balance.to_string(), "49850.00");

    let rows = gw.rows(TRANSACTIONS);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["receiver_id"], Value::String(sent.receiver_id.clone()));
    assert_eq!(rows[0]["receiver_wallet_id"], ben_wallet.as_str());
    assert_eq!(rows[0]["type"], "transfer");
    assert_eq!(rows[0]["description"], "Wallet Transfer");

    let ana_id = manager.identity().unwrap().id.clone();
    let cached: Amount = storage
        .get_as(&keys::main_balance(&ana_id))
        .unwrap()
        .unwrap();
    assert_eq!(cached, sent.new_balance);
}

#[test]
fn send_money_rejections() {
    let (gw, mut manager, storage) = setup();
    let ana_wallet = wallet_address_of(&gw, "ana@wallet.test");
    let ben_wallet = wallet_address_of(&gw, "ben@wallet.test");

    let err = manager
        .send_money(&storage, &ben_wallet, Amount::from_cents(1), None)
        .unwrap_err();
    assert!(matches!(err, SessionError::NotAuthenticated));

    manager.login(&storage, "ana@wallet.test", "secret1").unwrap();

    let err = manager
        .send_money(&storage, "CBDCNOBODY", Amount::from_cents(1), None)
        .unwrap_err();
    assert!(matches!(err, SessionError::RecipientNotFound));
    assert_eq!(manager.last_error(), Some("Recipient wallet address not found."));

    let err = manager
        .send_money(&storage, &ana_wallet, Amount::from_cents(1), None)
        .unwrap_err();
    assert!(matches!(err, SessionError::SelfTransfer));
    assert_eq!(manager.last_error(), Some("You cannot send money to yourself."));

    let err = manager
        .send_money(&storage, &ben_wallet, Amount::from_cents(10_000_000), None)
        .unwrap_err();
    assert!(matches!(err, SessionError::InsufficientFunds { .. }));

    let err = manager
        .send_money(&storage, &ben_wallet, Amount::from_cents(-5), None)
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidInput(_)));

    assert!(gw.rows(TRANSACTIONS).is_empty());
    assert_eq!(manager.identity().unwrap().balance.to_string(), "50000.00");
}

#[test]
fn balance_survives_a_new_manager() {
    let (gw, mut manager, storage) = setup();
    manager.login(&storage, "ana@wallet.test", "secret1").unwrap();
    manager
        .adjust_balance(&storage, Amount::from_cents(-100))
        .unwrap();

    // Same session and cache, fresh process state.
    let mut restarted = SessionManager::new(gw.clone(), Amount::from_cents(5_000_000));
    let identity = restarted.resolve_session(&storage).unwrap().unwrap();
    assert_eq!(identity.balance.to_string(), "49999.00");
}
