use std::sync::Arc;

use serde_json::json;

use cbdc_wallet::contacts::{synthetic_balance, ContactLedger, LedgerError, LOCAL_ID_PREFIX};
use cbdc_wallet::gateway::{row, Gateway, InMemoryGateway, WALLET_CONTACTS, WALLET_TRANSACTIONS};
use cbdc_wallet::model::{Amount, ContactUpdate, NewContact, TransferStatus, MAIN_WALLET_ID};
use cbdc_wallet::session::SessionManager;
use cbdc_wallet::settings::BalanceFallback;
use cbdc_wallet::storage::{keys, Storage};

struct Wallet {
    gw: Arc<InMemoryGateway>,
    storage: Storage,
    session: SessionManager,
    ledger: ContactLedger,
    owner: String,
}

fn signed_in_wallet(fallback: BalanceFallback) -> Wallet {
    let gw = Arc::new(InMemoryGateway::new());
    gw.sign_up("owner@wallet.test", "secret1", row(json!({"full_name": "Owner"})))
        .unwrap();
    let storage = Storage::open_in_memory().unwrap();
    let mut session = SessionManager::new(gw.clone(), Amount::from_cents(5_000_000));
    let owner = session
        .login(&storage, "owner@wallet.test", "secret1")
        .unwrap()
        .id
        .clone();
    let ledger = ContactLedger::new(gw.clone(), fallback);
    Wallet {
        gw,
        storage,
        session,
        ledger,
        owner,
    }
}

fn contact(name: &str, address: &str, balance: Option<i64>) -> NewContact {
    NewContact {
        name: name.to_string(),
        wallet_address: address.to_string(),
        balance: balance.map(Amount::from_cents),
        ..NewContact::default()
    }
}

fn main_balance(w: &Wallet) -> Amount {
    w.session.identity().unwrap().balance
}

fn contact_balance(w: &Wallet, id: &str) -> Amount {
    w.ledger
        .contacts()
        .iter()
        .find(|c| c.id == id)
        .unwrap()
        .balance
}

#[test]
fn owner_to_contact_transfer_scenario() {
    let mut w = signed_in_wallet(BalanceFallback::Zero);
    let alice = w
        .ledger
        .add_contact(&w.storage, &w.owner, contact("Alice", "CBDCALICE01", Some(100_000)))
        .unwrap()
        .value;
    assert_eq!(main_balance(&w).to_string(), "50000.00");

    let out = w
        .ledger
        .transfer_funds(
            &w.storage,
            &mut w.session,
            &w.owner,
            MAIN_WALLET_ID,
            &alice.id,
            Amount::from_cents(20_000),
            Some("Lunch"),
        )
        .unwrap();

    assert!(!out.is_degraded());
    assert_eq!(main_balance(&w).to_string(), "49800.00");
    assert_eq!(contact_balance(&w, &alice.id).to_string(), "1200.00");
    assert_eq!(out.value.amount.to_string(), "200.00");
    assert_eq!(out.value.status, TransferStatus::Completed);
    assert_eq!(out.value.from_wallet_id, MAIN_WALLET_ID);

    // Balances and log are in the cache.
    let cached_main: Amount = w
        .storage
        .get_as(&keys::main_balance(&w.owner))
        .unwrap()
        .unwrap();
    assert_eq!(cached_main.to_string(), "49800.00");
    let log = w.ledger.transactions(&w.storage, &w.owner).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id, out.value.id);

    // Mirrored remotely.
    let mirrored = w.gw.rows(WALLET_TRANSACTIONS);
    assert_eq!(mirrored.len(), 1);
    assert_eq!(mirrored[0]["status"], "completed");
    assert_eq!(mirrored[0]["to_wallet_id"], alice.id.as_str());
}

#[test]
fn round_trip_transfer_restores_balances() {
    let mut w = signed_in_wallet(BalanceFallback::Zero);
    let bob = w
        .ledger
        .add_contact(&w.storage, &w.owner, contact("Bob", "CBDCBOB", Some(3_333)))
        .unwrap()
        .value;
    let before_main = main_balance(&w);
    let amount = Amount::from_major(12.34).unwrap();

    w.ledger
        .transfer_funds(&w.storage, &mut w.session, &w.owner, MAIN_WALLET_ID, &bob.id, amount, None)
        .unwrap();
    w.ledger
        .transfer_funds(&w.storage, &mut w.session, &w.owner, &bob.id, MAIN_WALLET_ID, amount, None)
        .unwrap();

    assert_eq!(main_balance(&w), before_main);
    assert_eq!(contact_balance(&w, &bob.id), Amount::from_cents(3_333));
    let log = w.ledger.transactions(&w.storage, &w.owner).unwrap();
    assert_eq!(log.len(), 2);
    // Newest first
    assert_eq!(log[0].from_wallet_id, bob.id);
}

#[test]
fn overdraft_fails_without_mutation() {
    let mut w = signed_in_wallet(BalanceFallback::Zero);
    let carol = w
        .ledger
        .add_contact(&w.storage, &w.owner, contact("Carol", "CBDCCAROL", Some(500)))
        .unwrap()
        .value;
    let before_main = main_balance(&w);

    let err = w
        .ledger
        .transfer_funds(
            &w.storage,
            &mut w.session,
            &w.owner,
            &carol.id,
            MAIN_WALLET_ID,
            Amount::from_cents(501),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    assert!(w.ledger.last_error().unwrap().contains("insufficient funds"));

    assert_eq!(main_balance(&w), before_main);
    assert_eq!(contact_balance(&w, &carol.id), Amount::from_cents(500));
    assert!(w.ledger.transactions(&w.storage, &w.owner).unwrap().is_empty());
    let cached_main: Amount = w
        .storage
        .get_as(&keys::main_balance(&w.owner))
        .unwrap()
        .unwrap();
    assert_eq!(cached_main, before_main);

    let err = w
        .ledger
        .transfer_funds(
            &w.storage,
            &mut w.session,
            &w.owner,
            MAIN_WALLET_ID,
            &carol.id,
            Amount::ZERO,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount));

    let err = w
        .ledger
        .transfer_funds(
            &w.storage,
            &mut w.session,
            &w.owner,
            MAIN_WALLET_ID,
            "no-such-contact",
            Amount::from_cents(1),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnknownWallet(_)));
}

#[test]
fn added_contact_keeps_assigned_balance_after_fetch() {
    let mut w = signed_in_wallet(BalanceFallback::Synthetic);
    let added = w
        .ledger
        .add_contact(&w.storage, &w.owner, contact("Dana", "CBDCDANA", Some(123_456)))
        .unwrap()
        .value;

    // The remote row does not carry the balance.
    let remote = w.gw.rows(WALLET_CONTACTS);
    assert!(remote[0].get("balance").is_none());

    let fetched = w.ledger.fetch_contacts(&w.storage, &w.owner).unwrap();
    assert!(!fetched.is_degraded());
    assert_eq!(fetched.value.len(), 1);
    assert_eq!(fetched.value[0].wallet_address, added.wallet_address);
    assert_eq!(fetched.value[0].balance, Amount::from_cents(123_456));
}

#[test]
fn duplicate_address_is_rejected_without_mutation() {
    let mut w = signed_in_wallet(BalanceFallback::Zero);
    w.ledger
        .add_contact(&w.storage, &w.owner, contact("Erin", "CBDCERIN", None))
        .unwrap();

    let err = w
        .ledger
        .add_contact(&w.storage, &w.owner, contact("Erin again", "CBDCERIN", None))
        .unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateAddress));
    assert_eq!(
        w.ledger.last_error(),
        Some("This wallet address is already in your contacts")
    );
    assert_eq!(w.ledger.contacts().len(), 1);
    assert_eq!(w.gw.rows(WALLET_CONTACTS).len(), 1);
}

#[test]
fn toggle_favorite_twice_restores_value() {
    let mut w = signed_in_wallet(BalanceFallback::Zero);
    let frank = w
        .ledger
        .add_contact(&w.storage, &w.owner, contact("Frank", "CBDCFRANK", None))
        .unwrap()
        .value;
    assert!(!frank.is_favorite);

    let once = w.ledger.toggle_favorite(&w.storage, &frank.id).unwrap();
    assert!(once.value.is_favorite);
    assert_eq!(w.gw.rows(WALLET_CONTACTS)[0]["is_favorite"], true);

    let twice = w.ledger.toggle_favorite(&w.storage, &frank.id).unwrap();
    assert!(!twice.value.is_favorite);

    assert!(matches!(
        w.ledger.toggle_favorite(&w.storage, "missing"),
        Err(LedgerError::ContactNotFound(_))
    ));
}

#[test]
fn failed_mirror_keeps_local_transfer() {
    let mut w = signed_in_wallet(BalanceFallback::Zero);
    let gus = w
        .ledger
        .add_contact(&w.storage, &w.owner, contact("Gus", "CBDCGUS", None))
        .unwrap()
        .value;

    w.gw.set_offline(true);
    let out = w
        .ledger
        .transfer_funds(
            &w.storage,
            &mut w.session,
            &w.owner,
            MAIN_WALLET_ID,
            &gus.id,
            Amount::from_cents(1_000),
            None,
        )
        .unwrap();

    assert!(out.is_degraded());
    assert_eq!(contact_balance(&w, &gus.id), Amount::from_cents(1_000));
    assert_eq!(main_balance(&w), Amount::from_cents(4_999_000));
    assert_eq!(w.ledger.transactions(&w.storage, &w.owner).unwrap().len(), 1);

    w.gw.set_offline(false);
    assert!(w.gw.rows(WALLET_TRANSACTIONS).is_empty());
}

#[test]
fn narrow_select_when_balance_column_is_missing() {
    let mut w = signed_in_wallet(BalanceFallback::Zero);
    w.gw.drop_column(WALLET_CONTACTS, "balance");
    w.ledger
        .add_contact(&w.storage, &w.owner, contact("Hana", "CBDCHANA", Some(4_200)))
        .unwrap();

    let fetched = w.ledger.fetch_contacts(&w.storage, &w.owner).unwrap();
    assert!(!fetched.is_degraded());
    assert_eq!(fetched.value[0].balance, Amount::from_cents(4_200));
}

#[test]
fn remote_balance_seeds_cache_once() {
    let mut w = signed_in_wallet(BalanceFallback::Zero);
    let inserted = w
        .gw
        .insert(
            WALLET_CONTACTS,
            row(json!({
                "user_id": w.owner,
                "name": "Ivan",
                "wallet_address": "CBDCIVAN",
                "is_favorite": false,
                "balance": 750,
            })),
        )
        .unwrap();
    let id = inserted["id"].as_str().unwrap().to_string();

    let first = w.ledger.fetch_contacts(&w.storage, &w.owner).unwrap();
    assert_eq!(first.value[0].balance.to_string(), "750.00");

    // The cache is authoritative from now on.
    w.gw
        .update(
            WALLET_CONTACTS,
            &[cbdc_wallet::gateway::Filter::eq("id", id)],
            row(json!({"balance": 9999})),
        )
        .unwrap();
    let second = w.ledger.fetch_contacts(&w.storage, &w.owner).unwrap();
    assert_eq!(second.value[0].balance.to_string(), "750.00");
}

#[test]
fn synthetic_fallback_is_persisted() {
    let mut w = signed_in_wallet(BalanceFallback::Synthetic);
    w.gw.drop_column(WALLET_CONTACTS, "balance");
    w.gw
        .insert(
            WALLET_CONTACTS,
            row(json!({
                "user_id": w.owner,
                "name": "Jun",
                "wallet_address": "CBDCJUN",
            })),
        )
        .unwrap();

    let fetched = w.ledger.fetch_contacts(&w.storage, &w.owner).unwrap();
    let expected = synthetic_balance("Jun", "CBDCJUN");
    assert_eq!(fetched.value[0].balance, expected);

    let balances: std::collections::HashMap<String, Amount> =
        w.storage.get_as(keys::BALANCES).unwrap().unwrap();
    assert_eq!(balances[&fetched.value[0].id], expected);
}

#[test]
fn unreachable_backend_serves_cached_contacts() {
    let mut w = signed_in_wallet(BalanceFallback::Zero);

    // Nothing cached yet: the fetch fails.
    w.gw.set_offline(true);
    assert!(w.ledger.fetch_contacts(&w.storage, &w.owner).is_err());
    w.gw.set_offline(false);

    w.ledger
        .add_contact(&w.storage, &w.owner, contact("Kai", "CBDCKAI", Some(900)))
        .unwrap();
    w.ledger.fetch_contacts(&w.storage, &w.owner).unwrap();

    w.gw.set_offline(true);
    let cached = w.ledger.fetch_contacts(&w.storage, &w.owner).unwrap();
    assert!(cached.is_degraded());
    assert_eq!(cached.value.len(), 1);
    assert_eq!(cached.value[0].balance, Amount::from_cents(900));
}

#[test]
fn offline_add_is_kept_locally_and_survives_refetch() {
    let mut w = signed_in_wallet(BalanceFallback::Zero);
    w.gw.set_offline(true);
    let added = w
        .ledger
        .add_contact(&w.storage, &w.owner, contact("Lee", "CBDCLEE", Some(10)))
        .unwrap();
    assert!(added.is_degraded());
    assert!(added.value.id.starts_with(LOCAL_ID_PREFIX));

    // Edits of a local-only contact stay local.
    let toggled = w.ledger.toggle_favorite(&w.storage, &added.value.id).unwrap();
    assert!(toggled.is_degraded());

    w.gw.set_offline(false);
    let fetched = w.ledger.fetch_contacts(&w.storage, &w.owner).unwrap();
    assert_eq!(fetched.value.len(), 1);
    assert_eq!(fetched.value[0].id, added.value.id);
    assert!(fetched.value[0].is_favorite);
    assert_eq!(fetched.value[0].balance, Amount::from_cents(10));
}

#[test]
fn offline_delete_stays_deleted_after_reconnect() {
    let mut w = signed_in_wallet(BalanceFallback::Synthetic);
    let added = w
        .ledger
        .add_contact(&w.storage, &w.owner, contact("Mina", "CBDCMINA", Some(700)))
        .unwrap();
    let id = added.value.id.clone();

    w.gw.set_offline(true);
    let deleted = w.ledger.delete_contact(&w.storage, &id).unwrap();
    assert!(deleted.is_degraded());

    // Still offline: the cached list no longer has the contact, but the
    // balance is held until the backend drops the row.
    let cached = w.ledger.fetch_contacts(&w.storage, &w.owner).unwrap();
    assert!(cached.is_degraded());
    assert!(cached.value.is_empty());
    let balances: std::collections::HashMap<String, Amount> =
        w.storage.get_as(keys::BALANCES).unwrap().unwrap();
    assert_eq!(balances[&id], Amount::from_cents(700));

    w.gw.set_offline(false);
    let fetched = w.ledger.fetch_contacts(&w.storage, &w.owner).unwrap();
    assert!(!fetched.is_degraded());
    assert!(fetched.value.is_empty());
    assert!(w.gw.rows(WALLET_CONTACTS).is_empty());
    let balances: std::collections::HashMap<String, Amount> =
        w.storage.get_as(keys::BALANCES).unwrap().unwrap();
    assert!(!balances.contains_key(&id));
    assert!(w
        .storage
        .get(keys::PENDING_CONTACT_CHANGES)
        .unwrap()
        .is_none());

    // A second fetch does not bring it back either.
    let again = w.ledger.fetch_contacts(&w.storage, &w.owner).unwrap();
    assert!(again.value.is_empty());
}

#[test]
fn offline_favorite_is_pushed_on_reconnect() {
    let mut w = signed_in_wallet(BalanceFallback::Zero);
    let added = w
        .ledger
        .add_contact(&w.storage, &w.owner, contact("Noor", "CBDCNOOR", Some(40)))
        .unwrap();
    let id = added.value.id.clone();

    w.gw.set_offline(true);
    let toggled = w.ledger.toggle_favorite(&w.storage, &id).unwrap();
    assert!(toggled.is_degraded());
    assert!(toggled.value.is_favorite);

    w.gw.set_offline(false);
    let fetched = w.ledger.fetch_contacts(&w.storage, &w.owner).unwrap();
    assert_eq!(fetched.value.len(), 1);
    assert!(fetched.value[0].is_favorite);
    assert_eq!(fetched.value[0].balance, Amount::from_cents(40));

    let remote = w.gw.rows(WALLET_CONTACTS);
    assert_eq!(remote[0]["is_favorite"], json!(true));
    assert!(w
        .storage
        .get(keys::PENDING_CONTACT_CHANGES)
        .unwrap()
        .is_none());
}

#[test]
fn offline_edits_merge_before_reaching_the_backend() {
    let mut w = signed_in_wallet(BalanceFallback::Zero);
    let added = w
        .ledger
        .add_contact(&w.storage, &w.owner, contact("Omar", "CBDCOMAR", None))
        .unwrap();
    let id = added.value.id.clone();

    w.gw.set_offline(true);
    for update in [
        ContactUpdate {
            notes: Some("met at work".to_string()),
            ..ContactUpdate::default()
        },
        ContactUpdate {
            name: Some("Omar K".to_string()),
            ..ContactUpdate::default()
        },
    ] {
        assert!(w
            .ledger
            .update_contact(&w.storage, &id, update)
            .unwrap()
            .is_degraded());
    }

    w.gw.set_offline(false);
    let fetched = w.ledger.fetch_contacts(&w.storage, &w.owner).unwrap();
    assert_eq!(fetched.value[0].name, "Omar K");
    assert_eq!(fetched.value[0].notes.as_deref(), Some("met at work"));

    let remote = w.gw.rows(WALLET_CONTACTS);
    assert_eq!(remote[0]["name"], json!("Omar K"));
    assert_eq!(remote[0]["notes"], json!("met at work"));
}
