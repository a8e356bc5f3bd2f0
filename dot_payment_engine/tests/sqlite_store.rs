//! SQLite store semantics: idempotent inserts, the atomic credit-and-flip, the withdrawal
//! status CAS and the append-only ledger.

use dot_payment_engine::{
    db_types::{EntryStatus, NewLedgerEntry, NewOrder, OrderId, OrderUpdate, PaymentStatus, WithdrawalStatus},
    traits::{PaymentStore, PaymentStoreError},
    SqliteDatabase,
};
use dpg_common::TokenAmount;

mod support;

use support::prepare_env::prepare_test_env;

async fn test_db(name: &str) -> SqliteDatabase {
    let url = format!("sqlite://../data/test_store_{name}.db");
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

fn new_order(id: &str, account: &str, amount: f64) -> NewOrder {
    NewOrder::new(OrderId(id.to_string()), account.to_string(), "treasury".to_string())
        .with_amount(TokenAmount::from(amount))
        .with_currency("DOT")
}

#[tokio::test]
async fn insert_is_idempotent() {
    let db = test_db("idempotent").await;
    let (order, inserted) = db.insert_order(new_order("o-1", "acc-1", 10.0)).await.unwrap();
    assert!(inserted);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.withdrawal_status, WithdrawalStatus::Waiting);
    assert!(order.repaid_amount.is_zero());

    let (again, inserted) = db.insert_order(new_order("o-1", "acc-other", 99.0)).await.unwrap();
    assert!(!inserted);
    // The original row is untouched.
    assert_eq!(again.id, order.id);
    assert_eq!(again.payment_account, "acc-1");
}

#[tokio::test]
async fn lookups_by_id_and_account() {
    let db = test_db("lookups").await;
    db.insert_order(new_order("o-2", "acc-2", 10.0)).await.unwrap();
    let by_id = db.fetch_order_by_order_id(&OrderId("o-2".into())).await.unwrap();
    assert!(by_id.is_some());
    let by_account = db.fetch_order_by_payment_account("acc-2").await.unwrap();
    assert_eq!(by_account.unwrap().order_id, OrderId("o-2".into()));
    assert!(db.fetch_order_by_order_id(&OrderId("missing".into())).await.unwrap().is_none());
    assert!(db.fetch_order_by_payment_account("acc-missing").await.unwrap().is_none());
}

#[tokio::test]
async fn update_touches_only_merchant_fields() {
    let db = test_db("update").await;
    db.insert_order(new_order("o-3", "acc-3", 10.0)).await.unwrap();
    let update = OrderUpdate {
        new_amount: Some(TokenAmount::from(25.0)),
        new_currency: Some("USDt".to_string()),
        new_callback: Some("https://merchant.example/hook".to_string()),
    };
    let updated = db.update_order(&OrderId("o-3".into()), update).await.unwrap();
    assert_eq!(updated.amount, Some(TokenAmount::from(25.0)));
    assert_eq!(updated.currency.as_deref(), Some("USDt"));
    assert_eq!(updated.callback.as_deref(), Some("https://merchant.example/hook"));
    assert_eq!(updated.payment_account, "acc-3");

    let err = db.update_order(&OrderId("o-3".into()), OrderUpdate::default()).await.unwrap_err();
    assert!(matches!(err, PaymentStoreError::UpdateNoOp));
    let err = db
        .update_order(&OrderId("missing".into()), OrderUpdate { new_amount: Some(TokenAmount::from(1.0)), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentStoreError::OrderNotFound(_)));
}

#[tokio::test]
async fn credit_accumulates_and_flips_exactly_once() {
    let db = test_db("credit").await;
    db.insert_order(new_order("o-4", "acc-4", 100.0)).await.unwrap();
    let id = OrderId("o-4".into());

    let first = db.credit_order(&id, TokenAmount::from(40.0)).await.unwrap();
    assert!(!first.newly_paid);
    assert_eq!(first.order.payment_status, PaymentStatus::Pending);
    assert_eq!(first.order.repaid_amount, TokenAmount::from(40.0));

    let second = db.credit_order(&id, TokenAmount::from(60.0)).await.unwrap();
    assert!(second.newly_paid);
    assert_eq!(second.order.payment_status, PaymentStatus::Paid);
    assert_eq!(second.order.repaid_amount, TokenAmount::from(100.0));

    // Further credits keep accumulating but never report a second flip.
    let third = db.credit_order(&id, TokenAmount::from(5.0)).await.unwrap();
    assert!(!third.newly_paid);
    assert_eq!(third.order.payment_status, PaymentStatus::Paid);
    assert_eq!(third.order.repaid_amount, TokenAmount::from(105.0));
}

#[tokio::test]
async fn credit_without_target_amount_stays_pending() {
    let db = test_db("credit_no_amount").await;
    let order = NewOrder::new(OrderId("o-5".into()), "acc-5".to_string(), "treasury".to_string())
        .with_currency("DOT");
    db.insert_order(order).await.unwrap();
    let result = db.credit_order(&OrderId("o-5".into()), TokenAmount::from(10.0)).await.unwrap();
    assert!(!result.newly_paid);
    assert_eq!(result.order.payment_status, PaymentStatus::Pending);
    assert_eq!(result.order.repaid_amount, TokenAmount::from(10.0));
}

#[tokio::test]
async fn repaid_amount_never_loses_an_update_under_concurrency() {
    let db = test_db("concurrent_credit").await;
    db.insert_order(new_order("o-6", "acc-6", 1_000_000.0)).await.unwrap();
    let id = OrderId("o-6".into());
    let mut tasks = Vec::new();
    for _ in 0..10 {
        let db = db.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                db.credit_order(&id, TokenAmount::from(1.0)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    let order = db.fetch_order_by_order_id(&id).await.unwrap().unwrap();
    assert_eq!(order.repaid_amount, TokenAmount::from(100.0));
}

#[tokio::test]
async fn withdrawal_cas_only_wins_from_the_expected_state() {
    let db = test_db("withdrawal_cas").await;
    db.insert_order(new_order("o-7", "acc-7", 10.0)).await.unwrap();
    let id = OrderId("o-7".into());

    let won = db
        .transition_withdrawal_status(&id, WithdrawalStatus::Waiting, WithdrawalStatus::Completed)
        .await
        .unwrap();
    assert_eq!(won.unwrap().withdrawal_status, WithdrawalStatus::Completed);

    // Second CAS from `waiting` loses: the order is no longer in that state.
    let lost = db
        .transition_withdrawal_status(&id, WithdrawalStatus::Waiting, WithdrawalStatus::Failed)
        .await
        .unwrap();
    assert!(lost.is_none());
    let order = db.fetch_order_by_order_id(&id).await.unwrap().unwrap();
    assert_eq!(order.withdrawal_status, WithdrawalStatus::Completed);

    let set = db.set_withdrawal_status(&id, WithdrawalStatus::Failed).await.unwrap();
    assert_eq!(set.withdrawal_status, WithdrawalStatus::Failed);
}

#[tokio::test]
async fn ledger_is_append_only_and_queryable_by_account() {
    let db = test_db("ledger").await;
    let entry = NewLedgerEntry {
        block_number: 12,
        position_in_block: 3,
        transaction_bytes: "0xdeadbeef".to_string(),
        sender: "payer-1".to_string(),
        recipient: "acc-8".to_string(),
        amount: TokenAmount::from(42.0),
        currency: "DOT".to_string(),
        status: EntryStatus::Paid,
        chain_name: "testnet".to_string(),
        transaction_hash: "0xabc".to_string(),
    };
    let stored = db.append_ledger_entry(entry.clone()).await.unwrap();
    assert_eq!(stored.block_number, 12);
    assert_eq!(stored.position_in_block, 3);
    assert_eq!(stored.status, EntryStatus::Paid);

    let mut second = entry;
    second.status = EntryStatus::Completed;
    second.sender = "acc-8".to_string();
    second.recipient = "treasury".to_string();
    db.append_ledger_entry(second).await.unwrap();

    let entries = db.fetch_ledger_entries_for_account("acc-8").await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].id < entries[1].id);
    assert_eq!(entries[0].status, EntryStatus::Paid);
    assert_eq!(entries[1].status, EntryStatus::Completed);

    assert!(db.fetch_ledger_entries_for_account("acc-unrelated").await.unwrap().is_empty());
}
