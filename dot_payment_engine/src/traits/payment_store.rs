use std::future::Future;

use dpg_common::TokenAmount;
use thiserror::Error;

use crate::db_types::{
    CreditResult,
    LedgerEntry,
    NewLedgerEntry,
    NewOrder,
    Order,
    OrderId,
    OrderUpdate,
    WithdrawalStatus,
};

/// The order and ledger store the engine runs against.
///
/// The contract the reconciliation engine depends on:
/// * [`credit_order`](PaymentStore::credit_order) is an atomic read-modify-write per order, so
///   two transfers matched concurrently to the same deposit account never lose an update, and
///   `repaid_amount` is monotonically non-decreasing.
/// * The pending-to-paid flip inside `credit_order` never regresses a paid order.
/// * [`transition_withdrawal_status`](PaymentStore::transition_withdrawal_status) is a
///   compare-and-swap, so at most one caller wins any given edge.
/// * [`append_ledger_entry`](PaymentStore::append_ledger_entry) is append-only; entries are
///   never updated or deleted.
pub trait PaymentStore: Clone + Send + Sync + 'static {
    /// The URL of the backing store.
    fn url(&self) -> &str;

    /// Stores a new order. Idempotent: if an order with the same id already exists, it is
    /// returned unchanged and the flag is `false`.
    fn insert_order(
        &self,
        order: NewOrder,
    ) -> impl Future<Output = Result<(Order, bool), PaymentStoreError>> + Send;

    fn fetch_order_by_order_id(
        &self,
        order_id: &OrderId,
    ) -> impl Future<Output = Result<Option<Order>, PaymentStoreError>> + Send;

    /// Exact-match lookup on the deposit address.
    fn fetch_order_by_payment_account(
        &self,
        account: &str,
    ) -> impl Future<Output = Result<Option<Order>, PaymentStoreError>> + Send;

    /// Applies the merchant-settable field updates. Returns the updated order.
    fn update_order(
        &self,
        order_id: &OrderId,
        update: OrderUpdate,
    ) -> impl Future<Output = Result<Order, PaymentStoreError>> + Send;

    /// Atomically adds `amount` to the order's repaid tally and flips the payment status to paid
    /// iff the target amount is set and now covered. The flip never regresses a paid order.
    fn credit_order(
        &self,
        order_id: &OrderId,
        amount: TokenAmount,
    ) -> impl Future<Output = Result<CreditResult, PaymentStoreError>> + Send;

    /// Unconditionally records a new withdrawal status.
    fn set_withdrawal_status(
        &self,
        order_id: &OrderId,
        status: WithdrawalStatus,
    ) -> impl Future<Output = Result<Order, PaymentStoreError>> + Send;

    /// Compare-and-swap on the withdrawal status. Returns `None` (and changes nothing) if the
    /// order is not currently in `from`.
    fn transition_withdrawal_status(
        &self,
        order_id: &OrderId,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    ) -> impl Future<Output = Result<Option<Order>, PaymentStoreError>> + Send;

    fn append_ledger_entry(
        &self,
        entry: NewLedgerEntry,
    ) -> impl Future<Output = Result<LedgerEntry, PaymentStoreError>> + Send;

    /// All ledger entries mentioning the given account, oldest first.
    fn fetch_ledger_entries_for_account(
        &self,
        account: &str,
    ) -> impl Future<Output = Result<Vec<LedgerEntry>, PaymentStoreError>> + Send;

    /// Closes the store connection.
    fn close(&mut self) -> impl Future<Output = Result<(), PaymentStoreError>> + Send {
        async { Ok(()) }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PaymentStoreError {
    #[error("Internal store error: {0}")]
    StoreError(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("The requested order update would result in a no-op")]
    UpdateNoOp,
}

impl From<sqlx::Error> for PaymentStoreError {
    fn from(e: sqlx::Error) -> Self {
        PaymentStoreError::StoreError(e.to_string())
    }
}
