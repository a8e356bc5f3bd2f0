//! An in-memory [`PaymentStore`] with the same atomicity guarantees as the SQLite backend: all
//! mutations happen under one lock, so credits are serialized per order and the CAS transition
//! has real compare-and-swap semantics.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use dpg_common::TokenAmount;

use crate::{
    db_types::{
        CreditResult,
        LedgerEntry,
        NewLedgerEntry,
        NewOrder,
        Order,
        OrderId,
        OrderUpdate,
        PaymentStatus,
        WithdrawalStatus,
    },
    traits::{PaymentStore, PaymentStoreError},
};

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    orders: HashMap<String, Order>,
    ledger: Vec<LedgerEntry>,
    next_order_id: i64,
    next_ledger_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of ledger entries written so far.
    pub fn ledger_len(&self) -> usize {
        self.inner.lock().unwrap().ledger.len()
    }
}

impl PaymentStore for MemoryStore {
    fn url(&self) -> &str {
        "memory://"
    }

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), PaymentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.orders.get(order.order_id.as_str()) {
            return Ok((existing.clone(), false));
        }
        inner.next_order_id += 1;
        let now = Utc::now();
        let stored = Order {
            id: inner.next_order_id,
            order_id: order.order_id.clone(),
            amount: order.amount,
            repaid_amount: TokenAmount::zero(),
            currency: order.currency,
            payment_account: order.payment_account,
            recipient: order.recipient,
            payment_status: PaymentStatus::Pending,
            withdrawal_status: WithdrawalStatus::Waiting,
            callback: order.callback,
            payment_page: None,
            redirect_url: None,
            message: None,
            created_at: now,
            updated_at: now,
        };
        inner.orders.insert(order.order_id.0.clone(), stored.clone());
        Ok((stored, true))
    }

    async fn fetch_order_by_order_id(&self, order_id: &OrderId) -> Result<Option<Order>, PaymentStoreError> {
        Ok(self.inner.lock().unwrap().orders.get(order_id.as_str()).cloned())
    }

    async fn fetch_order_by_payment_account(&self, account: &str) -> Result<Option<Order>, PaymentStoreError> {
        Ok(self.inner.lock().unwrap().orders.values().find(|o| o.payment_account == account).cloned())
    }

    async fn update_order(&self, order_id: &OrderId, update: OrderUpdate) -> Result<Order, PaymentStoreError> {
        if update.is_empty() {
            return Err(PaymentStoreError::UpdateNoOp);
        }
        let mut inner = self.inner.lock().unwrap();
        let order = inner
            .orders
            .get_mut(order_id.as_str())
            .ok_or_else(|| PaymentStoreError::OrderNotFound(order_id.clone()))?;
        if let Some(amount) = update.new_amount {
            order.amount = Some(amount);
        }
        if let Some(currency) = update.new_currency {
            order.currency = Some(currency);
        }
        if let Some(callback) = update.new_callback {
            order.callback = Some(callback);
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn credit_order(&self, order_id: &OrderId, amount: TokenAmount) -> Result<CreditResult, PaymentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let order = inner
            .orders
            .get_mut(order_id.as_str())
            .ok_or_else(|| PaymentStoreError::OrderNotFound(order_id.clone()))?;
        order.repaid_amount = order.repaid_amount + amount;
        order.updated_at = Utc::now();
        let newly_paid = match (order.payment_status, order.amount) {
            (PaymentStatus::Pending, Some(target)) if order.repaid_amount >= target => {
                order.payment_status = PaymentStatus::Paid;
                true
            },
            _ => false,
        };
        Ok(CreditResult { order: order.clone(), newly_paid })
    }

    async fn set_withdrawal_status(
        &self,
        order_id: &OrderId,
        status: WithdrawalStatus,
    ) -> Result<Order, PaymentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let order = inner
            .orders
            .get_mut(order_id.as_str())
            .ok_or_else(|| PaymentStoreError::OrderNotFound(order_id.clone()))?;
        order.withdrawal_status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn transition_withdrawal_status(
        &self,
        order_id: &OrderId,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    ) -> Result<Option<Order>, PaymentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(order) = inner.orders.get_mut(order_id.as_str()) else {
            return Ok(None);
        };
        if order.withdrawal_status != from {
            return Ok(None);
        }
        order.withdrawal_status = to;
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn append_ledger_entry(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, PaymentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_ledger_id += 1;
        let stored = LedgerEntry {
            id: inner.next_ledger_id,
            block_number: entry.block_number,
            position_in_block: entry.position_in_block,
            timestamp: Utc::now(),
            transaction_bytes: entry.transaction_bytes,
            sender: entry.sender,
            recipient: entry.recipient,
            amount: entry.amount,
            currency: entry.currency,
            status: entry.status,
            chain_name: entry.chain_name,
            transaction_hash: entry.transaction_hash,
        };
        inner.ledger.push(stored.clone());
        Ok(stored)
    }

    async fn fetch_ledger_entries_for_account(&self, account: &str) -> Result<Vec<LedgerEntry>, PaymentStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.ledger.iter().filter(|e| e.sender == account || e.recipient == account).cloned().collect())
    }
}
