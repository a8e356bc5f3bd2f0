//! `SqliteDatabase` is the production [`PaymentStore`] backend.

use std::fmt::Debug;

use dpg_common::TokenAmount;
use sqlx::SqlitePool;

use super::db::{ledger, new_pool, orders};
use crate::{
    db_types::{
        CreditResult,
        LedgerEntry,
        NewLedgerEntry,
        NewOrder,
        Order,
        OrderId,
        OrderUpdate,
        WithdrawalStatus,
    },
    traits::{PaymentStore, PaymentStoreError},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl PaymentStore for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), PaymentStoreError> {
        let mut tx = self.pool.begin().await?;
        let result = orders::idempotent_insert(order, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_order_by_order_id(&self, order_id: &OrderId) -> Result<Option<Order>, PaymentStoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_by_order_id(order_id, &mut conn).await?)
    }

    async fn fetch_order_by_payment_account(&self, account: &str) -> Result<Option<Order>, PaymentStoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_by_payment_account(account, &mut conn).await?)
    }

    async fn update_order(&self, order_id: &OrderId, update: OrderUpdate) -> Result<Order, PaymentStoreError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::update_order(order_id, update, &mut conn).await?;
        order.ok_or_else(|| PaymentStoreError::OrderNotFound(order_id.clone()))
    }

    async fn credit_order(&self, order_id: &OrderId, amount: TokenAmount) -> Result<CreditResult, PaymentStoreError> {
        let mut tx = self.pool.begin().await?;
        let result = orders::credit_order(order_id, amount, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn set_withdrawal_status(
        &self,
        order_id: &OrderId,
        status: WithdrawalStatus,
    ) -> Result<Order, PaymentStoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::set_withdrawal_status(order_id, status, &mut conn).await
    }

    async fn transition_withdrawal_status(
        &self,
        order_id: &OrderId,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    ) -> Result<Option<Order>, PaymentStoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::transition_withdrawal_status(order_id, from, to, &mut conn).await
    }

    async fn append_ledger_entry(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, PaymentStoreError> {
        let mut conn = self.pool.acquire().await?;
        ledger::insert_entry(entry, &mut conn).await
    }

    async fn fetch_ledger_entries_for_account(&self, account: &str) -> Result<Vec<LedgerEntry>, PaymentStoreError> {
        let mut conn = self.pool.acquire().await?;
        ledger::fetch_entries_for_account(account, &mut conn).await
    }

    async fn close(&mut self) -> Result<(), PaymentStoreError> {
        self.pool.close().await;
        Ok(())
    }
}
