//! The order-facing API: what the HTTP layer (or any other front end) calls.

use std::{fmt::Debug, sync::Arc};

use log::*;
use thiserror::Error;

use dpg_common::{Secret, TokenAmount};

use crate::{
    catalog::{AssetCatalog, CatalogError},
    db_types::{LedgerEntry, NewLedgerEntry, NewOrder, Order, OrderId, OrderUpdate},
    keyring::{self, KeyringError},
    traits::{PaymentStore, PaymentStoreError},
};

#[derive(Debug, Clone, Error)]
pub enum OrderFlowError {
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("No order is associated with payment account {0}")]
    NoOrderForAccount(String),
    #[error("{0}")]
    Store(#[from] PaymentStoreError),
    #[error("{0}")]
    UnsupportedAsset(#[from] CatalogError),
    #[error("{0}")]
    Keyring(#[from] KeyringError),
}

/// The merchant-settable order fields, as accepted by the create/update call.
#[derive(Debug, Clone, Default)]
pub struct OrderParams {
    pub amount: Option<TokenAmount>,
    pub currency: Option<String>,
    pub callback: Option<String>,
}

pub struct OrderFlowApi<B> {
    store: B,
    catalog: Arc<AssetCatalog>,
    seed: Secret<String>,
    recipient: String,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B> OrderFlowApi<B> {
    pub fn new(store: B, catalog: Arc<AssetCatalog>, seed: Secret<String>, recipient: &str) -> Self {
        Self { store, catalog, seed, recipient: recipient.to_string() }
    }
}

impl<B> OrderFlowApi<B>
where B: PaymentStore
{
    /// Creates the order, or updates the merchant-settable fields of an existing one.
    ///
    /// On first creation the deposit account is derived from `(seed, order_id)` and a `pending`
    /// placeholder entry is written to the ledger. The returned flag is `true` when the order
    /// already existed.
    pub async fn create_or_update_order(
        &self,
        order_id: &OrderId,
        params: OrderParams,
    ) -> Result<(Order, bool), OrderFlowError> {
        if let Some(currency) = params.currency.as_deref() {
            self.catalog.check_supported(currency)?;
        }
        if let Some(existing) = self.store.fetch_order_by_order_id(order_id).await? {
            let update = OrderUpdate {
                new_amount: params.amount,
                new_currency: params.currency,
                new_callback: params.callback,
            };
            if update.is_empty() {
                return Ok((existing, true));
            }
            let order = self.store.update_order(order_id, update).await?;
            debug!("📦️ Order {order_id} updated");
            return Ok((order, true));
        }

        let account = keyring::derive_account(&self.seed, order_id).address();
        let mut new_order = NewOrder::new(order_id.clone(), account, self.recipient.clone());
        new_order.amount = params.amount;
        new_order.currency = params.currency;
        new_order.callback = params.callback;
        let (order, inserted) = self.store.insert_order(new_order).await?;
        if inserted {
            info!("📦️ Order {order_id} created with deposit account {}", order.payment_account);
            self.store
                .append_ledger_entry(NewLedgerEntry::placeholder(&order, self.catalog.chain_name()))
                .await?;
        }
        Ok((order, !inserted))
    }

    pub async fn get_order(&self, order_id: &OrderId) -> Result<Order, OrderFlowError> {
        self.store
            .fetch_order_by_order_id(order_id)
            .await?
            .ok_or_else(|| OrderFlowError::OrderNotFound(order_id.clone()))
    }

    /// Looks an order up by its deposit address. The input is canonicalized first, so any valid
    /// encoding of the address matches.
    pub async fn get_order_by_payment_account(&self, raw_address: &str) -> Result<Order, OrderFlowError> {
        let account = keyring::canonicalize_address(raw_address)?;
        self.store
            .fetch_order_by_payment_account(&account)
            .await?
            .ok_or_else(|| OrderFlowError::NoOrderForAccount(account))
    }

    /// The audit trail for an order: every ledger entry mentioning its deposit account.
    pub async fn order_ledger(&self, order_id: &OrderId) -> Result<Vec<LedgerEntry>, OrderFlowError> {
        let order = self.get_order(order_id).await?;
        Ok(self.store.fetch_ledger_entries_for_account(&order.payment_account).await?)
    }

    pub fn store(&self) -> &B {
        &self.store
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::ChainConfig,
        db_types::{EntryStatus, PaymentStatus, WithdrawalStatus},
        test_utils::MemoryStore,
    };

    fn api() -> OrderFlowApi<MemoryStore> {
        let chain: ChainConfig = serde_json::from_str(
            r#"{
                "name": "testnet",
                "native_token": "UNIT",
                "decimals": 12,
                "endpoints": ["wss://rpc.test"],
                "assets": [{ "name": "USDt", "id": 1984 }]
            }"#,
        )
        .unwrap();
        OrderFlowApi::new(
            MemoryStore::new(),
            Arc::new(AssetCatalog::new(chain)),
            Secret::new("order flow test seed".to_string()),
            "treasury-address",
        )
    }

    #[tokio::test]
    async fn creating_an_order_derives_account_and_writes_placeholder() {
        let api = api();
        let id = OrderId("flow-1".into());
        let params = OrderParams {
            amount: Some(TokenAmount::from(10.0)),
            currency: Some("UNIT".into()),
            callback: None,
        };
        let (order, existing) = api.create_or_update_order(&id, params).await.unwrap();
        assert!(!existing);
        assert!(!order.payment_account.is_empty());
        assert_eq!(order.recipient, "treasury-address");
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.withdrawal_status, WithdrawalStatus::Waiting);
        let ledger = api.order_ledger(&id).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].status, EntryStatus::Pending);
    }

    #[tokio::test]
    async fn update_keeps_account_and_sets_fields() {
        let api = api();
        let id = OrderId("flow-2".into());
        let (created, _) = api.create_or_update_order(&id, OrderParams::default()).await.unwrap();
        let (updated, existing) = api
            .create_or_update_order(
                &id,
                OrderParams { amount: Some(TokenAmount::from(5.0)), currency: Some("USDt".into()), callback: None },
            )
            .await
            .unwrap();
        assert!(existing);
        assert_eq!(updated.payment_account, created.payment_account);
        assert_eq!(updated.amount, Some(TokenAmount::from(5.0)));
        assert_eq!(updated.currency.as_deref(), Some("USDt"));
    }

    #[tokio::test]
    async fn same_order_id_always_gets_the_same_account() {
        let api = api();
        let id = OrderId("flow-3".into());
        let (a, _) = api.create_or_update_order(&id, OrderParams::default()).await.unwrap();
        let (b, existing) = api.create_or_update_order(&id, OrderParams::default()).await.unwrap();
        assert!(existing);
        assert_eq!(a.payment_account, b.payment_account);
        // A different order id derives a different account.
        let (c, _) = api.create_or_update_order(&OrderId("flow-4".into()), OrderParams::default()).await.unwrap();
        assert_ne!(a.payment_account, c.payment_account);
    }

    #[tokio::test]
    async fn unsupported_currency_is_rejected() {
        let api = api();
        let id = OrderId("flow-5".into());
        let params = OrderParams { amount: None, currency: Some("DOGE".into()), callback: None };
        let err = api.create_or_update_order(&id, params).await.unwrap_err();
        assert!(matches!(err, OrderFlowError::UnsupportedAsset(_)));
        // Nothing was created.
        assert!(matches!(api.get_order(&id).await, Err(OrderFlowError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn missing_orders_surface_not_found() {
        let api = api();
        assert!(matches!(api.get_order(&OrderId("nope".into())).await, Err(OrderFlowError::OrderNotFound(_))));
    }
}
