//! The automatic-withdrawal state machine.
//!
//! Once an order is fully repaid, its deposit account is swept into the treasury address. The
//! native token is swept with a full-balance transfer that closes the account; custom assets
//! transfer their balance minus a fee reserve, with fees paid in-kind so deposit accounts never
//! need native-token pre-funding.
//!
//! There is no automatic retry: a failed sweep parks the order in `failed` until an operator
//! issues a forced withdrawal.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::*;
use thiserror::Error;

use dpg_common::{Secret, TokenAmount};

use crate::{
    catalog::{AssetCatalog, AssetSpec, CatalogError},
    connection::ConnectionManager,
    db_types::{EntryStatus, NewLedgerEntry, Order, OrderId, WithdrawalStatus},
    events::{EventProducers, WithdrawalCompletedEvent},
    keyring,
    rpc::codec,
    traits::{ChainAccessError, ChainApi, ChainConnector, PaymentStore, PaymentStoreError, TxStatus},
};

/// How long to wait for the first inclusion signal after submission.
const INCLUSION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Error)]
pub enum WithdrawalError {
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("A sweep for order {0} is already in flight")]
    AlreadyInFlight(OrderId),
    #[error("Order {0} is not awaiting withdrawal (status: {1})")]
    NotAwaitingWithdrawal(OrderId, WithdrawalStatus),
    #[error("Deposit balance {balance} does not cover the fee reserve {reserve} for order {order_id}")]
    InsufficientBalance { order_id: OrderId, balance: TokenAmount, reserve: TokenAmount },
    #[error("The derived deposit account does not match the stored one for order {0}. Has the seed changed?")]
    SeedMismatch(OrderId),
    #[error("Invalid treasury address: {0}")]
    InvalidRecipient(String),
    #[error("{0}")]
    Catalog(#[from] CatalogError),
    #[error("{0}")]
    Chain(#[from] ChainAccessError),
    #[error("{0}")]
    Store(#[from] PaymentStoreError),
    #[error("The sweep transaction was not included: {0}")]
    NotIncluded(String),
}

pub struct WithdrawalEngine<B, T: ChainConnector> {
    store: B,
    connection: Arc<ConnectionManager<T>>,
    catalog: Arc<AssetCatalog>,
    seed: Secret<String>,
    producers: EventProducers,
    in_flight: Mutex<HashSet<OrderId>>,
}

impl<B, T> WithdrawalEngine<B, T>
where
    B: PaymentStore,
    T: ChainConnector,
{
    pub fn new(
        store: B,
        connection: Arc<ConnectionManager<T>>,
        catalog: Arc<AssetCatalog>,
        seed: Secret<String>,
        producers: EventProducers,
    ) -> Arc<Self> {
        Arc::new(Self { store, connection, catalog, seed, producers, in_flight: Mutex::new(HashSet::new()) })
    }

    /// The automatic sweep, triggered when an order flips to paid. Only proceeds from the
    /// `waiting` state; combined with the in-flight guard this makes concurrent triggers
    /// collapse to exactly one submitted transaction.
    pub async fn withdraw(&self, order_id: &OrderId) -> Result<Order, WithdrawalError> {
        self.sweep(order_id, false).await
    }

    /// The operator-initiated sweep. Proceeds regardless of payment and withdrawal status, so a
    /// failed withdrawal can be retried and a partially-paid order can be drained.
    pub async fn force_withdraw(&self, order_id: &OrderId) -> Result<Order, WithdrawalError> {
        self.sweep(order_id, true).await
    }

    async fn sweep(&self, order_id: &OrderId, forced: bool) -> Result<Order, WithdrawalError> {
        let order = self
            .store
            .fetch_order_by_order_id(order_id)
            .await?
            .ok_or_else(|| WithdrawalError::OrderNotFound(order_id.clone()))?;
        if !forced && order.withdrawal_status != WithdrawalStatus::Waiting {
            return Err(WithdrawalError::NotAwaitingWithdrawal(order_id.clone(), order.withdrawal_status));
        }
        let _guard = InFlightGuard::try_acquire(&self.in_flight, order_id)
            .ok_or_else(|| WithdrawalError::AlreadyInFlight(order_id.clone()))?;
        // Re-read under the guard: a racing sweep may have completed while this one waited.
        let order = self
            .store
            .fetch_order_by_order_id(order_id)
            .await?
            .ok_or_else(|| WithdrawalError::OrderNotFound(order_id.clone()))?;
        if !forced && order.withdrawal_status != WithdrawalStatus::Waiting {
            return Err(WithdrawalError::NotAwaitingWithdrawal(order_id.clone(), order.withdrawal_status));
        }

        match self.submit_sweep(&order).await {
            Ok(order) => Ok(order),
            Err(e) => {
                warn!("💸️ Sweep for order {order_id} failed: {e}");
                if let Err(store_err) =
                    self.store.set_withdrawal_status(order_id, WithdrawalStatus::Failed).await
                {
                    error!("💸️ Could not mark order {order_id} as failed: {store_err}");
                }
                Err(e)
            },
        }
    }

    async fn submit_sweep(&self, order: &Order) -> Result<Order, WithdrawalError> {
        let order_id = &order.order_id;
        let client = self.connection.client().await?;
        let account = keyring::derive_account(&self.seed, order_id);
        if account.address() != order.payment_account {
            return Err(WithdrawalError::SeedMismatch(order_id.clone()));
        }
        let (recipient_key, _) = keyring::ss58::decode(&order.recipient)
            .map_err(|_| WithdrawalError::InvalidRecipient(order.recipient.clone()))?;

        let currency = order.currency.clone().unwrap_or_else(|| self.catalog.native_spec().symbol);
        let spec = self.catalog.resolve(&currency, &client).await?;
        let (call, swept_amount) = self.build_transfer(order, &spec, &recipient_key, &client).await?;

        let runtime = client.runtime_version().await?;
        let genesis = decode_block_hash(&client.genesis_hash().await?)?;
        let nonce = client.account_nonce(&order.payment_account).await?;
        let chain = self.catalog.chain();
        let params = codec::SigningParams {
            nonce,
            tip: 0,
            spec_version: runtime.spec_version,
            transaction_version: runtime.transaction_version,
            genesis_hash: genesis,
            fee_asset: if chain.tx_extensions.fee_asset { spec.asset_id } else { None },
            extensions: chain.tx_extensions.clone(),
        };
        let extrinsic = codec::build_signed_extrinsic(&call, &account, &params);
        let tx_hash = codec::extrinsic_hash_hex(&extrinsic);
        let raw_hex = format!("0x{}", hex::encode(&extrinsic));

        info!("💸️ Submitting sweep for order {order_id} ({swept_amount} {currency} to {})", order.recipient);
        let mut statuses = client.submit_and_watch(raw_hex.clone()).await?;
        let block_hash = self.await_inclusion(&mut statuses).await?;
        let block_number = client.block_number(&block_hash).await?;

        let order = self.store.set_withdrawal_status(order_id, WithdrawalStatus::Completed).await?;
        let entry = NewLedgerEntry {
            block_number: block_number as i64,
            position_in_block: 0,
            transaction_bytes: raw_hex,
            sender: order.payment_account.clone(),
            recipient: order.recipient.clone(),
            amount: swept_amount,
            currency: spec.symbol.clone(),
            status: EntryStatus::Completed,
            chain_name: self.catalog.chain_name().to_string(),
            transaction_hash: tx_hash.clone(),
        };
        self.store.append_ledger_entry(entry).await?;
        info!("💸️ Sweep for order {order_id} included in block #{block_number}");
        self.producers
            .publish_withdrawal_completed(WithdrawalCompletedEvent {
                order: order.clone(),
                transaction_hash: tx_hash,
                block_number,
            })
            .await;
        Ok(order)
    }

    /// Builds the unsigned call bytes and the amount recorded in the ledger.
    async fn build_transfer<C: ChainApi>(
        &self,
        order: &Order,
        spec: &AssetSpec,
        recipient_key: &[u8; 32],
        client: &C,
    ) -> Result<(Vec<u8>, TokenAmount), WithdrawalError> {
        let chain = self.catalog.chain();
        match spec.asset_id {
            None => {
                // Full-balance sweep. The exact amount is only known to the chain; the ledger
                // records the order amount, falling back to the repaid tally.
                let call = codec::encode_native_sweep(&chain.call_indices, recipient_key);
                let amount = order.amount.unwrap_or(order.repaid_amount);
                Ok((call, amount))
            },
            Some(asset_id) => {
                let balance = client.asset_balance(asset_id, &order.payment_account).await?;
                let reserve = self.catalog.fee_reserve(spec);
                let reserve_raw = reserve.to_raw(spec.decimals);
                if balance <= reserve_raw {
                    return Err(WithdrawalError::InsufficientBalance {
                        order_id: order.order_id.clone(),
                        balance: TokenAmount::from_raw(balance, spec.decimals),
                        reserve,
                    });
                }
                let transfer_raw = balance - reserve_raw;
                let call = codec::encode_asset_transfer(&chain.call_indices, asset_id, recipient_key, transfer_raw);
                Ok((call, TokenAmount::from_raw(transfer_raw, spec.decimals)))
            },
        }
    }

    async fn await_inclusion(
        &self,
        statuses: &mut tokio::sync::mpsc::Receiver<TxStatus>,
    ) -> Result<String, WithdrawalError> {
        let deadline = tokio::time::Instant::now() + INCLUSION_TIMEOUT;
        loop {
            let status = tokio::time::timeout_at(deadline, statuses.recv())
                .await
                .map_err(|_| WithdrawalError::NotIncluded("timed out waiting for inclusion".to_string()))?;
            match status {
                Some(status) => {
                    if let Some(hash) = status.included_in() {
                        return Ok(hash.to_string());
                    }
                    if status.is_terminal_failure() {
                        return Err(WithdrawalError::NotIncluded(format!("{status:?}")));
                    }
                    debug!("💸️ Sweep status: {status:?}");
                },
                None => return Err(WithdrawalError::NotIncluded("status stream ended".to_string())),
            }
        }
    }
}

fn decode_block_hash(hex_hash: &str) -> Result<[u8; 32], WithdrawalError> {
    let bytes = hex::decode(hex_hash.trim_start_matches("0x"))
        .map_err(|e| WithdrawalError::Chain(ChainAccessError::Codec(e.to_string())))?;
    bytes
        .try_into()
        .map_err(|_| WithdrawalError::Chain(ChainAccessError::Codec("block hash is not 32 bytes".to_string())))
}

/// Removes the order from the in-flight set when the sweep attempt ends, whichever way it ends.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<OrderId>>,
    order_id: OrderId,
}

impl<'a> InFlightGuard<'a> {
    fn try_acquire(set: &'a Mutex<HashSet<OrderId>>, order_id: &OrderId) -> Option<Self> {
        let mut in_flight = set.lock().unwrap();
        if in_flight.insert(order_id.clone()) {
            Some(Self { set, order_id: order_id.clone() })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.order_id);
    }
}

impl<B, T: ChainConnector> std::fmt::Debug for WithdrawalEngine<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WithdrawalEngine")
    }
}
