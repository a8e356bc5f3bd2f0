//! The block watcher: drives the reconciliation engine from the chain's header stream.
//!
//! Headers arrive on the bounded channel the chain client produces, so a burst of blocks
//! backpressures the subscription instead of queueing without limit. Blocks are processed in
//! header order; within a block, extrinsics are processed in their on-chain order so ledger
//! positions are deterministic.

use std::sync::Arc;

use log::*;
use tokio::sync::watch;

use crate::{
    catalog::{AssetCatalog, AssetSpec},
    connection::ConnectionManager,
    reconciler::ReconciliationEngine,
    traits::{ChainAccessError, ChainApi, ChainConnector, PaymentStore},
};

pub struct BlockWatcher<B, T: ChainConnector> {
    connection: Arc<ConnectionManager<T>>,
    catalog: Arc<AssetCatalog>,
    reconciler: Arc<ReconciliationEngine<B>>,
}

/// Cancels the watcher task when signalled (or dropped).
pub struct WatcherShutdown {
    sender: watch::Sender<bool>,
}

impl WatcherShutdown {
    pub fn shutdown(&self) {
        let _ = self.sender.send(true);
    }
}

impl<B, T> BlockWatcher<B, T>
where
    B: PaymentStore,
    T: ChainConnector,
{
    pub fn new(
        connection: Arc<ConnectionManager<T>>,
        catalog: Arc<AssetCatalog>,
        reconciler: Arc<ReconciliationEngine<B>>,
    ) -> Self {
        Self { connection, catalog, reconciler }
    }

    /// Spawns the watcher as a cancellable task.
    pub fn spawn(self) -> (tokio::task::JoinHandle<Result<(), ChainAccessError>>, WatcherShutdown) {
        let (sender, receiver) = watch::channel(false);
        let handle = tokio::spawn(self.run(receiver));
        (handle, WatcherShutdown { sender })
    }

    /// Subscribes to new headers and reconciles each block until the subscription ends or a
    /// shutdown is signalled. The subscription ending is surfaced as [`ChainAccessError::Disconnected`];
    /// there is no automatic resubscribe.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ChainAccessError> {
        let client = self.connection.client().await?;
        let mut headers = client.subscribe_new_heads().await?;
        info!("👀️ Block watcher started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped shutdown handle cancels the watcher just like an explicit signal.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("👀️ Block watcher shutting down");
                        return Ok(());
                    }
                },
                header = headers.recv() => {
                    let Some(header) = header else {
                        warn!("👀️ Header subscription ended");
                        return Err(ChainAccessError::Disconnected);
                    };
                    info!("👀️ New block #{}", header.number);
                    if let Err(e) = self.process_block(&client, header.number).await {
                        error!("👀️ Error processing block #{}: {e}", header.number);
                    }
                }
            }
        }
    }

    async fn process_block<C: ChainApi>(&self, client: &C, block_number: u64) -> Result<(), ChainAccessError> {
        let hash = client.block_hash(block_number).await?;
        let block = client.block_by_hash(&hash).await?;
        // Resolve decimals once per block per asset; a failed metadata query degrades inside
        // the catalog instead of skipping the block.
        let mut assets: Vec<AssetSpec> = Vec::with_capacity(1 + self.catalog.chain().assets.len());
        assets.push(self.catalog.native_spec());
        for asset in &self.catalog.chain().assets {
            match self.catalog.resolve(&asset.name, client).await {
                Ok(spec) => assets.push(spec),
                Err(e) => error!("👀️ Skipping asset {} for block #{block_number}: {e}", asset.name),
            }
        }
        for (position, xt) in block.extrinsics.iter().enumerate() {
            for asset in &assets {
                if let Err(e) = self.reconciler.process_extrinsic(xt, block_number, position, asset).await {
                    error!("👀️ Error matching extrinsic {} in block #{block_number}: {e}", xt.hash);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use dpg_common::TokenAmount;

    use super::*;
    use crate::{
        config::{ChainConfig, RetryPolicy},
        db_types::{NewOrder, OrderId, PaymentStatus},
        events::EventProducers,
        test_utils::{transfer_extrinsic, MemoryStore, MockChain, MockConnector},
        traits::{Block, PaymentStore},
    };

    fn test_chain_config() -> ChainConfig {
        ChainConfig {
            name: "testnet".into(),
            native_token: "UNIT".into(),
            decimals: 12,
            endpoints: vec!["wss://rpc.test".into()],
            assets: vec![],
            call_indices: Default::default(),
            tx_extensions: Default::default(),
        }
    }

    #[tokio::test]
    async fn watcher_credits_orders_from_watched_blocks() {
        let store = MemoryStore::new();
        let chain = MockChain::new();
        let connector = MockConnector::new(chain.clone());
        let config = test_chain_config();
        let connection = ConnectionManager::new(vec![config.clone()], "testnet", RetryPolicy::default(), connector);
        let catalog = Arc::new(AssetCatalog::new(config));
        let reconciler =
            Arc::new(ReconciliationEngine::new(store.clone(), EventProducers::default(), "testnet"));

        let order = NewOrder::new(OrderId("w-1".into()), "deposit-addr".into(), "treasury".into())
            .with_amount(TokenAmount::from(2.0))
            .with_currency("UNIT");
        store.insert_order(order).await.unwrap();

        let watcher = BlockWatcher::new(connection, catalog, reconciler);
        let (handle, shutdown) = watcher.spawn();
        chain.wait_for_subscriber().await;

        chain.add_block(1, Block { extrinsics: vec![transfer_extrinsic("deposit-addr", 2_000_000_000_000, "payer")] });
        chain.announce_block(1).await;

        // Give the watcher a moment to drain the header channel.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let order = store.fetch_order_by_order_id(&OrderId("w-1".into())).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.repaid_amount, TokenAmount::from(2.0));

        shutdown.shutdown();
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn watcher_ignores_unrelated_extrinsics() {
        let store = MemoryStore::new();
        let chain = MockChain::new();
        let connector = MockConnector::new(chain.clone());
        let config = test_chain_config();
        let connection = ConnectionManager::new(vec![config.clone()], "testnet", RetryPolicy::default(), connector);
        let catalog = Arc::new(AssetCatalog::new(config));
        let reconciler =
            Arc::new(ReconciliationEngine::new(store.clone(), EventProducers::default(), "testnet"));

        let order = NewOrder::new(OrderId("w-2".into()), "deposit-addr".into(), "treasury".into())
            .with_amount(TokenAmount::from(2.0))
            .with_currency("UNIT");
        store.insert_order(order).await.unwrap();

        let watcher = BlockWatcher::new(connection, catalog, reconciler);
        let (handle, shutdown) = watcher.spawn();
        chain.wait_for_subscriber().await;

        // A transfer to some other account.
        chain.add_block(1, Block { extrinsics: vec![transfer_extrinsic("other-addr", 5_000_000_000_000, "payer")] });
        chain.announce_block(1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let order = store.fetch_order_by_order_id(&OrderId("w-2".into())).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert!(order.repaid_amount.is_zero());

        shutdown.shutdown();
        handle.await.unwrap().unwrap();
    }
}
