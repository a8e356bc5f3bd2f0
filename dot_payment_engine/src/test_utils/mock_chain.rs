//! A scriptable [`ChainApi`] / [`ChainConnector`] pair for tests.
//!
//! Blocks are registered up front and announced on demand; block hashes take the synthetic form
//! `0xblock{number}` so inclusion reports can be resolved back to block numbers without real
//! hashing. Submitted extrinsics are recorded for assertions and answered with a scripted
//! status sequence.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use tokio::sync::mpsc;

use crate::traits::{
    Block,
    BlockHeader,
    ChainAccessError,
    ChainApi,
    ChainConnector,
    Extrinsic,
    RuntimeVersion,
    TransferArgs,
    TxStatus,
};

const HASH_PREFIX: &str = "0xblock";

/// A native-token transfer extrinsic, as the production client would deliver it.
pub fn transfer_extrinsic(to: &str, amount: u128, signer: &str) -> Extrinsic {
    Extrinsic {
        pallet: "balances".to_string(),
        call: "transfer_keep_alive".to_string(),
        args: TransferArgs::Native { to: to.to_string(), amount },
        signer: Some(signer.to_string()),
        hash: format!("0xtx-{to}-{amount}"),
        raw: "0xdeadbeef".to_string(),
    }
}

/// A custom-asset transfer extrinsic.
pub fn asset_transfer_extrinsic(asset_id: u32, to: &str, amount: u128, signer: &str) -> Extrinsic {
    Extrinsic {
        pallet: "assets".to_string(),
        call: "transfer".to_string(),
        args: TransferArgs::Asset { asset_id, to: to.to_string(), amount },
        signer: Some(signer.to_string()),
        hash: format!("0xtx-{asset_id}-{to}-{amount}"),
        raw: "0xdeadbeef".to_string(),
    }
}

#[derive(Clone, Debug)]
pub struct MockChain {
    inner: Arc<Mutex<ChainState>>,
}

#[derive(Debug)]
struct ChainState {
    head_senders: Vec<mpsc::Sender<BlockHeader>>,
    blocks: HashMap<u64, Block>,
    decimals: HashMap<u32, u32>,
    balances: HashMap<(u32, String), u128>,
    submissions: Vec<String>,
    tx_status_script: Vec<TxStatus>,
    nonce: u64,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            head_senders: Vec::new(),
            blocks: HashMap::new(),
            decimals: HashMap::new(),
            balances: HashMap::new(),
            submissions: Vec::new(),
            tx_status_script: vec![TxStatus::Ready, TxStatus::InBlock(format!("{HASH_PREFIX}1"))],
            nonce: 0,
        }
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(ChainState::default())) }
    }

    pub fn set_asset_decimals(&self, asset_id: u32, decimals: u32) {
        self.inner.lock().unwrap().decimals.insert(asset_id, decimals);
    }

    pub fn set_asset_balance(&self, asset_id: u32, address: &str, raw_balance: u128) {
        self.inner.lock().unwrap().balances.insert((asset_id, address.to_string()), raw_balance);
    }

    pub fn add_block(&self, number: u64, block: Block) {
        self.inner.lock().unwrap().blocks.insert(number, block);
    }

    /// Replaces the status sequence played back for each submission.
    pub fn set_tx_status_script(&self, script: Vec<TxStatus>) {
        self.inner.lock().unwrap().tx_status_script = script;
    }

    /// The extrinsics submitted so far (hex, in submission order).
    pub fn submissions(&self) -> Vec<String> {
        self.inner.lock().unwrap().submissions.clone()
    }

    /// Blocks until at least one header subscription is open. Tests that spawn a watcher task
    /// call this before announcing blocks, so no announcement can race the subscription.
    pub async fn wait_for_subscriber(&self) {
        loop {
            if !self.inner.lock().unwrap().head_senders.is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    /// Announces the given block number to all header subscribers.
    pub async fn announce_block(&self, number: u64) {
        let senders = self.inner.lock().unwrap().head_senders.clone();
        let header = BlockHeader {
            number,
            parent_hash: format!("{HASH_PREFIX}{}", number.saturating_sub(1)),
        };
        for sender in senders {
            let _ = sender.send(header.clone()).await;
        }
    }

    fn parse_block_hash(hash: &str) -> Result<u64, ChainAccessError> {
        hash.strip_prefix(HASH_PREFIX)
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| ChainAccessError::Rpc(format!("unknown block hash {hash}")))
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainApi for MockChain {
    async fn subscribe_new_heads(&self) -> Result<mpsc::Receiver<BlockHeader>, ChainAccessError> {
        let (tx, rx) = mpsc::channel(8);
        self.inner.lock().unwrap().head_senders.push(tx);
        Ok(rx)
    }

    async fn block_hash(&self, number: u64) -> Result<String, ChainAccessError> {
        Ok(format!("{HASH_PREFIX}{number}"))
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Block, ChainAccessError> {
        let number = Self::parse_block_hash(hash)?;
        Ok(self.inner.lock().unwrap().blocks.get(&number).cloned().unwrap_or_default())
    }

    async fn block_number(&self, hash: &str) -> Result<u64, ChainAccessError> {
        Self::parse_block_hash(hash)
    }

    async fn submit_and_watch(&self, extrinsic: String) -> Result<mpsc::Receiver<TxStatus>, ChainAccessError> {
        let script = {
            let mut inner = self.inner.lock().unwrap();
            inner.submissions.push(extrinsic);
            inner.tx_status_script.clone()
        };
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for status in script {
                if tx.send(status).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn runtime_version(&self) -> Result<RuntimeVersion, ChainAccessError> {
        Ok(RuntimeVersion { spec_version: 1, transaction_version: 1 })
    }

    async fn genesis_hash(&self) -> Result<String, ChainAccessError> {
        Ok(format!("0x{}", "00".repeat(32)))
    }

    async fn account_nonce(&self, _address: &str) -> Result<u64, ChainAccessError> {
        Ok(self.inner.lock().unwrap().nonce)
    }

    async fn asset_decimals(&self, asset_id: u32) -> Result<u32, ChainAccessError> {
        self.inner
            .lock()
            .unwrap()
            .decimals
            .get(&asset_id)
            .copied()
            .ok_or_else(|| ChainAccessError::Rpc(format!("no metadata for asset {asset_id}")))
    }

    async fn asset_balance(&self, asset_id: u32, address: &str) -> Result<u128, ChainAccessError> {
        Ok(self.inner.lock().unwrap().balances.get(&(asset_id, address.to_string())).copied().unwrap_or(0))
    }
}

/// Scripted connector: endpoints can be marked as failing; every attempt is recorded in order.
#[derive(Clone)]
pub struct MockConnector {
    client: MockChain,
    state: Arc<Mutex<ConnectorState>>,
}

#[derive(Default)]
struct ConnectorState {
    failing: HashSet<String>,
    attempts: Vec<String>,
}

impl MockConnector {
    pub fn new(client: MockChain) -> Self {
        Self { client, state: Arc::new(Mutex::new(ConnectorState::default())) }
    }

    pub fn fail_endpoint(&self, endpoint: &str) {
        self.state.lock().unwrap().failing.insert(endpoint.to_string());
    }

    pub fn restore_endpoint(&self, endpoint: &str) {
        self.state.lock().unwrap().failing.remove(endpoint);
    }

    pub fn attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().attempts.clone()
    }
}

impl ChainConnector for MockConnector {
    type Client = MockChain;

    async fn connect(&self, endpoint: &str) -> Result<Self::Client, ChainAccessError> {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(endpoint.to_string());
        if state.failing.contains(endpoint) {
            return Err(ChainAccessError::ConnectFailed(endpoint.to_string(), "connection refused".to_string()));
        }
        Ok(self.client.clone())
    }
}
