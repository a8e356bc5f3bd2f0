use std::future::Future;

use tokio::sync::mpsc;

use super::ChainAccessError;

/// A new-block notification. The block hash is resolved separately via [`ChainApi::block_hash`],
/// since header subscriptions do not carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub parent_hash: String,
}

/// A block body as the engine sees it: the ordered extrinsics, already classified by the client.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub extrinsics: Vec<Extrinsic>,
}

/// One extrinsic of a block. The client decodes the narrow set of value-transfer calls the
/// matcher cares about into [`TransferArgs`]; everything else arrives as `Opaque` and is
/// rejected cheaply.
#[derive(Debug, Clone)]
pub struct Extrinsic {
    /// Pallet and call name, for logging and matcher filtering.
    pub pallet: String,
    pub call: String,
    pub args: TransferArgs,
    /// SS58 address of the signer, when the extrinsic is signed and decodable.
    pub signer: Option<String>,
    /// Extrinsic hash, hex with `0x` prefix.
    pub hash: String,
    /// The raw extrinsic bytes, hex with `0x` prefix.
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferArgs {
    /// A native-token transfer (`balances.transfer*`).
    Native { to: String, amount: u128 },
    /// A custom-asset transfer (`assets.transfer*`).
    Asset { asset_id: u32, to: String, amount: u128 },
    /// Anything that is not a recognized value transfer.
    Opaque,
}

/// Progress reports for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Ready,
    Broadcast,
    /// Included in the block with the given hash.
    InBlock(String),
    /// Finalized in the block with the given hash.
    Finalized(String),
    Dropped,
    Invalid,
    Error(String),
}

impl TxStatus {
    /// Inclusion is accepted as soon as either signal arrives; full finality is not awaited.
    pub fn included_in(&self) -> Option<&str> {
        match self {
            TxStatus::InBlock(hash) | TxStatus::Finalized(hash) => Some(hash.as_str()),
            _ => None,
        }
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, TxStatus::Dropped | TxStatus::Invalid | TxStatus::Error(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeVersion {
    pub spec_version: u32,
    pub transaction_version: u32,
}

/// The chain-client operations the engine consumes. Implementations must be cheaply cloneable
/// handles onto a shared connection.
pub trait ChainApi: Clone + Send + Sync + 'static {
    /// Subscribes to new block headers. Headers arrive on a bounded channel in production order;
    /// the channel closing signals that the underlying subscription has ended.
    fn subscribe_new_heads(
        &self,
    ) -> impl Future<Output = Result<mpsc::Receiver<BlockHeader>, ChainAccessError>> + Send;

    fn block_hash(
        &self,
        number: u64,
    ) -> impl Future<Output = Result<String, ChainAccessError>> + Send;

    fn block_by_hash(
        &self,
        hash: &str,
    ) -> impl Future<Output = Result<Block, ChainAccessError>> + Send;

    /// The block number for the given block hash.
    fn block_number(
        &self,
        hash: &str,
    ) -> impl Future<Output = Result<u64, ChainAccessError>> + Send;

    /// Submits a signed extrinsic (hex) and streams its status updates.
    fn submit_and_watch(
        &self,
        extrinsic: String,
    ) -> impl Future<Output = Result<mpsc::Receiver<TxStatus>, ChainAccessError>> + Send;

    fn runtime_version(
        &self,
    ) -> impl Future<Output = Result<RuntimeVersion, ChainAccessError>> + Send;

    fn genesis_hash(&self) -> impl Future<Output = Result<String, ChainAccessError>> + Send;

    /// The next nonce for the given account, taking pending pool transactions into account.
    fn account_nonce(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<u64, ChainAccessError>> + Send;

    /// Decimals from the on-chain asset metadata.
    fn asset_decimals(
        &self,
        asset_id: u32,
    ) -> impl Future<Output = Result<u32, ChainAccessError>> + Send;

    /// The spendable balance of `address` in raw units of the given asset.
    fn asset_balance(
        &self,
        asset_id: u32,
        address: &str,
    ) -> impl Future<Output = Result<u128, ChainAccessError>> + Send;
}

/// Opens a [`ChainApi`] client against a single endpoint. The connection manager drives this
/// through the endpoint failover sweep; tests script it.
pub trait ChainConnector: Send + Sync + 'static {
    type Client: ChainApi;

    fn connect(
        &self,
        endpoint: &str,
    ) -> impl Future<Output = Result<Self::Client, ChainAccessError>> + Send;
}
