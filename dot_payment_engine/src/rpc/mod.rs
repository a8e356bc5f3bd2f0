//! The production chain client: Substrate JSON-RPC over WebSocket.
//!
//! [`RpcChainClient`] implements [`ChainApi`] against a single endpoint; the connection manager
//! drives [`RpcConnector`] through the configured endpoint list. Extrinsic decoding degrades to
//! opaque entries on anything the codec does not recognize, so one exotic transaction can never
//! abort block processing.

pub mod codec;
mod ws;

pub use ws::WsRpcClient;

use log::*;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::{
    config::ChainConfig,
    keyring::{ss58, NETWORK_PREFIX},
    traits::{
        Block,
        BlockHeader,
        ChainAccessError,
        ChainApi,
        ChainConnector,
        Extrinsic,
        RuntimeVersion,
        TransferArgs,
        TxStatus,
    },
};

/// Capacity of the header channel handed to the block watcher.
const HEADER_BUFFER: usize = 32;

#[derive(Clone)]
pub struct RpcChainClient {
    ws: WsRpcClient,
    chain: ChainConfig,
}

impl RpcChainClient {
    pub async fn connect(endpoint: &str, chain: &ChainConfig) -> Result<Self, ChainAccessError> {
        let ws = WsRpcClient::connect(endpoint).await?;
        Ok(Self { ws, chain: chain.clone() })
    }

    pub fn endpoint(&self) -> &str {
        self.ws.endpoint()
    }

    fn decode_block_extrinsics(&self, raw_extrinsics: &[Value]) -> Vec<Extrinsic> {
        raw_extrinsics
            .iter()
            .filter_map(|v| v.as_str())
            .map(|hex_xt| self.decode_one_extrinsic(hex_xt))
            .collect()
    }

    fn decode_one_extrinsic(&self, hex_xt: &str) -> Extrinsic {
        let opaque = |raw: String, hash: String| Extrinsic {
            pallet: "unknown".to_string(),
            call: "unknown".to_string(),
            args: TransferArgs::Opaque,
            signer: None,
            hash,
            raw,
        };
        let bytes = match hex::decode(hex_xt.trim_start_matches("0x")) {
            Ok(b) => b,
            Err(e) => {
                warn!("🧾️ Block contained non-hex extrinsic data: {e}");
                return opaque(hex_xt.to_string(), String::new());
            },
        };
        let hash = codec::extrinsic_hash_hex(&bytes);
        let raw = format!("0x{}", hex::encode(&bytes));
        match codec::decode_extrinsic(&bytes, &self.chain.call_indices, &self.chain.tx_extensions) {
            Ok(decoded) => {
                let signer = decoded.signer.map(|key| ss58::encode(&key, NETWORK_PREFIX));
                let (pallet, call, args) = match decoded.call {
                    codec::DecodedCall::NativeTransfer { call_name, to, amount } => (
                        "balances".to_string(),
                        call_name.to_string(),
                        TransferArgs::Native { to: ss58::encode(&to, NETWORK_PREFIX), amount },
                    ),
                    codec::DecodedCall::AssetTransfer { call_name, asset_id, to, amount } => (
                        "assets".to_string(),
                        call_name.to_string(),
                        TransferArgs::Asset { asset_id, to: ss58::encode(&to, NETWORK_PREFIX), amount },
                    ),
                    codec::DecodedCall::Opaque => {
                        ("unknown".to_string(), "unknown".to_string(), TransferArgs::Opaque)
                    },
                };
                Extrinsic { pallet, call, args, signer, hash, raw }
            },
            Err(e) => {
                debug!("🧾️ Skipping undecodable extrinsic {hash}: {e}");
                opaque(raw, hash)
            },
        }
    }
}

fn hex_to_u64(value: &Value) -> Result<u64, ChainAccessError> {
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    let s = value.as_str().ok_or_else(|| ChainAccessError::Codec(format!("expected a number, got {value}")))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| ChainAccessError::Codec(format!("bad hex number {s}: {e}")))
}

fn header_from_value(value: &Value) -> Result<BlockHeader, ChainAccessError> {
    let number = hex_to_u64(value.get("number").unwrap_or(&Value::Null))?;
    let parent_hash = value.get("parentHash").and_then(Value::as_str).unwrap_or_default().to_string();
    Ok(BlockHeader { number, parent_hash })
}

fn tx_status_from_value(value: &Value) -> TxStatus {
    if let Some(s) = value.as_str() {
        return match s {
            "ready" => TxStatus::Ready,
            "invalid" => TxStatus::Invalid,
            "dropped" => TxStatus::Dropped,
            other => TxStatus::Error(other.to_string()),
        };
    }
    if let Some(obj) = value.as_object() {
        if let Some(hash) = obj.get("inBlock").and_then(Value::as_str) {
            return TxStatus::InBlock(hash.to_string());
        }
        if let Some(hash) = obj.get("finalized").and_then(Value::as_str) {
            return TxStatus::Finalized(hash.to_string());
        }
        if obj.contains_key("broadcast") {
            return TxStatus::Broadcast;
        }
        if obj.contains_key("dropped") || obj.contains_key("usurped") || obj.contains_key("finalityTimeout") {
            return TxStatus::Dropped;
        }
    }
    TxStatus::Error(value.to_string())
}

impl ChainApi for RpcChainClient {
    async fn subscribe_new_heads(&self) -> Result<mpsc::Receiver<BlockHeader>, ChainAccessError> {
        let mut raw = self.ws.subscribe("chain_subscribeNewHeads", json!([])).await?;
        let (tx, rx) = mpsc::channel(HEADER_BUFFER);
        tokio::spawn(async move {
            while let Some(value) = raw.recv().await {
                match header_from_value(&value) {
                    Ok(header) => {
                        if tx.send(header).await.is_err() {
                            break;
                        }
                    },
                    Err(e) => warn!("🧾️ Discarding malformed header notification: {e}"),
                }
            }
        });
        Ok(rx)
    }

    async fn block_hash(&self, number: u64) -> Result<String, ChainAccessError> {
        let result = self.ws.request("chain_getBlockHash", json!([number])).await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ChainAccessError::Rpc(format!("no block hash known for #{number}")))
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Block, ChainAccessError> {
        let result = self.ws.request("chain_getBlock", json!([hash])).await?;
        let extrinsics = result
            .pointer("/block/extrinsics")
            .and_then(Value::as_array)
            .ok_or_else(|| ChainAccessError::Codec(format!("malformed block response for {hash}")))?;
        Ok(Block { extrinsics: self.decode_block_extrinsics(extrinsics) })
    }

    async fn block_number(&self, hash: &str) -> Result<u64, ChainAccessError> {
        let result = self.ws.request("chain_getHeader", json!([hash])).await?;
        hex_to_u64(result.get("number").unwrap_or(&Value::Null))
    }

    async fn submit_and_watch(&self, extrinsic: String) -> Result<mpsc::Receiver<TxStatus>, ChainAccessError> {
        let mut raw = self.ws.subscribe("author_submitAndWatchExtrinsic", json!([extrinsic])).await?;
        let (tx, rx) = mpsc::channel(HEADER_BUFFER);
        tokio::spawn(async move {
            while let Some(value) = raw.recv().await {
                if tx.send(tx_status_from_value(&value)).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn runtime_version(&self) -> Result<RuntimeVersion, ChainAccessError> {
        let result = self.ws.request("state_getRuntimeVersion", json!([])).await?;
        let spec_version = result
            .get("specVersion")
            .and_then(Value::as_u64)
            .ok_or_else(|| ChainAccessError::Codec("runtime version without specVersion".to_string()))?;
        let transaction_version = result
            .get("transactionVersion")
            .and_then(Value::as_u64)
            .ok_or_else(|| ChainAccessError::Codec("runtime version without transactionVersion".to_string()))?;
        Ok(RuntimeVersion { spec_version: spec_version as u32, transaction_version: transaction_version as u32 })
    }

    async fn genesis_hash(&self) -> Result<String, ChainAccessError> {
        self.block_hash(0).await
    }

    async fn account_nonce(&self, address: &str) -> Result<u64, ChainAccessError> {
        let result = self.ws.request("system_accountNextIndex", json!([address])).await?;
        result.as_u64().ok_or_else(|| ChainAccessError::Codec(format!("bad nonce response {result}")))
    }

    async fn asset_decimals(&self, asset_id: u32) -> Result<u32, ChainAccessError> {
        let key = format!("0x{}", hex::encode(codec::assets_metadata_key(asset_id)));
        let result = self.ws.request("state_getStorage", json!([key])).await?;
        let Some(value_hex) = result.as_str() else {
            return Err(ChainAccessError::Rpc(format!("no metadata on chain for asset {asset_id}")));
        };
        let bytes =
            hex::decode(value_hex.trim_start_matches("0x")).map_err(|e| ChainAccessError::Codec(e.to_string()))?;
        codec::decode_asset_metadata_decimals(&bytes).map_err(|e| ChainAccessError::Codec(e.to_string()))
    }

    async fn asset_balance(&self, asset_id: u32, address: &str) -> Result<u128, ChainAccessError> {
        let (account, _) =
            ss58::decode(address).map_err(|e| ChainAccessError::Codec(format!("bad address {address}: {e}")))?;
        let key = format!("0x{}", hex::encode(codec::assets_account_key(asset_id, &account)));
        let result = self.ws.request("state_getStorage", json!([key])).await?;
        match result.as_str() {
            // No storage entry means the account holds none of this asset.
            None => Ok(0),
            Some(value_hex) => {
                let bytes = hex::decode(value_hex.trim_start_matches("0x"))
                    .map_err(|e| ChainAccessError::Codec(e.to_string()))?;
                codec::decode_asset_account_balance(&bytes).map_err(|e| ChainAccessError::Codec(e.to_string()))
            },
        }
    }
}

/// Opens [`RpcChainClient`]s for the connection manager's endpoint sweep.
pub struct RpcConnector {
    chain: ChainConfig,
}

impl RpcConnector {
    pub fn new(chain: ChainConfig) -> Self {
        Self { chain }
    }
}

impl ChainConnector for RpcConnector {
    type Client = RpcChainClient;

    async fn connect(&self, endpoint: &str) -> Result<Self::Client, ChainAccessError> {
        RpcChainClient::connect(endpoint, &self.chain).await
    }
}
