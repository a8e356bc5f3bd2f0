//! Static chain configuration.
//!
//! The gateway is configured with a list of chains (typically loaded from a JSON file by the
//! server crate) and the name of the one active chain. Each chain carries its RPC endpoints in
//! failover order, the native token description and any custom assets that orders may be
//! denominated in.

use std::time::Duration;

use dpg_common::TokenAmount;
use serde::{Deserialize, Serialize};

/// Decimals assumed for a custom asset when the on-chain metadata query fails. The catalog
/// degrades to this value instead of aborting block processing.
pub const FALLBACK_ASSET_DECIMALS: u32 = 12;

/// Fee reserve, in display units, left behind when sweeping a custom-asset deposit account.
/// Fees for asset sweeps are paid in-kind, so the reserve must cover the transaction fee.
pub const DEFAULT_FEE_RESERVE: f64 = 0.05;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub native_token: String,
    pub decimals: u32,
    /// RPC endpoints, tried in listed order.
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
    #[serde(default)]
    pub call_indices: CallIndices,
    #[serde(default)]
    pub tx_extensions: TxExtensions,
}

impl ChainConfig {
    pub fn asset(&self, name: &str) -> Option<&AssetConfig> {
        self.assets.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn is_native(&self, symbol: &str) -> bool {
        self.native_token.eq_ignore_ascii_case(symbol)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// The currency symbol orders use to refer to this asset.
    pub name: String,
    /// The on-chain asset id.
    pub id: u32,
    /// Per-asset fee reserve override, in display units.
    #[serde(default)]
    pub fee_reserve: Option<TokenAmount>,
}

impl AssetConfig {
    pub fn fee_reserve(&self) -> TokenAmount {
        self.fee_reserve.unwrap_or_else(|| TokenAmount::from(DEFAULT_FEE_RESERVE))
    }
}

/// Pallet and call indices for the transfer calls the gateway recognizes and emits. These are
/// runtime-specific; the defaults match the common asset-hub layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallIndices {
    pub balances_pallet: u8,
    pub balances_transfer_allow_death: u8,
    pub balances_transfer_keep_alive: u8,
    pub balances_transfer_all: u8,
    pub assets_pallet: u8,
    pub assets_transfer: u8,
    pub assets_transfer_keep_alive: u8,
}

impl Default for CallIndices {
    fn default() -> Self {
        Self {
            balances_pallet: 10,
            balances_transfer_allow_death: 0,
            balances_transfer_keep_alive: 3,
            balances_transfer_all: 4,
            assets_pallet: 50,
            assets_transfer: 8,
            assets_transfer_keep_alive: 9,
        }
    }
}

/// Which optional signed extensions the active runtime includes in its transaction format.
/// Both the extrinsic decoder and the sweep builder honor these flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TxExtensions {
    /// `ChargeAssetTxPayment`: the tip is followed by an optional fee-asset id.
    pub fee_asset: bool,
    /// `CheckMetadataHash`: a mode byte trails the signed extra, with an optional hash in the
    /// additional payload.
    pub metadata_hash: bool,
}

/// Endpoint-sweep retry policy for the connection manager. A "retry" is a full pass over all
/// configured endpoints, not a single endpoint attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 5, retry_delay: Duration::from_millis(1000) }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chain_config_parses_with_defaults() {
        let json = r#"{
            "name": "asset-hub",
            "native_token": "DOT",
            "decimals": 10,
            "endpoints": ["wss://one.example", "wss://two.example"],
            "assets": [{ "name": "USDt", "id": 1984 }]
        }"#;
        let chain: ChainConfig = serde_json::from_str(json).unwrap();
        assert_eq!(chain.endpoints.len(), 2);
        assert!(chain.is_native("dot"));
        assert_eq!(chain.asset("usdt").unwrap().id, 1984);
        assert!(chain.asset("usdt").unwrap().fee_reserve.is_none());
        assert_eq!(chain.call_indices.assets_pallet, 50);
        assert!(!chain.tx_extensions.fee_asset);
    }

    #[test]
    fn fee_reserve_falls_back_to_default() {
        let asset = AssetConfig { name: "USDt".into(), id: 1984, fee_reserve: None };
        assert_eq!(asset.fee_reserve(), TokenAmount::from(DEFAULT_FEE_RESERVE));
        let asset = AssetConfig { name: "USDt".into(), id: 1984, fee_reserve: Some(TokenAmount::from(0.2)) };
        assert_eq!(asset.fee_reserve(), TokenAmount::from(0.2));
    }
}
