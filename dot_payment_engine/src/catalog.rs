//! Resolution of order currencies to concrete chain assets.

use log::*;
use thiserror::Error;

use dpg_common::TokenAmount;

use crate::{
    config::{ChainConfig, FALLBACK_ASSET_DECIMALS},
    traits::ChainApi,
};

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("The currency {0} is not supported on chain {1}")]
    UnsupportedAsset(String, String),
}

/// A resolved asset: what the matcher and the withdrawal builder work with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSpec {
    /// The currency symbol as orders refer to it.
    pub symbol: String,
    /// `None` for the chain's native token.
    pub asset_id: Option<u32>,
    pub decimals: u32,
}

impl AssetSpec {
    pub fn is_native(&self) -> bool {
        self.asset_id.is_none()
    }
}

/// Static lookup of the active chain's assets. Decimals for custom assets are fetched from the
/// chain at resolve time, because asset metadata can change after the gateway was configured.
#[derive(Debug, Clone)]
pub struct AssetCatalog {
    chain: ChainConfig,
}

impl AssetCatalog {
    pub fn new(chain: ChainConfig) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    pub fn chain_name(&self) -> &str {
        &self.chain.name
    }

    /// The native token of the active chain, with chain-level decimals.
    pub fn native_spec(&self) -> AssetSpec {
        AssetSpec { symbol: self.chain.native_token.clone(), asset_id: None, decimals: self.chain.decimals }
    }

    /// Checks that `symbol` denotes either the native token or a configured asset, without
    /// touching the chain. Used to validate order currencies at creation time.
    pub fn check_supported(&self, symbol: &str) -> Result<(), CatalogError> {
        if self.chain.is_native(symbol) || self.chain.asset(symbol).is_some() {
            Ok(())
        } else {
            Err(CatalogError::UnsupportedAsset(symbol.to_string(), self.chain.name.clone()))
        }
    }

    /// The fee reserve for the given spec, in display units. Zero for the native token, whose
    /// sweep pays fees out of the transferred balance.
    pub fn fee_reserve(&self, spec: &AssetSpec) -> TokenAmount {
        match spec.asset_id {
            None => TokenAmount::zero(),
            Some(_) => self
                .chain
                .asset(&spec.symbol)
                .map(|a| a.fee_reserve())
                .unwrap_or_else(|| TokenAmount::from(crate::config::DEFAULT_FEE_RESERVE)),
        }
    }

    /// Resolves a currency symbol to an [`AssetSpec`].
    ///
    /// For custom assets the decimals are queried from the chain at call time; if the query
    /// fails, processing degrades to [`FALLBACK_ASSET_DECIMALS`] rather than aborting, so a
    /// flaky metadata query cannot stall block reconciliation.
    pub async fn resolve<C: ChainApi>(&self, symbol: &str, chain: &C) -> Result<AssetSpec, CatalogError> {
        if self.chain.is_native(symbol) {
            return Ok(self.native_spec());
        }
        let asset = self
            .chain
            .asset(symbol)
            .ok_or_else(|| CatalogError::UnsupportedAsset(symbol.to_string(), self.chain.name.clone()))?;
        let decimals = match chain.asset_decimals(asset.id).await {
            Ok(d) => d,
            Err(e) => {
                error!(
                    "🏛️ Error fetching decimals for asset {} (id {}): {e}. Falling back to {FALLBACK_ASSET_DECIMALS}",
                    asset.name, asset.id
                );
                FALLBACK_ASSET_DECIMALS
            },
        };
        Ok(AssetSpec { symbol: asset.name.clone(), asset_id: Some(asset.id), decimals })
    }
}
