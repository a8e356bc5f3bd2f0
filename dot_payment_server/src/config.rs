use std::{env, fs};

use dot_payment_engine::config::{ChainConfig, RetryPolicy};
use dpg_common::Secret;
use log::*;
use serde::Deserialize;

use crate::errors::ServerError;

const DEFAULT_DPG_HOST: &str = "127.0.0.1";
const DEFAULT_DPG_PORT: u16 = 3000;
const DEFAULT_CHAIN_SPEC_PATH: &str = "config/chains.json";
const DEFAULT_CHAIN_NAME: &str = "polkadot";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// The active chain. Must name one of the entries in the chain spec file.
    pub chain_name: String,
    /// The master seed all deposit accounts are derived from.
    pub seed: Secret<String>,
    /// The treasury address paid orders are swept to (any SS58 encoding; canonicalized at
    /// startup).
    pub recipient: String,
    pub chains: Vec<ChainConfig>,
    pub retry: RetryPolicy,
    pub instance_id: String,
    pub remark: String,
}

impl ServerConfig {
    pub fn from_env_or_default() -> Self {
        let host = env::var("DPG_HOST").ok().unwrap_or_else(|| DEFAULT_DPG_HOST.into());
        let port = env::var("DPG_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!("🪛️ {s} is not a valid port for DPG_PORT. {e} Using the default, {DEFAULT_DPG_PORT}, instead.");
                    DEFAULT_DPG_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_DPG_PORT);
        let database_url = dot_payment_engine::sqlite::db::db_url();
        let chain_name = env::var("DPG_CHAIN_NAME").ok().unwrap_or_else(|| {
            info!("🪛️ DPG_CHAIN_NAME is not set. Using {DEFAULT_CHAIN_NAME}.");
            DEFAULT_CHAIN_NAME.into()
        });
        let seed = Secret::new(env::var("DPG_SEED").unwrap_or_else(|_| {
            error!("🪛️ DPG_SEED is not set. Deposit accounts cannot be derived without it.");
            String::default()
        }));
        let recipient = env::var("DPG_RECIPIENT").unwrap_or_else(|_| {
            error!("🪛️ DPG_RECIPIENT is not set. Please set it to the treasury address funds are swept to.");
            String::default()
        });
        let chains = load_chain_spec().unwrap_or_else(|e| {
            error!("🪛️ Could not load the chain spec: {e}. The server will not be able to connect to any chain.");
            Vec::new()
        });
        let retry = retry_policy_from_env();
        let instance_id = env::var("DPG_INSTANCE_ID").ok().unwrap_or_else(|| "instance-1".into());
        let remark = env::var("DPG_REMARK").unwrap_or_default();
        Self { host, port, database_url, chain_name, seed, recipient, chains, retry, instance_id, remark }
    }

    /// The configuration of the active chain.
    pub fn active_chain(&self) -> Result<&ChainConfig, ServerError> {
        self.chains
            .iter()
            .find(|c| c.name == self.chain_name)
            .ok_or_else(|| ServerError::ConfigurationError(format!("Chain configuration for {} not found", self.chain_name)))
    }
}

#[derive(Debug, Deserialize)]
struct ChainSpecFile {
    chains: Vec<ChainConfig>,
}

fn load_chain_spec() -> Result<Vec<ChainConfig>, ServerError> {
    let path = env::var("DPG_CHAIN_SPEC").ok().unwrap_or_else(|| {
        info!("🪛️ DPG_CHAIN_SPEC is not set. Using {DEFAULT_CHAIN_SPEC_PATH}.");
        DEFAULT_CHAIN_SPEC_PATH.into()
    });
    let raw = fs::read_to_string(&path)
        .map_err(|e| ServerError::ConfigurationError(format!("Could not read chain spec at {path}: {e}")))?;
    let spec: ChainSpecFile = serde_json::from_str(&raw)
        .map_err(|e| ServerError::ConfigurationError(format!("Invalid chain spec at {path}: {e}")))?;
    if spec.chains.is_empty() {
        warn!("🪛️ The chain spec at {path} lists no chains.");
    }
    Ok(spec.chains)
}

fn retry_policy_from_env() -> RetryPolicy {
    let default = RetryPolicy::default();
    let max_retries = env::var("DPG_MAX_RETRIES")
        .ok()
        .and_then(|s| {
            s.parse::<u32>()
                .map_err(|e| warn!("🪛️ Invalid configuration value for DPG_MAX_RETRIES. {e}"))
                .ok()
        })
        .unwrap_or(default.max_retries);
    let retry_delay = env::var("DPG_RETRY_DELAY_MS")
        .ok()
        .and_then(|s| {
            s.parse::<u64>()
                .map(std::time::Duration::from_millis)
                .map_err(|e| warn!("🪛️ Invalid configuration value for DPG_RETRY_DELAY_MS. {e}"))
                .ok()
        })
        .unwrap_or(default.retry_delay);
    RetryPolicy { max_retries, retry_delay }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chain_spec_file_parses() {
        let json = r#"{
            "chains": [
                {
                    "name": "polkadot",
                    "native_token": "DOT",
                    "decimals": 10,
                    "endpoints": ["wss://rpc.polkadot.io"]
                },
                {
                    "name": "statemint",
                    "native_token": "DOT",
                    "decimals": 10,
                    "endpoints": ["wss://statemint-rpc.polkadot.io"],
                    "assets": [{ "name": "USDt", "id": 1984, "fee_reserve": 0.7 }]
                }
            ]
        }"#;
        let spec: ChainSpecFile = serde_json::from_str(json).unwrap();
        assert_eq!(spec.chains.len(), 2);
        assert_eq!(spec.chains[1].assets[0].id, 1984);
    }

    #[test]
    fn active_chain_resolution() {
        let config = ServerConfig {
            host: "localhost".into(),
            port: 3000,
            database_url: "sqlite://:memory:".into(),
            chain_name: "polkadot".into(),
            seed: Secret::new("seed".into()),
            recipient: String::new(),
            chains: vec![ChainConfig {
                name: "polkadot".into(),
                native_token: "DOT".into(),
                decimals: 10,
                endpoints: vec!["wss://rpc.polkadot.io".into()],
                assets: vec![],
                call_indices: Default::default(),
                tx_extensions: Default::default(),
            }],
            retry: RetryPolicy::default(),
            instance_id: "instance-1".into(),
            remark: String::new(),
        };
        assert!(config.active_chain().is_ok());
        let mut misconfigured = config.clone();
        misconfigured.chain_name = "kusama".into();
        assert!(misconfigured.active_chain().is_err());
    }
}
