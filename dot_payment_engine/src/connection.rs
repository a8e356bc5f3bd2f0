//! The shared chain connection and its endpoint-failover policy.
//!
//! One [`ConnectionManager`] is constructed at startup and injected into every component that
//! needs chain access. There are no lazy globals; tests get isolation through [`reset`].
//!
//! [`reset`]: ConnectionManager::reset

use std::sync::Arc;

use log::*;
use tokio::sync::{Mutex, RwLock};

use crate::{
    config::{ChainConfig, RetryPolicy},
    traits::{ChainAccessError, ChainConnector},
};

pub struct ConnectionManager<T: ChainConnector> {
    chains: Vec<ChainConfig>,
    chain_name: String,
    policy: RetryPolicy,
    connector: T,
    client: RwLock<Option<T::Client>>,
    active_endpoint: RwLock<Option<String>>,
    // Serializes connection attempts so concurrent callers share one in-flight sweep.
    connect_lock: Mutex<()>,
}

impl<T: ChainConnector> ConnectionManager<T> {
    pub fn new(chains: Vec<ChainConfig>, chain_name: &str, policy: RetryPolicy, connector: T) -> Arc<Self> {
        Arc::new(Self {
            chains,
            chain_name: chain_name.to_string(),
            policy,
            connector,
            client: RwLock::new(None),
            active_endpoint: RwLock::new(None),
            connect_lock: Mutex::new(()),
        })
    }

    /// The configuration of the active chain. A misconfigured chain name is fatal and is never
    /// retried.
    pub fn active_chain(&self) -> Result<&ChainConfig, ChainAccessError> {
        self.chains
            .iter()
            .find(|c| c.name == self.chain_name)
            .ok_or_else(|| ChainAccessError::ChainNotConfigured(self.chain_name.clone()))
    }

    /// The endpoint the current client was established against, if any.
    pub async fn active_endpoint(&self) -> Option<String> {
        self.active_endpoint.read().await.clone()
    }

    /// Returns the shared client handle, connecting first if necessary.
    pub async fn client(&self) -> Result<T::Client, ChainAccessError> {
        if let Some(client) = self.client.read().await.clone() {
            return Ok(client);
        }
        self.connect().await
    }

    /// Establishes the connection by sweeping the active chain's endpoints in listed order.
    ///
    /// A failed sweep is retried up to `max_retries` times after a `retry_delay` pause, so the
    /// total number of sweeps is `max_retries + 1`. Retries count whole sweeps, not individual
    /// endpoints. Concurrent callers block on the same attempt instead of racing their own.
    pub async fn connect(&self) -> Result<T::Client, ChainAccessError> {
        let _guard = self.connect_lock.lock().await;
        // A racing caller may have connected while this one waited for the lock.
        if let Some(client) = self.client.read().await.clone() {
            return Ok(client);
        }
        let chain = self.active_chain()?;
        let mut retries_remaining = self.policy.max_retries;
        let mut sweeps = 0u32;
        loop {
            sweeps += 1;
            for endpoint in &chain.endpoints {
                match self.connector.connect(endpoint).await {
                    Ok(client) => {
                        info!("⛓️ Connected to {} RPC at {endpoint}", chain.name);
                        *self.client.write().await = Some(client.clone());
                        *self.active_endpoint.write().await = Some(endpoint.clone());
                        return Ok(client);
                    },
                    Err(e) => {
                        error!("⛓️ Failed to connect to {} RPC at {endpoint}: {e}. Trying next endpoint", chain.name);
                    },
                }
            }
            if retries_remaining == 0 {
                error!("⛓️ Exhausted all {} RPC endpoints of {} after {sweeps} sweeps", chain.endpoints.len(), chain.name);
                return Err(ChainAccessError::AllEndpointsFailed {
                    chain: chain.name.clone(),
                    endpoints: chain.endpoints.len(),
                    sweeps,
                });
            }
            error!(
                "⛓️ Failed to connect to all {} RPC endpoints. Retrying in {}ms ({}/{})",
                chain.name,
                self.policy.retry_delay.as_millis(),
                self.policy.max_retries - retries_remaining + 1,
                self.policy.max_retries
            );
            retries_remaining -= 1;
            tokio::time::sleep(self.policy.retry_delay).await;
        }
    }

    /// Drops the cached client and endpoint so the next caller reconnects from scratch.
    pub async fn reset(&self) {
        *self.client.write().await = None;
        *self.active_endpoint.write().await = None;
    }
}
