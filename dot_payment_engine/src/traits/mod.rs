//! The seams between the engine and its external collaborators.
//!
//! Two traits define everything the engine needs from the outside world: [`PaymentStore`] for
//! the order/ledger store and [`ChainApi`] for the chain client (plus [`ChainConnector`], the
//! factory the connection manager drives). Production implementations live in [`crate::sqlite`]
//! and [`crate::rpc`]; the test implementations in [`crate::test_utils`].

mod chain_api;
mod payment_store;

pub use chain_api::{
    Block,
    BlockHeader,
    ChainApi,
    ChainConnector,
    Extrinsic,
    RuntimeVersion,
    TransferArgs,
    TxStatus,
};
pub use payment_store::{PaymentStore, PaymentStoreError};

use thiserror::Error;

/// Errors raised while resolving chain configuration or establishing/using a chain connection.
#[derive(Debug, Clone, Error)]
pub enum ChainAccessError {
    #[error("No chain named {0} is configured")]
    ChainNotConfigured(String),
    #[error("Could not connect to any of the {endpoints} endpoints of {chain} after {sweeps} sweeps")]
    AllEndpointsFailed { chain: String, endpoints: usize, sweeps: u32 },
    #[error("Could not open a connection to {0}: {1}")]
    ConnectFailed(String, String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("The connection to the chain was dropped")]
    Disconnected,
    #[error("Could not decode chain data: {0}")]
    Codec(String),
}
