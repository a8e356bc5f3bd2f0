//! Test backends: an in-memory payment store, a scriptable chain client and environment
//! preparation helpers for SQLite-backed tests.

mod memory;
mod mock_chain;
#[cfg(feature = "sqlite")]
pub mod prepare_env;

pub use memory::MemoryStore;
pub use mock_chain::{asset_transfer_extrinsic, transfer_extrinsic, MockChain, MockConnector};
