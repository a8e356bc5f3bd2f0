//! Engine events and the hook system that dispatches them.
//!
//! The reconciliation and withdrawal engines publish events instead of calling side-effect code
//! directly, so webhook delivery and the auto-sweep trigger stay off the block-processing
//! critical path. Handlers run on detached tasks; a slow handler can never stall the watcher.

mod channel;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use hooks::{EventHandlers, EventHooks, EventProducers};

use dpg_common::TokenAmount;

use crate::db_types::Order;

/// A matched incoming transfer was credited to an order.
#[derive(Debug, Clone)]
pub struct PaymentReceivedEvent {
    /// The order as it stands after the credit.
    pub order: Order,
    /// The credited amount, in display units.
    pub amount: TokenAmount,
    pub transaction_hash: String,
    pub block_number: u64,
}

/// An order's repaid amount reached its target and the order flipped to paid.
#[derive(Debug, Clone)]
pub struct OrderPaidEvent {
    pub order: Order,
}

/// A sweep transaction for a paid order was included in a block.
#[derive(Debug, Clone)]
pub struct WithdrawalCompletedEvent {
    pub order: Order,
    pub transaction_hash: String,
    pub block_number: u64,
}
