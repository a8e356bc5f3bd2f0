use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use dpg_common::TokenAmount;
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

//--------------------------------------        OrderId        -------------------------------------------------------
/// The externally supplied, immutable order identifier. Also the derivation sub-path for the
/// order's deposit account, so two distinct ids never share a deposit address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OrderId(pub String);

impl FromStr for OrderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl OrderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------    PaymentStatus      -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// The order is awaiting (full) payment. Partial repayments leave the order pending.
    Pending,
    /// The repaid amount has reached the order amount. Terminal; never regresses.
    Paid,
    /// The order expired before being paid in full.
    TimedOut,
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid status value: {0}")]
pub struct StatusConversionError(pub String);

impl FromStr for PaymentStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "timed_out" => Ok(Self::TimedOut),
            s => Err(StatusConversionError(s.to_string())),
        }
    }
}

impl From<String> for PaymentStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid payment status: {value}. But this conversion cannot fail. Defaulting to pending");
            PaymentStatus::Pending
        })
    }
}

//--------------------------------------   WithdrawalStatus    -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// No sweep will ever be made for this order.
    None,
    /// The order is waiting for full repayment, after which a sweep is triggered.
    Waiting,
    /// A sweep was attempted and did not confirm. Recoverable via a forced withdrawal only.
    Failed,
    /// The sweep transaction was included in a block.
    Completed,
}

impl Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WithdrawalStatus::None => write!(f, "none"),
            WithdrawalStatus::Waiting => write!(f, "waiting"),
            WithdrawalStatus::Failed => write!(f, "failed"),
            WithdrawalStatus::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for WithdrawalStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "waiting" => Ok(Self::Waiting),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            s => Err(StatusConversionError(s.to_string())),
        }
    }
}

impl From<String> for WithdrawalStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid withdrawal status: {value}. But this conversion cannot fail. Defaulting to waiting");
            WithdrawalStatus::Waiting
        })
    }
}

//--------------------------------------        Order          -------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(skip)]
    pub id: i64,
    pub order_id: OrderId,
    /// The target amount, in display units of `currency`. Unset until the merchant provides it;
    /// an order without an amount can never be marked paid.
    pub amount: Option<TokenAmount>,
    /// Running total of matched incoming transfers. Monotonically non-decreasing.
    pub repaid_amount: TokenAmount,
    pub currency: Option<String>,
    /// The deposit address, derived once from `(seed, order_id)` at creation. Never changes.
    pub payment_account: String,
    /// The treasury address funds are swept to.
    pub recipient: String,
    pub payment_status: PaymentStatus,
    pub withdrawal_status: WithdrawalStatus,
    pub callback: Option<String>,
    pub payment_page: Option<String>,
    pub redirect_url: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------       NewOrder        -------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub amount: Option<TokenAmount>,
    pub currency: Option<String>,
    pub payment_account: String,
    pub recipient: String,
    pub callback: Option<String>,
}

impl NewOrder {
    pub fn new(order_id: OrderId, payment_account: String, recipient: String) -> Self {
        Self { order_id, amount: None, currency: None, payment_account, recipient, callback: None }
    }

    pub fn with_amount(mut self, amount: TokenAmount) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn with_callback<S: Into<String>>(mut self, callback: S) -> Self {
        self.callback = Some(callback.into());
        self
    }
}

//--------------------------------------      OrderUpdate      -------------------------------------------------------
/// A partial update to an existing order. Only the merchant-settable fields are present; the
/// deposit account, statuses and repayment tally can never be modified through this path.
#[derive(Debug, Clone, Default)]
pub struct OrderUpdate {
    pub new_amount: Option<TokenAmount>,
    pub new_currency: Option<String>,
    pub new_callback: Option<String>,
}

impl OrderUpdate {
    pub fn is_empty(&self) -> bool {
        self.new_amount.is_none() && self.new_currency.is_none() && self.new_callback.is_none()
    }
}

//--------------------------------------     CreditResult      -------------------------------------------------------
/// The outcome of applying a matched incoming transfer to an order.
#[derive(Debug, Clone)]
pub struct CreditResult {
    /// The order as it stands after the credit (and possible status flip).
    pub order: Order,
    /// True iff this credit transitioned the order from pending to paid.
    pub newly_paid: bool,
}

//--------------------------------------     EntryStatus       -------------------------------------------------------
/// The status tag on a ledger entry. `pending` marks the placeholder written at order creation,
/// `paid` an observed incoming transfer, and `completed` a confirmed sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Paid,
    Completed,
}

impl Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryStatus::Pending => write!(f, "pending"),
            EntryStatus::Paid => write!(f, "paid"),
            EntryStatus::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for EntryStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "completed" => Ok(Self::Completed),
            s => Err(StatusConversionError(s.to_string())),
        }
    }
}

//--------------------------------------     LedgerEntry       -------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    #[serde(skip)]
    pub id: i64,
    pub block_number: i64,
    pub position_in_block: i64,
    pub timestamp: DateTime<Utc>,
    /// Hex encoding of the raw extrinsic bytes. Empty for placeholder entries.
    pub transaction_bytes: String,
    pub sender: String,
    pub recipient: String,
    pub amount: TokenAmount,
    pub currency: String,
    pub status: EntryStatus,
    pub chain_name: String,
    pub transaction_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub block_number: i64,
    pub position_in_block: i64,
    pub transaction_bytes: String,
    pub sender: String,
    pub recipient: String,
    pub amount: TokenAmount,
    pub currency: String,
    pub status: EntryStatus,
    pub chain_name: String,
    pub transaction_hash: String,
}

impl NewLedgerEntry {
    /// The placeholder entry appended when an order is first created.
    pub fn placeholder(order: &Order, chain_name: &str) -> Self {
        Self {
            block_number: 0,
            position_in_block: 0,
            transaction_bytes: String::new(),
            sender: String::new(),
            recipient: order.payment_account.clone(),
            amount: order.amount.unwrap_or_default(),
            currency: order.currency.clone().unwrap_or_default(),
            status: EntryStatus::Pending,
            chain_name: chain_name.to_string(),
            transaction_hash: String::new(),
        }
    }
}
