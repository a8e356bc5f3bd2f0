use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul, Neg, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

//--------------------------------------     TokenAmount       -------------------------------------------------------
/// An amount of a chain asset in display units, i.e. after dividing the raw on-chain balance by
/// `10^decimals` for the asset concerned. Orders, ledger entries and repayment tallies all use
/// display units; raw plancks only appear at the chain boundary.
#[derive(Debug, Clone, Copy, Default, Type, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct TokenAmount(f64);

op!(binary TokenAmount, Add, add);
op!(binary TokenAmount, Sub, sub);
op!(inplace TokenAmount, SubAssign, sub_assign);
op!(unary TokenAmount, Neg, neg);

impl Mul<f64> for TokenAmount {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Sum for TokenAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented as a token amount: {0}")]
pub struct TokenAmountConversionError(String);

impl From<f64> for TokenAmount {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl PartialEq for TokenAmount {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TokenAmount {
    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn zero() -> Self {
        Self(0.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0.0
    }

    /// Converts a raw on-chain balance to display units for an asset with the given decimals.
    pub fn from_raw(raw: u128, decimals: u32) -> Self {
        Self(raw as f64 / 10f64.powi(decimals as i32))
    }

    /// Converts the display amount back to raw units, truncating any sub-planck remainder.
    /// Negative amounts convert to zero raw units.
    pub fn to_raw(&self, decimals: u32) -> u128 {
        let raw = self.0 * 10f64.powi(decimals as i32);
        if raw <= 0.0 {
            0
        } else {
            raw as u128
        }
    }
}
