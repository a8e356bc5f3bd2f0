mod secret;
mod token_amount;

pub mod op;

pub use secret::Secret;
pub use token_amount::{TokenAmount, TokenAmountConversionError};
