mod money;

pub mod helpers;
pub mod op;
mod secret;

pub use money::{Money, MoneyConversionError, Points, BPS_DENOMINATOR, CURRENCY_CODE, CURRENCY_CODE_LOWER};
pub use secret::Secret;
