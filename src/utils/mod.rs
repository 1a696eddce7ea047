//!
//! Utility module for the chain index sync service.
//!
//! Hosts the fixed-point amount type shared by the converter, the subsidy schedule and logging.
/// Fixed-point coin amounts and display helpers
pub mod amount;

pub use amount::{ATOMS_PER_COIN, Amount, AmountError, format_coin_amount};
