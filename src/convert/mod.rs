//! Result normalization.
//!
//! Turns raw chain-server results into the canonical block and transaction shapes served to API
//! consumers, deriving economic fields (value in/out, fees, reward) and enriching inputs and outputs
//! with address and spend data from a backend.

/// Block conversion
mod blocks;
/// Subsidy schedule used for block rewards
pub mod subsidy;
/// Transaction conversion and the converter itself
pub(crate) mod transactions;
/// Canonical output shapes
pub mod types;

pub use subsidy::{SubsidyParams, SubsidySchedule};
pub use transactions::ResultConverter;
pub use types::{
	CanonicalBlock, CanonicalTx, ConversionFilters, Input, Output, ScriptPubKey, ScriptSig,
	SpentInfo,
};
