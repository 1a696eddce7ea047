//! Messages carried by the hub's conduits.

use crate::chain::ChainHeight;
use crate::utils::Amount;

/// A block was connected to the chain-server's main chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockConnected {
	pub hash: String,
	pub height: ChainHeight,
}

/// One step of a reorganization, delivered on a backend's reorg conduit.
///
/// A reorg is always delivered as every `Rollback` (tip first) followed by every `Apply` (lowest
/// height first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorgInstruction {
	Rollback { height: ChainHeight, hash: String },
	Apply { height: ChainHeight, hash: String },
}

impl ReorgInstruction {
	pub fn height(&self) -> ChainHeight {
		match self {
			ReorgInstruction::Rollback { height, .. } | ReorgInstruction::Apply { height, .. } => {
				*height
			}
		}
	}
}

/// A transaction accepted into the chain-server's mempool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMempoolTx {
	pub txid: String,
	pub amount: Amount,
}
