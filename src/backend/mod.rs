//! Storage backend capabilities.
//!
//! Backends (embedded, relational, stake-specific) live outside this core. Each one implements the
//! small capability set below and owns its persisted state exclusively; the sync and reorg engines
//! only sequence instructions and never reach into backend internals. All methods take `&self` so a
//! backend can be shared between its consumer task and the converter's enrichment lookups.

/// In-memory block index implementing every capability
pub mod memory;
/// File-based snapshot persistence
pub mod repositories;

use crate::chain::{ChainHeight, VerboseBlock};
use crate::utils::Amount;
use async_trait::async_trait;

pub use memory::MemoryBackend;
pub use repositories::{FileSnapshotRepository, SnapshotRepository};

/// Error types for backend operations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Failed to apply block at height {height}: {reason}")]
	Apply { height: ChainHeight, reason: String },

	#[error("Failed to roll back block {hash}: {reason}")]
	Rollback { hash: String, reason: String },

	#[error("Storage error: {0}")]
	Storage(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Snapshot error: {0}")]
	Snapshot(String),
}

/// Address information resolved for a previous outpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutpointAddresses {
	/// Backend row ids of the funding output, one per address.
	pub ids: Vec<u64>,
	pub addresses: Vec<String>,
	pub value: Amount,
}

/// A spend of one output of a funding transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpend {
	pub funding_vout_index: u32,
	pub spending_vin_index: u32,
	pub spending_tx_hash: String,
	pub block_height: ChainHeight,
}

/// Address and spend lookups used to enrich converted transactions.
///
/// Only mined data is indexed, so answers never reflect mempool transactions.
#[async_trait]
pub trait AddressLookup: Send + Sync {
	/// Addresses and value of the output `vout` of transaction `txid`.
	async fn retrieve_address_ids_by_outpoint(
		&self,
		txid: &str,
		vout: u32,
	) -> Result<OutpointAddresses, BackendError>;

	/// Spends of outputs of `funding_txid` paying to any of `addresses`.
	async fn get_address_spend_by_funding_hash(
		&self,
		addresses: &[String],
		funding_txid: &str,
	) -> Result<Vec<AddressSpend>, BackendError>;
}

/// A backend that can be driven forward block by block.
#[async_trait]
pub trait SyncBackend: Send + Sync {
	/// Name used in logs.
	fn name(&self) -> &str;

	/// Height of the last applied block, `-1` when nothing has been applied.
	async fn last_synced_height(&self) -> ChainHeight;

	/// Whether blocks handed to `apply_block` must carry full transaction detail.
	fn wants_transactions(&self) -> bool {
		false
	}

	/// Apply the next block.
	async fn apply_block(&self, block: &VerboseBlock) -> Result<(), BackendError>;
}

/// A backend that can undo its tip block during a reorganization.
#[async_trait]
pub trait ReorgBackend: SyncBackend {
	/// Undo the block with `hash`, which must be the current tip.
	async fn rollback_block(&self, hash: &str) -> Result<(), BackendError>;
}

/// View of the locally held chain, used to find a common ancestor with the chain-server.
#[async_trait]
pub trait LocalChain: Send + Sync {
	/// Hash of the locally held block at `height`.
	async fn local_block_hash(&self, height: ChainHeight) -> Result<Option<String>, BackendError>;
}
