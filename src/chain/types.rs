//! Types for chain-server JSON-RPC integration.
//!
//! These mirror the verbose result shapes the chain-server returns. Every field carries a serde
//! default so that a partially malformed result still deserializes; the converter treats missing
//! values as zero rather than failing the batch.

use serde::{Deserialize, Serialize};

/// Block height. Signed so that "nothing synced yet" is representable as `-1`.
pub type ChainHeight = i64;

/// Script signature of a transaction input.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawScriptSig {
	#[serde(default)]
	pub asm: String,
	#[serde(default)]
	pub hex: String,
}

/// Script public key of a transaction output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawScriptPubKey {
	#[serde(default)]
	pub asm: String,
	#[serde(default)]
	pub hex: String,
	#[serde(rename = "reqSigs", default)]
	pub req_sigs: i32,
	#[serde(rename = "type", default)]
	pub script_type: String,
	#[serde(default)]
	pub addresses: Vec<String>,
}

/// A transaction input as reported by the chain-server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawVin {
	/// Non-empty only for the minting input of a coinbase transaction.
	#[serde(default)]
	pub coinbase: String,
	#[serde(default)]
	pub stakebase: String,
	#[serde(default)]
	pub txid: String,
	#[serde(default)]
	pub vout: u32,
	#[serde(default)]
	pub tree: i8,
	#[serde(default)]
	pub sequence: u32,
	/// Input value in coins.
	#[serde(rename = "amountin", default)]
	pub amount_in: f64,
	#[serde(rename = "blockheight", default)]
	pub block_height: u32,
	#[serde(rename = "blockindex", default)]
	pub block_index: u32,
	#[serde(rename = "scriptSig", default)]
	pub script_sig: Option<RawScriptSig>,
}

/// A transaction output as reported by the chain-server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawVout {
	/// Output value in coins.
	#[serde(default)]
	pub value: f64,
	#[serde(default)]
	pub n: u32,
	#[serde(default)]
	pub version: u16,
	#[serde(rename = "scriptPubKey", default)]
	pub script_pub_key: RawScriptPubKey,
}

/// Verbose transaction result (`getrawtransaction` with verbose set).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TxRawResult {
	#[serde(default)]
	pub hex: String,
	#[serde(default)]
	pub txid: String,
	#[serde(default)]
	pub version: i32,
	#[serde(rename = "locktime", default)]
	pub lock_time: u32,
	#[serde(default)]
	pub expiry: u32,
	#[serde(default)]
	pub vin: Vec<RawVin>,
	#[serde(default)]
	pub vout: Vec<RawVout>,
	#[serde(rename = "blockhash", default)]
	pub block_hash: String,
	#[serde(rename = "blockheight", default)]
	pub block_height: ChainHeight,
	#[serde(rename = "blockindex", default)]
	pub block_index: u32,
	#[serde(default)]
	pub confirmations: i64,
	#[serde(default)]
	pub time: i64,
	#[serde(rename = "blocktime", default)]
	pub block_time: i64,
}

impl TxRawResult {
	/// Serialized size in bytes, derived from the hex encoding.
	pub fn size(&self) -> u32 {
		(self.hex.len() / 2) as u32
	}
}

/// Verbose block result (`getblock` with verbose set).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlockVerboseResult {
	#[serde(default)]
	pub hash: String,
	#[serde(default)]
	pub confirmations: i64,
	#[serde(default)]
	pub size: i32,
	#[serde(default)]
	pub height: ChainHeight,
	#[serde(default)]
	pub version: i32,
	#[serde(rename = "merkleroot", default)]
	pub merkle_root: String,
	#[serde(rename = "stakeroot", default)]
	pub stake_root: String,
	/// Regular transaction ids, in block order.
	#[serde(default)]
	pub tx: Vec<String>,
	/// Full regular transactions, present only when transaction detail was requested.
	#[serde(rename = "rawtx", default)]
	pub raw_tx: Vec<TxRawResult>,
	/// Stake transaction ids, in block order.
	#[serde(default)]
	pub stx: Vec<String>,
	#[serde(rename = "rawstx", default)]
	pub raw_stx: Vec<TxRawResult>,
	#[serde(default)]
	pub time: i64,
	#[serde(default)]
	pub nonce: u32,
	#[serde(rename = "votebits", default)]
	pub vote_bits: u16,
	#[serde(rename = "finalstate", default)]
	pub final_state: String,
	#[serde(default)]
	pub voters: u16,
	#[serde(rename = "freshstake", default)]
	pub fresh_stake: u8,
	#[serde(default)]
	pub revocations: u8,
	#[serde(rename = "poolsize", default)]
	pub pool_size: u32,
	#[serde(default)]
	pub bits: String,
	#[serde(rename = "sbits", default)]
	pub s_bits: f64,
	#[serde(default)]
	pub difficulty: f64,
	#[serde(rename = "extradata", default)]
	pub extra_data: String,
	#[serde(rename = "stakeversion", default)]
	pub stake_version: u32,
	#[serde(rename = "previousblockhash", default)]
	pub previous_hash: String,
	#[serde(rename = "nextblockhash", default)]
	pub next_hash: String,
}

/// Verbose block header as returned by the chain-server, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawBlockHeader {
	#[serde(default)]
	pub hash: String,
	#[serde(default)]
	pub version: i32,
	#[serde(rename = "previousblockhash", default)]
	pub previous_hash: String,
	#[serde(rename = "merkleroot", default)]
	pub merkle_root: String,
	#[serde(rename = "stakeroot", default)]
	pub stake_root: String,
	#[serde(rename = "votebits", default)]
	pub vote_bits: u16,
	#[serde(rename = "finalstate", default)]
	pub final_state: String,
	#[serde(default)]
	pub voters: u16,
	#[serde(rename = "freshstake", default)]
	pub fresh_stake: u8,
	#[serde(default)]
	pub revocations: u8,
	#[serde(rename = "poolsize", default)]
	pub pool_size: u32,
	/// Compact difficulty bits as a hex string.
	#[serde(default)]
	pub bits: String,
	#[serde(rename = "sbits", default)]
	pub s_bits: f64,
	#[serde(default)]
	pub height: u32,
	#[serde(default)]
	pub size: u32,
	#[serde(default)]
	pub time: i64,
	#[serde(default)]
	pub nonce: u32,
	#[serde(rename = "nextblockhash", default)]
	pub next_hash: String,
}

/// Normalized block header with derived fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlockHeader {
	pub hash: String,
	#[serde(rename = "previousblockhash")]
	pub previous_hash: String,
	pub height: ChainHeight,
	pub confirmations: i64,
	pub version: i32,
	#[serde(rename = "merkleroot")]
	pub merkle_root: String,
	#[serde(rename = "stakeroot")]
	pub stake_root: String,
	#[serde(rename = "votebits")]
	pub vote_bits: u16,
	#[serde(rename = "finalstate")]
	pub final_state: String,
	pub voters: u16,
	#[serde(rename = "freshstake")]
	pub fresh_stake: u8,
	pub revocations: u8,
	#[serde(rename = "poolsize")]
	pub pool_size: u32,
	/// Compact difficulty bits formatted as lowercase hex.
	pub bits: String,
	#[serde(rename = "sbits")]
	pub s_bits: f64,
	pub size: u32,
	pub time: i64,
	pub nonce: u32,
	/// Difficulty as a ratio of the network's proof-of-work limit.
	pub difficulty: f64,
	#[serde(rename = "nextblockhash", skip_serializing_if = "Option::is_none")]
	pub next_hash: Option<String>,
}

/// Block with its ordered transaction id lists. Transient: created per fetch and owned by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerboseBlock {
	pub hash: String,
	pub previous_hash: String,
	pub height: ChainHeight,
	pub time: i64,
	pub voters: u16,
	pub tx: Vec<String>,
	pub stx: Vec<String>,
	/// The untouched chain-server result, for consumers that need more than the summary.
	pub raw: BlockVerboseResult,
}

impl BlockVerboseResult {
	/// Regular transaction ids. A block fetched with full detail carries only `rawtx`, so the ids
	/// come from there.
	pub fn tx_ids(&self) -> Vec<String> {
		ids_or_detail(&self.tx, &self.raw_tx)
	}

	pub fn stake_tx_ids(&self) -> Vec<String> {
		ids_or_detail(&self.stx, &self.raw_stx)
	}
}

fn ids_or_detail(ids: &[String], detail: &[TxRawResult]) -> Vec<String> {
	if ids.is_empty() {
		detail.iter().map(|tx| tx.txid.clone()).collect()
	} else {
		ids.to_vec()
	}
}

impl From<BlockVerboseResult> for VerboseBlock {
	fn from(raw: BlockVerboseResult) -> Self {
		Self {
			hash: raw.hash.clone(),
			previous_hash: raw.previous_hash.clone(),
			height: raw.height,
			time: raw.time,
			voters: raw.voters,
			tx: raw.tx_ids(),
			stx: raw.stake_tx_ids(),
			raw,
		}
	}
}

/// `getstakedifficulty` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StakeDifficultyResult {
	#[serde(rename = "current", default)]
	pub current_stake_difficulty: f64,
	#[serde(rename = "next", default)]
	pub next_stake_difficulty: f64,
}

/// `estimatestakediff` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EstimateStakeDiffResult {
	#[serde(default)]
	pub min: f64,
	#[serde(default)]
	pub max: f64,
	#[serde(default)]
	pub expected: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user: Option<f64>,
}

/// Current, next and estimated stake difficulty merged into one structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StakeDiff {
	#[serde(flatten)]
	pub difficulty: StakeDifficultyResult,
	pub estimates: EstimateStakeDiffResult,
}

/// Error types for chain-server operations
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
	#[error("Connection error: {0}")]
	Connection(String),

	#[error("Chain-server advertises API version {advertised} but {required} is required")]
	VersionIncompatible { advertised: String, required: String },

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("RPC error {code}: {message}")]
	Rpc { code: i64, message: String },

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("WebSocket error: {0}")]
	WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("JSON parse error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Invalid input: {0}")]
	InvalidInput(String),
}

impl ChainError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, ChainError::NotFound(_))
	}

	/// Startup-time failures that should terminate the process.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			ChainError::Connection(_) | ChainError::VersionIncompatible { .. }
		)
	}
}
