//! Canonical block and transaction shapes served to downstream API consumers.
//!
//! Field names are part of the external JSON contract and must not change.

use crate::chain::ChainHeight;
use serde::Serialize;

/// Script signature of an input, populated according to the conversion filters.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ScriptSig {
	pub hex: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub asm: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Input {
	#[serde(skip_serializing_if = "String::is_empty")]
	pub txid: String,
	pub vout: u32,
	pub sequence: u32,
	/// Position of the input in the original transaction.
	pub n: u32,
	#[serde(rename = "scriptSig", skip_serializing_if = "Option::is_none")]
	pub script_sig: Option<ScriptSig>,
	/// Resolved funding address, when the previous output is indexed.
	#[serde(rename = "addr", skip_serializing_if = "Option::is_none")]
	pub address: Option<String>,
	#[serde(rename = "valueSat")]
	pub value_sat: i64,
	pub value: f64,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub coinbase: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ScriptPubKey {
	pub hex: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub asm: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub addresses: Vec<String>,
	#[serde(rename = "type")]
	pub script_type: String,
}

/// Spend status of an output. Present only when a spend was matched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpentInfo {
	#[serde(rename = "spentTxId")]
	pub spent_tx_id: String,
	#[serde(rename = "spentIndex")]
	pub spent_index: u32,
	#[serde(rename = "spentHeight")]
	pub spent_height: ChainHeight,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Output {
	pub value: f64,
	pub n: u32,
	#[serde(rename = "scriptPubKey")]
	pub script_pub_key: ScriptPubKey,
	#[serde(flatten)]
	pub spent: Option<SpentInfo>,
}

impl Output {
	pub fn is_spent(&self) -> bool {
		self.spent.is_some()
	}
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CanonicalTx {
	pub txid: String,
	pub version: i32,
	pub locktime: u32,
	#[serde(rename = "blockhash", skip_serializing_if = "String::is_empty")]
	pub block_hash: String,
	#[serde(rename = "blockheight")]
	pub block_height: ChainHeight,
	pub confirmations: i64,
	pub time: i64,
	#[serde(rename = "blocktime")]
	pub block_time: i64,
	pub size: u32,
	pub vin: Vec<Input>,
	pub vout: Vec<Output>,
	#[serde(rename = "valueIn")]
	pub value_in: f64,
	#[serde(rename = "valueOut")]
	pub value_out: f64,
	pub fees: f64,
	#[serde(rename = "isCoinBase")]
	pub is_coinbase: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CanonicalBlock {
	pub hash: String,
	pub size: i32,
	pub height: ChainHeight,
	pub version: i32,
	#[serde(rename = "merkleroot")]
	pub merkle_root: String,
	#[serde(rename = "stakeroot")]
	pub stake_root: String,
	/// Regular transaction ids followed by stake transaction ids.
	pub tx: Vec<String>,
	pub time: i64,
	pub nonce: u32,
	pub bits: String,
	pub difficulty: f64,
	#[serde(rename = "confirmations")]
	pub confirmations: i64,
	#[serde(rename = "previousblockhash")]
	pub previous_hash: String,
	#[serde(rename = "nextblockhash", skip_serializing_if = "String::is_empty")]
	pub next_hash: String,
	/// Block reward in coins.
	pub reward: f64,
	/// `height > 0`. An approximation, not verified against reorgs.
	#[serde(rename = "isMainChain")]
	pub is_main_chain: bool,
}

/// Which optional parts of a transaction the converter populates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionFilters {
	pub omit_script_asm: bool,
	pub omit_script_sig: bool,
	pub omit_spend_info: bool,
}
