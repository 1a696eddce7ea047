//! Conversion of raw chain-server transactions into canonical transactions.
//!
//! Values are accumulated in atoms so that summing many outputs never drifts. Malformed values are
//! logged and counted as zero; a single bad field never fails the batch.

use super::subsidy::SubsidySchedule;
use super::types::{
	CanonicalTx, ConversionFilters, Input, Output, ScriptPubKey, ScriptSig, SpentInfo,
};
use crate::backend::AddressLookup;
use crate::chain::{RawVin, TxRawResult};
use crate::utils::Amount;
use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, warn};

/// Converts raw chain-server results into their canonical shapes.
///
/// Enrichment lookups go through the backend handed in at construction; lookup failures degrade the
/// affected fields only.
#[derive(Clone)]
pub struct ResultConverter {
	pub(super) lookup: Arc<dyn AddressLookup>,
	pub(super) subsidy: Arc<dyn SubsidySchedule>,
}

fn coin_to_amount(value: f64, what: &str, txid: &str) -> Amount {
	Amount::from_coin(value).unwrap_or_else(|e| {
		warn!("Invalid {} value in transaction {}: {}", what, txid, e);
		Amount::ZERO
	})
}

fn is_coinbase(tx: &TxRawResult) -> bool {
	tx.vin.first().is_some_and(|vin| !vin.coinbase.is_empty())
}

impl ResultConverter {
	pub fn new(lookup: Arc<dyn AddressLookup>, subsidy: Arc<dyn SubsidySchedule>) -> Self {
		Self { lookup, subsidy }
	}

	/// Convert a batch of raw transactions, preserving order.
	pub async fn convert_transactions(
		&self,
		raw_txs: &[TxRawResult],
		filters: ConversionFilters,
	) -> Vec<CanonicalTx> {
		let mut converted = Vec::with_capacity(raw_txs.len());
		for raw in raw_txs {
			converted.push(self.convert_transaction(raw, filters).await);
		}
		converted
	}

	async fn convert_transaction(&self, raw: &TxRawResult, filters: ConversionFilters) -> CanonicalTx {
		let coinbase = is_coinbase(raw);
		let mempool = raw.confirmations == 0;

		let mut value_in = Amount::ZERO;
		let mut vin = Vec::with_capacity(raw.vin.len());
		for (n, raw_vin) in raw.vin.iter().enumerate() {
			let (input, value) = self.convert_input(raw, raw_vin, n as u32, mempool, filters).await;
			value_in += value;
			vin.push(input);
		}

		let mut value_out = Amount::ZERO;
		let mut vout = Vec::with_capacity(raw.vout.len());
		for raw_vout in &raw.vout {
			let value = coin_to_amount(raw_vout.value, "output", &raw.txid);
			value_out += value;
			let script = &raw_vout.script_pub_key;
			vout.push(Output {
				value: value.to_coin(),
				n: raw_vout.n,
				script_pub_key: ScriptPubKey {
					hex: script.hex.clone(),
					asm: if filters.omit_script_asm {
						String::new()
					} else {
						script.asm.clone()
					},
					addresses: script.addresses.clone(),
					script_type: script.script_type.clone(),
				},
				spent: None,
			});
		}

		let mut fees = value_in - value_out;
		if coinbase {
			// Coinbase inputs mint coins; nothing is spent.
			value_in = Amount::ZERO;
			fees = Amount::ZERO;
			for input in &mut vin {
				input.value = 0.0;
				input.value_sat = 0;
			}
		}

		// Only mined spends are indexed, so mempool transactions skip the lookup.
		if !filters.omit_spend_info && !mempool {
			self.populate_spends(&raw.txid, &mut vout).await;
		}

		CanonicalTx {
			txid: raw.txid.clone(),
			version: raw.version,
			locktime: raw.lock_time,
			block_hash: raw.block_hash.clone(),
			block_height: raw.block_height,
			confirmations: raw.confirmations,
			time: raw.time,
			block_time: raw.block_time,
			size: raw.size(),
			vin,
			vout,
			value_in: value_in.to_coin(),
			value_out: value_out.to_coin(),
			fees: fees.to_coin(),
			is_coinbase: coinbase,
		}
	}

	async fn convert_input(
		&self,
		raw: &TxRawResult,
		raw_vin: &RawVin,
		n: u32,
		mempool: bool,
		filters: ConversionFilters,
	) -> (Input, Amount) {
		let mut value = coin_to_amount(raw_vin.amount_in, "input", &raw.txid);

		let script_sig = match (&raw_vin.script_sig, filters.omit_script_sig) {
			(Some(sig), false) => Some(ScriptSig {
				hex: sig.hex.clone(),
				asm: if filters.omit_script_asm {
					String::new()
				} else {
					sig.asm.clone()
				},
			}),
			_ => None,
		};

		let mut address = None;
		let spends_outpoint = raw_vin.coinbase.is_empty() && raw_vin.stakebase.is_empty();
		if spends_outpoint && !raw_vin.txid.is_empty() {
			match self
				.lookup
				.retrieve_address_ids_by_outpoint(&raw_vin.txid, raw_vin.vout)
				.await
			{
				Ok(resolved) => {
					address = resolved.addresses.into_iter().next();
					// Confirmed amounts from the chain-server are authoritative.
					if mempool {
						value = resolved.value;
					}
				}
				Err(e) => debug!(
					"No address for outpoint {}:{} spent by {}: {}",
					raw_vin.txid, raw_vin.vout, raw.txid, e
				),
			}
		}

		let input = Input {
			txid: raw_vin.txid.clone(),
			vout: raw_vin.vout,
			sequence: raw_vin.sequence,
			n,
			script_sig,
			address,
			value_sat: value.atoms(),
			value: value.to_coin(),
			coinbase: raw_vin.coinbase.clone(),
		};
		(input, value)
	}

	async fn populate_spends(&self, txid: &str, vout: &mut [Output]) {
		let addresses: Vec<String> = vout
			.iter()
			.flat_map(|o| o.script_pub_key.addresses.iter().cloned())
			.unique()
			.sorted()
			.collect();
		if addresses.is_empty() {
			return;
		}

		let spends = match self
			.lookup
			.get_address_spend_by_funding_hash(&addresses, txid)
			.await
		{
			Ok(spends) => spends,
			Err(e) => {
				warn!("Spend lookup for {} failed: {}", txid, e);
				return;
			}
		};

		for spend in spends {
			let Some(output) = vout.get_mut(spend.funding_vout_index as usize) else {
				warn!(
					"Spend of {}:{} refers to a missing output",
					txid, spend.funding_vout_index
				);
				continue;
			};
			output.spent = Some(SpentInfo {
				spent_tx_id: spend.spending_tx_hash,
				spent_index: spend.spending_vin_index,
				spent_height: spend.block_height,
			});
		}
	}
}
