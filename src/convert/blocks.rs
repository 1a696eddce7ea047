use super::transactions::ResultConverter;
use super::types::CanonicalBlock;
use crate::chain::BlockVerboseResult;
use crate::utils::Amount;

impl ResultConverter {
	/// Convert raw verbose blocks, preserving order.
	///
	/// `is_main_chain` is set to `height > 0`. Consumers needing reorg-verified main chain
	/// membership must check against the chain-server themselves.
	pub fn convert_blocks(&self, raw_blocks: &[BlockVerboseResult]) -> Vec<CanonicalBlock> {
		raw_blocks.iter().map(|raw| self.convert_block(raw)).collect()
	}

	fn convert_block(&self, raw: &BlockVerboseResult) -> CanonicalBlock {
		let height = raw.height;
		let voters = raw.voters;
		let votes = Amount::from_atoms(
			self.subsidy
				.stake_vote(height)
				.atoms()
				.saturating_mul(i64::from(voters)),
		);
		let reward = self.subsidy.work(height, voters) + votes + self.subsidy.tax(height, voters);

		CanonicalBlock {
			hash: raw.hash.clone(),
			size: raw.size,
			height,
			version: raw.version,
			merkle_root: raw.merkle_root.clone(),
			stake_root: raw.stake_root.clone(),
			tx: raw.tx_ids().into_iter().chain(raw.stake_tx_ids()).collect(),
			time: raw.time,
			nonce: raw.nonce,
			bits: raw.bits.clone(),
			difficulty: raw.difficulty,
			confirmations: raw.confirmations,
			previous_hash: raw.previous_hash.clone(),
			next_hash: raw.next_hash.clone(),
			reward: reward.to_coin(),
			is_main_chain: height > 0,
		}
	}
}
