//! Block subsidy schedule.
//!
//! The converter only needs the three subsidy components for a block; the arithmetic is kept behind
//! `SubsidySchedule` so networks with different parameters can plug in their own.

use crate::chain::ChainHeight;
use crate::utils::Amount;

pub trait SubsidySchedule: Send + Sync {
	/// Proof-of-work subsidy for a block at `height` with `voters` votes.
	fn work(&self, height: ChainHeight, voters: u16) -> Amount;
	/// Subsidy paid to a single vote at `height`.
	fn stake_vote(&self, height: ChainHeight) -> Amount;
	/// Treasury subsidy for a block at `height` with `voters` votes.
	fn tax(&self, height: ChainHeight, voters: u16) -> Amount;
}

/// Proportional subsidy schedule with a periodic multiplicative reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct SubsidyParams {
	pub base_subsidy: i64,
	pub mul_subsidy: i64,
	pub div_subsidy: i64,
	pub reduction_interval: i64,
	pub work_proportion: i64,
	pub stake_proportion: i64,
	pub tax_proportion: i64,
	pub tickets_per_block: u16,
	pub stake_validation_height: ChainHeight,
}

const TOTAL_PROPORTIONS: i64 = 10;

impl SubsidyParams {
	pub fn mainnet() -> Self {
		Self {
			base_subsidy: 3_119_582_664,
			mul_subsidy: 100,
			div_subsidy: 101,
			reduction_interval: 6_144,
			work_proportion: 6,
			stake_proportion: 3,
			tax_proportion: 1,
			tickets_per_block: 5,
			stake_validation_height: 4_096,
		}
	}

	/// Full block subsidy at `height`, before splitting.
	fn full_subsidy(&self, height: ChainHeight) -> i64 {
		if self.reduction_interval <= 0 || self.div_subsidy == 0 {
			return self.base_subsidy;
		}
		let reductions = height.max(0) / self.reduction_interval;
		let mut subsidy = self.base_subsidy;
		for _ in 0..reductions {
			subsidy = subsidy * self.mul_subsidy / self.div_subsidy;
			if subsidy == 0 {
				break;
			}
		}
		subsidy
	}

	/// Scale a subsidy by the share of votes the block carries once voting is active.
	fn scale_by_voters(&self, subsidy: i64, height: ChainHeight, voters: u16) -> i64 {
		if height < self.stake_validation_height || self.tickets_per_block == 0 {
			return subsidy;
		}
		subsidy * i64::from(voters) / i64::from(self.tickets_per_block)
	}
}

impl Default for SubsidyParams {
	fn default() -> Self {
		Self::mainnet()
	}
}

impl SubsidySchedule for SubsidyParams {
	fn work(&self, height: ChainHeight, voters: u16) -> Amount {
		if height <= 0 {
			return Amount::ZERO;
		}
		let work = self.full_subsidy(height) * self.work_proportion / TOTAL_PROPORTIONS;
		Amount::from_atoms(self.scale_by_voters(work, height, voters))
	}

	fn stake_vote(&self, height: ChainHeight) -> Amount {
		if height < self.stake_validation_height || self.tickets_per_block == 0 {
			return Amount::ZERO;
		}
		let stake = self.full_subsidy(height) * self.stake_proportion / TOTAL_PROPORTIONS;
		Amount::from_atoms(stake / i64::from(self.tickets_per_block))
	}

	fn tax(&self, height: ChainHeight, voters: u16) -> Amount {
		if height <= 0 {
			return Amount::ZERO;
		}
		let tax = self.full_subsidy(height) * self.tax_proportion / TOTAL_PROPORTIONS;
		Amount::from_atoms(self.scale_by_voters(tax, height, voters))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn genesis_pays_nothing() {
		let params = SubsidyParams::mainnet();
		assert_eq!(params.work(0, 0), Amount::ZERO);
		assert_eq!(params.tax(0, 0), Amount::ZERO);
		assert_eq!(params.stake_vote(0), Amount::ZERO);
	}

	#[test]
	fn splits_before_voting_starts() {
		let params = SubsidyParams::mainnet();
		assert_eq!(params.work(1, 0).atoms(), 3_119_582_664 * 6 / 10);
		assert_eq!(params.tax(1, 0).atoms(), 3_119_582_664 / 10);
		assert_eq!(params.stake_vote(1), Amount::ZERO);
	}

	#[test]
	fn reduces_after_interval_and_scales_by_voters() {
		let params = SubsidyParams::mainnet();
		let reduced = 3_119_582_664 * 100 / 101;
		assert_eq!(params.work(6_144, 5).atoms(), reduced * 6 / 10);
		assert_eq!(params.work(6_144, 3).atoms(), reduced * 6 / 10 * 3 / 5);
		assert_eq!(params.stake_vote(6_144).atoms(), reduced * 3 / 10 / 5);
	}
}
