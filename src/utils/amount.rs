//! Fixed-point coin amounts.
//!
//! The chain-server reports values as floating point coins. Summing those directly drifts, so every
//! accumulation in this crate happens on integer atoms and is converted back to coins only for
//! display and for the API shapes.

use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub};

/// Number of atoms in one coin.
pub const ATOMS_PER_COIN: i64 = 100_000_000;

/// Number of decimal places of a coin.
pub const COIN_DECIMALS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum AmountError {
	#[error("amount is not a finite number: {0}")]
	NotFinite(f64),

	#[error("amount {0} does not fit in 64-bit atoms")]
	OutOfRange(f64),
}

/// A signed amount of atoms.
#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Amount(i64);

impl Amount {
	pub const ZERO: Amount = Amount(0);

	pub const fn from_atoms(atoms: i64) -> Self {
		Self(atoms)
	}

	/// Convert a floating point coin value to atoms, rounding half away from zero.
	pub fn from_coin(value: f64) -> Result<Self, AmountError> {
		if !value.is_finite() {
			return Err(AmountError::NotFinite(value));
		}
		let atoms = (value * ATOMS_PER_COIN as f64).round();
		if atoms > i64::MAX as f64 || atoms < i64::MIN as f64 {
			return Err(AmountError::OutOfRange(value));
		}
		Ok(Self(atoms as i64))
	}

	pub const fn atoms(self) -> i64 {
		self.0
	}

	pub fn to_coin(self) -> f64 {
		self.0 as f64 / ATOMS_PER_COIN as f64
	}

	pub fn is_zero(self) -> bool {
		self.0 == 0
	}
}

impl Add for Amount {
	type Output = Amount;

	fn add(self, rhs: Amount) -> Amount {
		Amount(self.0.saturating_add(rhs.0))
	}
}

impl AddAssign for Amount {
	fn add_assign(&mut self, rhs: Amount) {
		self.0 = self.0.saturating_add(rhs.0);
	}
}

impl Sub for Amount {
	type Output = Amount;

	fn sub(self, rhs: Amount) -> Amount {
		Amount(self.0.saturating_sub(rhs.0))
	}
}

impl Neg for Amount {
	type Output = Amount;

	fn neg(self) -> Amount {
		Amount(self.0.saturating_neg())
	}
}

impl Sum for Amount {
	fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
		iter.fold(Amount::ZERO, |acc, a| acc + a)
	}
}

/// Format an amount as a coin string with full precision.
pub fn format_coin_amount(amount: Amount) -> String {
	format!("{:.*}", COIN_DECIMALS, amount.to_coin())
}
