//! Semantic version negotiation with the chain-server.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A `major.minor.patch` API version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Semver {
	pub major: u32,
	pub minor: u32,
	pub patch: u32,
}

impl Semver {
	pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
		Self {
			major,
			minor,
			patch,
		}
	}

	/// Whether a server advertising `actual` satisfies the `required` minimum.
	///
	/// The major version must match exactly; minor and patch must be at least the required ones.
	pub fn compatible(required: Semver, actual: Semver) -> bool {
		if required.major != actual.major {
			return false;
		}
		(actual.minor, actual.patch) >= (required.minor, required.patch)
	}
}

impl fmt::Display for Semver {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
	}
}

/// Minimum chain-server JSON-RPC API version this service works with.
pub const REQUIRED_CHAIN_SERVER_API: Semver = Semver::new(3, 0, 0);
