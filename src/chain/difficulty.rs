//! Compact difficulty bits helpers.

/// Proof-of-work limit of the main network in compact form.
pub const MAINNET_POW_LIMIT_BITS: u32 = 0x1d00ffff;

/// Expand compact bits into the target they encode, as a float.
///
/// The sign bit yields a zero target since negative targets are never valid.
fn compact_to_f64(bits: u32) -> f64 {
	let mantissa = bits & 0x007f_ffff;
	let negative = bits & 0x0080_0000 != 0;
	let exponent = bits >> 24;
	if negative || mantissa == 0 {
		return 0.0;
	}

	if exponent <= 3 {
		(mantissa >> (8 * (3 - exponent))) as f64
	} else {
		mantissa as f64 * 256f64.powi(exponent as i32 - 3)
	}
}

/// Difficulty of `bits` relative to the proof-of-work limit, rounded to eight decimals.
pub fn difficulty_ratio(bits: u32, pow_limit_bits: u32) -> f64 {
	let target = compact_to_f64(bits);
	if target == 0.0 {
		return 0.0;
	}
	let ratio = compact_to_f64(pow_limit_bits) / target;
	(ratio * 1e8).round() / 1e8
}

/// Lowercase hex rendering of the compact bits, without padding.
pub fn format_bits(bits: u32) -> String {
	format!("{:x}", bits)
}

/// Parse compact bits from their hex rendering.
pub fn parse_bits(bits: &str) -> Option<u32> {
	u32::from_str_radix(bits.trim_start_matches("0x"), 16).ok()
}
