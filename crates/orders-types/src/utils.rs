//! Helper utilities shared across crates.

/// Current UNIX timestamp in seconds, or 0 if the clock is before the epoch.
pub fn current_timestamp() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

/// Shortens an identifier for log output.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((idx, _)) => format!("{}..", &id[..idx]),
		None => id.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("pay-1"), "pay-1");
		assert_eq!(truncate_id("12345678"), "12345678");
		assert_eq!(
			truncate_id("3f2c9a1e-8d7b-4c55-a0b1-0e9d8c7b6a50"),
			"3f2c9a1e.."
		);
	}
}
