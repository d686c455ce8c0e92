// Copyright 2025 Irreducible Inc.

/// Division implementation that fails in case when `a` isn't divisible by `b`
pub const fn checked_int_div(a: usize, b: usize) -> usize {
	let result = a / b;
	assert!(b * result == a);

	result
}

/// Rounds `value` up to the next multiple of `alignment`.
///
/// Returns `None` on overflow.
///
/// ## Preconditions
///
/// - `alignment` must be a power of two
pub const fn checked_align_up(value: usize, alignment: usize) -> Option<usize> {
	assert!(alignment.is_power_of_two(), "alignment must be a power of two");

	match value.checked_add(alignment - 1) {
		Some(padded) => Some(padded & !(alignment - 1)),
		None => None,
	}
}

/// Product of all `factors`, `None` on overflow.
pub fn checked_product(factors: impl IntoIterator<Item = usize>) -> Option<usize> {
	factors
		.into_iter()
		.try_fold(1usize, |acc, factor| acc.checked_mul(factor))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_checked_int_div_success() {
		assert_eq!(checked_int_div(6, 1), 6);
		assert_eq!(checked_int_div(6, 2), 3);
		assert_eq!(checked_int_div(64, 8), 8);
	}

	#[test]
	#[should_panic]
	fn test_checked_int_div_fail() {
		_ = checked_int_div(5, 2);
	}

	#[test]
	fn test_checked_align_up() {
		assert_eq!(checked_align_up(0, 8), Some(0));
		assert_eq!(checked_align_up(1, 8), Some(8));
		assert_eq!(checked_align_up(8, 8), Some(8));
		assert_eq!(checked_align_up(100, 64), Some(128));
		assert_eq!(checked_align_up(usize::MAX, 8), None);
	}

	#[test]
	#[should_panic]
	fn test_checked_align_up_non_power_of_two() {
		_ = checked_align_up(10, 6);
	}

	#[test]
	fn test_checked_product() {
		assert_eq!(checked_product(std::iter::empty()), Some(1));
		assert_eq!(checked_product([32, 32, 8]), Some(8192));
		assert_eq!(checked_product([usize::MAX, 2]), None);
	}
}
