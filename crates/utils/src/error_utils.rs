// Copyright 2025 Irreducible Inc.

//! Early-return helpers for precondition checks.
//!
//! With the `bail_panic` feature enabled both macros panic at the violation site instead of
//! returning, which gives a backtrace pointing at the offending call.

#[cfg(feature = "bail_panic")]
#[macro_export]
macro_rules! bail {
	($err:expr) => {
		panic!("{}", $err);
	};
}

#[cfg(not(feature = "bail_panic"))]
#[macro_export]
macro_rules! bail {
	($err:expr) => {
		return Err($err.into());
	};
}

/// Returns the error (converted with `Into`) unless the condition holds.
#[macro_export]
macro_rules! ensure {
	($cond:expr, $err:expr) => {
		if !$cond {
			$crate::bail!($err);
		}
	};
}
