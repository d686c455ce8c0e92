// Copyright 2025 Irreducible Inc.

use std::{env, sync::OnceLock};

/// Pins the global rayon pool to the calling thread when `RAYON_NUM_THREADS=1`.
///
/// Kernels then run inline, which keeps traces of a forward pass in program order. rayon only
/// allows the global pool to be built once, so the outcome of the first call is cached and
/// returned by reference (`ThreadPoolBuildError` is not `Clone`). Call it at the top of `main`.
pub fn adjust_thread_pool() -> &'static Result<(), rayon::ThreadPoolBuildError> {
	static ONCE_GUARD: OnceLock<Result<(), rayon::ThreadPoolBuildError>> = OnceLock::new();

	ONCE_GUARD.get_or_init(|| match env::var("RAYON_NUM_THREADS") {
		Ok(v) if v == "1" => rayon::ThreadPoolBuilder::new()
			.num_threads(1)
			.use_current_thread()
			.build_global(),
		_ => Ok(()),
	})
}
