// Copyright 2025 Irreducible Inc.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// Events are filtered with `RUST_LOG` (default `info`). With the `profile` feature, span timings
/// are additionally written as CSV to `PROFILE_CSV_FILE` if it is set, or printed as a call tree
/// otherwise.
///
/// Calling this more than once is harmless; only the first subscriber is installed.
pub fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let registry = tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer());

	#[cfg(feature = "profile")]
	{
		use tracing_profile::{CsvLayer, PrintTreeConfig, PrintTreeLayer};

		if let Ok(csv_path) = std::env::var("PROFILE_CSV_FILE") {
			let _ = registry.with(CsvLayer::new(csv_path)).try_init();
		} else {
			let _ = registry
				.with(PrintTreeLayer::new(PrintTreeConfig {
					attention_above_percent: 25.0,
					relevant_above_percent: 2.5,
					hide_below_percent: 1.0,
					display_unaccounted: false,
				}))
				.try_init();
		}
	}

	#[cfg(not(feature = "profile"))]
	{
		let _ = registry.try_init();
	}
}
