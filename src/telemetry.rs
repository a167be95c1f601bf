//! Optional log output.

use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

/// The filter used when `RUST_LOG` is unset or invalid.
const DEFAULT_FILTER: &str = "warn";

/// Installs a global subscriber that prints the transport’s events to standard error.
///
/// The level is taken from the `RUST_LOG` environment variable, defaulting to `warn`. Nothing
/// happens if a global subscriber is already installed, so calling this more than once is
/// harmless. The transport never installs a subscriber by itself.
pub fn init_tracing() {
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
	let _ = tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_target(false))
		.try_init();
}

#[cfg(test)]
mod test {
	/// Tests that installing twice is harmless.
	#[test]
	fn test_init_twice() {
		super::init_tracing();
		super::init_tracing();
		tracing::warn!("logged after init");
	}
}
