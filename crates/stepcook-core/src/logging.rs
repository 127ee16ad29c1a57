//! Tracing subscriber setup for hosts that don't install their own.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber. `RUST_LOG` overrides `default_filter`
/// (e.g. `"stepcook_core=info"`).
///
/// Returns `false` if a global subscriber was already set; calling this
/// more than once is harmless.
pub fn init_logging(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
