//! Tracing subscriber setup.
//!
//! Diagnostics go to stderr so they never mix with command output on
//! stdout. The filter comes from `REMOTE_OPS_LOG`, then `RUST_LOG`, then
//! `warn` (`debug` with `--verbose`).

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "REMOTE_OPS_LOG";

fn filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "remote_ops=debug" } else { "warn" };
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .try_init();
}
