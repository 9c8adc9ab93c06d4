//! # Logging Bootstrap
//!
//! Installs a `tracing-subscriber` fmt subscriber for hosts that do not bring
//! their own. `RUST_LOG` always wins over the built-in filter.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,beacon=info,sqlx=warn";
const VERBOSE_FILTER: &str = "info,beacon=debug,beacon_sync=debug,beacon_db=debug,sqlx=warn";

/// Returns the filter directive used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    }
}

/// Installs the global subscriber. Returns false if one was already set.
pub fn init_tracing(verbose: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
