//! Log output for the relay binary.
//!
//! Logging starts at `info` so config loading is visible, then switches to
//! `[logging] level` once the file has been read. An explicit `RUST_LOG`
//! overrides both and is never replaced at runtime.

use std::env;
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

const STARTUP_LEVEL: &str = "info";

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static ACTIVE_FILTER: OnceLock<FilterHandle> = OnceLock::new();

fn rust_log_is_set() -> bool {
    env::var_os(EnvFilter::DEFAULT_ENV).is_some()
}

/// Directives from `RUST_LOG` if present and valid, else `level`. Falls back
/// to the startup level when `level` does not parse.
fn build_filter(level: &str) -> EnvFilter {
    if rust_log_is_set()
        && let Ok(filter) = EnvFilter::try_from_default_env()
    {
        return filter;
    }
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(STARTUP_LEVEL))
}

/// Install the global subscriber. Only the first call has any effect.
pub fn init_tracing() {
    let (filter_layer, handle) = reload::Layer::new(build_filter(STARTUP_LEVEL));
    if ACTIVE_FILTER.set(handle).is_err() {
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer())
        .try_init();
}

/// Switch to the configured level. No-op under `RUST_LOG` or before
/// [`init_tracing`].
pub fn apply_logging_level(level: &str) {
    if rust_log_is_set() {
        return;
    }
    let Some(handle) = ACTIVE_FILTER.get() else {
        return;
    };
    if let Err(e) = handle.reload(build_filter(level)) {
        tracing::warn!(level, error = %e, "Could not change log level");
    }
}
