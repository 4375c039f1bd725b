//! Process-wide `tracing` subscriber setup.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<bool> = OnceCell::new();

/// Install a fmt subscriber filtered by `filter` (an `EnvFilter` directive).
///
/// Only the first call does anything. Returns whether this process ended up
/// with our subscriber installed; `false` means another one was already set
/// by the host, which is left alone.
pub fn init(filter: &str) -> bool {
    *INIT.get_or_init(|| {
        let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
    })
}
