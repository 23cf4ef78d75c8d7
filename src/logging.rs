//! Console logging setup
//!
//! Defaults to `info` for this crate and `warn` for everything else;
//! override with `RUST_LOG` (e.g. `RUST_LOG=image_captioner=debug`).

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,image_captioner=info";

pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second init (e.g. from tests) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
