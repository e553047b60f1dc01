//! Tracing setup for the CLI. Logs go to stderr so tool output on stdout stays clean.

use tracing_subscriber::{EnvFilter, fmt};

/// Default filter when `RUST_LOG` is unset.
fn default_directive(debug: bool) -> &'static str {
    if debug { "openagi=debug" } else { "openagi=warn" }
}

/// Install the global subscriber once. `RUST_LOG` wins over `debug`.
pub fn init(debug: bool) {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(debug)
            .with_level(true)
            .try_init();
    });
}
