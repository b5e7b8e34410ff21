//! Tracing setup for the dosetrack binary.

use crate::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter level for a configuration: `debug` when
/// `VerbosePrinting` is set, `info` otherwise.
pub fn level_for(config: &Config) -> &'static str {
    if config.verbose_printing {
        "debug"
    } else {
        "info"
    }
}

/// Initialize logging at the level the configuration asks for
pub fn init(config: &Config) {
    init_with_level(level_for(config))
}

/// Initialize logging with a specific default level
///
/// `RUST_LOG` still overrides `default_level`. Output goes to stderr so
/// command results on stdout stay machine-readable.
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init();
}

/// Initialize logging for tests (captured by the test harness)
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init();
}
