//! Logging setup shared by the engine and its front-ends.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing with the default `info` filter.
pub fn init() {
    init_with_filter("info");
}

/// Initialize tracing with a custom default filter.
///
/// `RUST_LOG` wins over `default_filter` when set. Output goes to stderr so
/// that stdout stays free for frame protocols.
pub fn init_with_filter(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

/// Segment prefixes for lifecycle log lines.
pub mod prefix {
    /// Worker or session starting
    pub const OPEN: &str = "✿";
    /// Worker or session shutting down
    pub const CLOSE: &str = "❀";
    /// Sampling point inside the optimizer loop
    pub const TICK: &str = "꩜";
}
