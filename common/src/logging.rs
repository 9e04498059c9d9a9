//! Structured logging initialization.
//!
//! Controlled by `COLONY_LOG_FORMAT`:
//! - unset or `"text"` → human-readable lines to stderr
//! - `"json"` → JSON spans/events to stderr (for ingestion by a log shipper)
//!
//! Filtering follows `RUST_LOG` via `EnvFilter`, defaulting to `info`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Initialize the global `tracing` subscriber. Call once, near the top of
/// `main`. Safe to call more than once in tests; subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("COLONY_LOG_FORMAT").is_ok_and(|v| v == "json");

    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}
