//! Diagnostic tracing for tfrun.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, written to stderr.
//!   Never mixed with stdout, which carries the JSON result of a command.
//!
//! - **Workflow annotations (`io/actions`)**: `::error::` / `::warning::` lines that the CI
//!   pipeline renders in its UI. Always emitted, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "warn,tfrun=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn,tfrun=info` when unset or invalid.
///
/// # Example
/// ```bash
/// RUST_LOG=tfrun=debug tfrun plan --workspace net-dev
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
