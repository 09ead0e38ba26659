//! Structured logging bootstrap for the CLI binary.
//!
//! Grounded on the teacher's `knhk-cli/src/tracing.rs` split between a
//! dedicated init module and `main.rs`: an env-var-driven filter plus a
//! choice between human-readable and JSON output, set once at process start.

use tracing_subscriber::{fmt, EnvFilter};

/// `VESPER_LOG` takes precedence; absent that, `RUST_LOG`; absent that,
/// `info`.
fn build_filter() -> EnvFilter {
    if let Ok(spec) = std::env::var("VESPER_LOG") {
        return EnvFilter::new(spec);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialise the global `tracing` subscriber. `json` selects
/// `tracing_subscriber::fmt::json()` over the default human-readable
/// formatter — useful when the host pipes CLI output into a log collector.
pub fn init(json: bool) {
    let filter = build_filter();
    let subscriber = fmt().with_env_filter(filter).with_target(true);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
