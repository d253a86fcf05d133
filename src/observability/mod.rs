//! Logging initialization.
//!
//! Structured logging via `tracing`; the subscriber reads `ENGRAM_LOG`
//! (falling back to `RUST_LOG`, then `warn`) and can emit JSON for log
//! shippers. Metrics are recorded through the `metrics` facade throughout
//! the crate; wiring an exporter is left to embedders.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// Logs go to stderr so command output stays parseable. Safe to call once;
/// a second call is a no-op (the first subscriber wins).
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_env("ENGRAM_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}
