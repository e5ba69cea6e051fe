//! Telemetry bootstrap for structured logging.

use tracing_subscriber::EnvFilter;

/// Install an env-filtered `tracing` subscriber for embedders that have none.
///
/// The filter honours `RUST_LOG`; without it, only warnings from this crate
/// surface. An already-installed subscriber stays in place (`try_init` refuses
/// to replace it), so calling this from tests and examples is always safe.
/// The scheduler itself only emits through the `tracing` facade and never
/// requires a subscriber to be present.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("yieldgate=warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
