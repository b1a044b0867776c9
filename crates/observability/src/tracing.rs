//! Tracing/logging initialization.
//!
//! JSON logs by default so ledger audit lines (commits, recoveries,
//! quarantines) are machine-parseable. Filtering is configured via
//! `RUST_LOG`; reconciliation tooling typically runs with
//! `RUST_LOG=corebank_infra=debug` to see CAS retry behavior.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
