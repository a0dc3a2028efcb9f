//! Logging setup
//!
//! The engine only emits `tracing` events; embedding applications install
//! their own subscriber. [`init`] is a convenience for binaries, and
//! [`init_for_tests`] routes output through libtest's capture instead.

use tracing_subscriber::EnvFilter;

fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install a formatted subscriber filtered by `RUST_LOG`, or `default_filter`
/// when the variable is unset. Output goes to stdout.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_filter))
        .try_init()
        .is_ok()
}

/// Like [`init`], but writes through the test harness so output is captured
/// per test and only shown for failures.
pub fn init_for_tests(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_filter))
        .with_test_writer()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_first_install_wins() {
        // installs, or finds one another test in this binary installed
        init_for_tests("run_lineage=debug");
        assert!(!init("run_lineage=info"));
        assert!(!init_for_tests("run_lineage=trace"));
    }
}
