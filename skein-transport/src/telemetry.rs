//! Tracing setup for binaries and tests.
//!
//! Log output is filtered by the `SKEIN_DEBUG` environment variable using
//! `EnvFilter` directives. Each module logs under its own target, so a
//! single component can be turned up on its own:
//!
//! ```text
//! SKEIN_DEBUG=skein_transport::rpc::server=debug,skein_transport::transport=trace
//! ```

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const DEBUG_ENV: &str = "SKEIN_DEBUG";

/// Build the filter from [`DEBUG_ENV`], falling back to `default_directive`
/// when the variable is unset or unparsable.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_env(DEBUG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install a global fmt subscriber filtered by [`DEBUG_ENV`] (default `info`).
///
/// Safe to call repeatedly; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("info"))
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!("subscriber installed");
    }

    #[test]
    fn test_fallback_directive() {
        let filter = env_filter("warn");
        // Either the environment or the fallback parsed into a usable filter.
        assert!(!filter.to_string().is_empty());
    }
}
