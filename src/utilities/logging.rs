//! Tracing setup for embedding hosts.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber with env-filter support.
///
/// Reads `RUST_LOG`, defaulting to `mythweaver=info`. Safe to call more
/// than once; only the first call installs a subscriber.
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mythweaver=info")),
            )
            .init();
    });
}
