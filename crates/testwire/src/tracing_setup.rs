//! Process-wide tracing setup for test drivers and test hosts.

use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::tracing_layer::EventSinkLayer;

/// Filter from `TESTWIRE_LOG`, then `RUST_LOG`, then `warn`.
pub fn env_filter() -> EnvFilter {
    let directives = std::env::var("TESTWIRE_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var("RUST_LOG").ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "warn".to_string());
    EnvFilter::new(directives)
}

/// Install a `fmt` subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .try_init();
}

/// Install a `fmt` subscriber plus a layer that forwards events to the
/// connected driver's event sink (see [`EventSinkLayer`]).
pub fn init_host_tracing(layer: EventSinkLayer) {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter()))
        .with(layer)
        .try_init();
}
