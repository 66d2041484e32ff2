//! Structured logging initialization.
//!
//! A local stand-in for the tracing-setup helper the hosting binary would
//! otherwise pull from a shared observability crate: reads `RUST_LOG`
//! (default `info`) and installs a `tracing-subscriber` registry with an
//! `EnvFilter` layer plus a formatting layer. `LOG_FORMAT=json` switches the
//! formatting layer to structured JSON output, otherwise plain text.

use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global `tracing` subscriber. Panics if a subscriber is
/// already installed.
pub fn initialize_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("{info}");
        default_hook(info);
    }));
}
