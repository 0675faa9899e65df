//! Observability setup for managing process-global observability state.

mod common;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use self::common::*;

/// Install the global subscriber. Calling it again is harmless: the first
/// subscriber stays in place.
pub fn init(options: ObservabilityOptions) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_directive));

    let result = if options.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_ansi(options.ansi)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    if let Err(err) = result {
        eprintln!("tracing init failed: {err}");
    }
}
