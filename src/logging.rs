//! Subscriber setup for hosts embedding the tracer.
//!
//! The library itself only emits `tracing` events. Pool diagnostics use the
//! [`POOL_TARGET`] target so they can be filtered separately.

use tracing_subscriber::EnvFilter;

/// Target used for pool acquire/release/destroy diagnostics.
pub const POOL_TARGET: &str = "txn_tracer::pool";

/// Install a global fmt subscriber. `RUST_LOG` directives take precedence
/// over `level` for anything they name.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(level: &str, json: bool) -> bool {
    let filter = EnvFilter::from_default_env().add_directive(
        format!("txn_tracer={level}")
            .parse()
            .unwrap_or_else(|_| "txn_tracer=info".parse().expect("static directive")),
    );

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}
