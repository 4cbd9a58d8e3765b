//! Tracing subscriber setup for the node daemon.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Registers the global tracing subscriber.
///
/// Verbosity follows `RUST_LOG`; the fleet default is `info`, which keeps
/// one line per accepted order, vote, and settlement.
pub struct Telemetry;

impl Telemetry {
    pub fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
