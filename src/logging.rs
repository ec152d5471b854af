//! Logging setup. Stderr, `RUST_LOG` filter, JSON when `BEEWALLET_LOG_JSON=1`.

use tracing_subscriber::{fmt, EnvFilter};

pub const JSON_ENV: &str = "BEEWALLET_LOG_JSON";

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(JSON_ENV).map(|v| v == "1").unwrap_or(false);

    let builder = fmt::Subscriber::builder().with_env_filter(filter).with_writer(std::io::stderr);
    let _ = if json { builder.json().try_init() } else { builder.pretty().try_init() };
}
