//! Logging setup utilities for the Noren chat client.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default log level for production builds.
pub const PRODUCTION_LOG_LEVEL: &str = "warn";

/// Default log level for development builds.
pub const DEVELOPMENT_LOG_LEVEL: &str = "debug";

/// Pick the default log level for a build flavour.
///
/// The production flag only changes verbosity, never behavior.
pub fn default_log_level(production: bool) -> &'static str {
    if production {
        PRODUCTION_LOG_LEVEL
    } else {
        DEVELOPMENT_LOG_LEVEL
    }
}

/// Build the filter directive used when `RUST_LOG` is not set.
fn default_directive(binary_name: &str, default_log_level: &str) -> String {
    format!(
        "noren_client={level},noren_shared={level},{binary}={level}",
        level = default_log_level,
        binary = binary_name.replace('-', "_"),
    )
}

/// Initialize the tracing subscriber with the specified default log level.
///
/// The log level can be overridden using the `RUST_LOG` environment variable.
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "noren-client")
/// * `default_log_level` - The default log level (e.g., "debug", "info", "warn", "error")
///
/// # Examples
///
/// ```no_run
/// use noren_shared::logger::{default_log_level, setup_logger};
///
/// setup_logger("noren-client", default_log_level(false));
/// ```
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive(binary_name, default_log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
