// Logging module - tracing subscriber setup for the binary
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::domain::error::{HubError, HubResult};

/// Default filter directive for a configured level
pub fn default_directive(level: &str, verbose: bool) -> String {
    let level = if verbose { "debug" } else { level };
    format!("hublink={},warn", level)
}

/// Initialize logging system.
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a
/// global subscriber is already installed.
pub fn init_logging(level: &str, verbose: bool) -> HubResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level, verbose)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(verbose)
                .with_level(true)
                .with_thread_ids(verbose)
                .with_file(verbose)
                .with_line_number(verbose),
        )
        .try_init()
        .map_err(|e| HubError::Config {
            message: format!("Failed to install log subscriber: {}", e),
        })?;

    tracing::debug!("HubLink logging initialized");
    Ok(())
}
